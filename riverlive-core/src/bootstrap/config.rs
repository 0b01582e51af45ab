//! Configuration loading

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::Config;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "RIVERLIVE_CONFIG_PATH";

/// Load and validate configuration
///
/// Config file search order:
/// 1. `RIVERLIVE_CONFIG_PATH` (explicit path)
/// 2. `./riverlive.toml` then `./config.yaml` (current working directory)
/// 3. Fall back to defaults and environment variables only
pub fn load_config() -> Result<Config> {
    let explicit = std::env::var(CONFIG_PATH_ENV).ok();
    let config_path = find_config_file(explicit.as_deref());

    let config = match &config_path {
        Some(path) => Config::load(Some(path))?,
        None => Config::from_env()?,
    };
    config.validate()?;

    info!(
        config_file = config_path.as_deref().unwrap_or("<none>"),
        backend = ?config.storage.backend,
        object_storage = config.object_storage.is_enabled(),
        "Configuration loaded"
    );
    Ok(config)
}

fn find_config_file(explicit: Option<&str>) -> Option<String> {
    explicit
        .into_iter()
        .chain(["riverlive.toml", "config.yaml"])
        .find(|path| Path::new(path).exists())
        .map(ToString::to_string)
}
