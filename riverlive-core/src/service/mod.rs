//! Stream and recording lifecycle services
//!
//! Both repository backends delegate the state machine and artifact handling
//! to these services so their observable behavior cannot drift apart.

pub mod recording;
pub mod stream;

use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

pub use recording::{RecordingLifecycle, RetentionPolicy};
pub use stream::{StreamLifecycle, StreamStateStore};

/// Source of "now"; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock truncated to microseconds, the precision Postgres keeps
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().trunc_subsecs(6))
}
