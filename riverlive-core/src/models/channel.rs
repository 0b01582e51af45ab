use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::{generate_stream_key, ChannelId, SessionId, UserId};
use crate::{Error, Result};

/// Channel live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveState {
    #[default]
    Offline,
    Starting,
    Live,
    Ended,
}

impl LiveState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }

    /// States that require a current session
    #[must_use]
    pub const fn has_session(&self) -> bool {
        matches!(self, Self::Starting | Self::Live)
    }
}

impl std::fmt::Display for LiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "offline" => Ok(Self::Offline),
            "starting" => Ok(Self::Starting),
            "live" => Ok(Self::Live),
            "ended" => Ok(Self::Ended),
            other => Err(Error::InvalidInput(format!("invalid live state {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub owner_id: UserId,
    pub stream_key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub live_state: LiveState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Build a new offline channel, validating the title
    pub fn new(params: CreateChannelParams, now: DateTime<Utc>) -> Result<Self> {
        let title = params.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title is required".to_string()));
        }
        Ok(Self {
            id: ChannelId::new(),
            owner_id: params.owner_id,
            stream_key: generate_stream_key(),
            title: title.to_string(),
            category: params.category.trim().to_string(),
            tags: normalize_tags(&params.tags),
            live_state: LiveState::Offline,
            current_session_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.live_state, LiveState::Live)
    }

    /// Claim the channel for a new session before the ingest boot
    pub fn mark_starting(&mut self, session_id: SessionId, now: DateTime<Utc>) -> Result<()> {
        if self.current_session_id.is_some() {
            return Err(Error::Conflict("channel already live".to_string()));
        }
        self.live_state = LiveState::Starting;
        self.current_session_id = Some(session_id);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_live(&mut self, now: DateTime<Utc>) {
        self.live_state = LiveState::Live;
        self.updated_at = now;
    }

    pub fn mark_offline(&mut self, now: DateTime<Utc>) {
        self.live_state = LiveState::Offline;
        self.current_session_id = None;
        self.updated_at = now;
    }

    /// Current session id if the channel is live, otherwise `channel is not live`
    pub fn live_session_id(&self) -> Result<&SessionId> {
        match (&self.current_session_id, self.live_state) {
            (Some(session_id), LiveState::Live) => Ok(session_id),
            _ => Err(Error::Conflict("channel is not live".to_string())),
        }
    }

    /// Apply a partial update
    pub fn apply_update(&mut self, update: &ChannelUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = &update.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(Error::InvalidInput("title cannot be empty".to_string()));
            }
            self.title = title.to_string();
        }
        if let Some(category) = &update.category {
            self.category = category.trim().to_string();
        }
        if let Some(tags) = &update.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(state) = update.live_state {
            if state.has_session() {
                return Err(Error::InvalidInput(format!(
                    "live state {state} can only be reached by starting a stream"
                )));
            }
            if self.current_session_id.is_some() {
                return Err(Error::Conflict(
                    "cannot change live state of a channel with an active stream".to_string(),
                ));
            }
            self.live_state = state;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Case-insensitive match against title and tags; `needle` must be lowercase
    #[must_use]
    pub fn matches_query(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.title.to_lowercase().contains(needle)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
    }
}

/// Trim, lowercase, dedupe and sort tags
#[must_use]
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Live channels first, then oldest first, ties by id
pub fn sort_channels(channels: &mut [Channel]) {
    channels.sort_by(|a, b| {
        b.is_live()
            .cmp(&a.is_live())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug, Clone, Default)]
pub struct CreateChannelParams {
    pub owner_id: UserId,
    pub title: String,
    pub category: String,
    pub tags: Vec<String>,
}

/// Partial channel update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct ChannelUpdate {
    pub title: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub live_state: Option<LiveState>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelListQuery {
    pub owner_id: Option<UserId>,
    pub query: Option<String>,
}

impl ChannelListQuery {
    /// Lowercased, trimmed search needle
    #[must_use]
    pub fn needle(&self) -> String {
        self.query.as_deref().unwrap_or_default().trim().to_lowercase()
    }
}
