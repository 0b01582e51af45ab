//! In-memory dataset mirrored to a single JSON document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::models::{
    summarize_clips, Channel, ChannelId, ClipExport, ClipId, Recording, RecordingId, SessionId,
    StreamSession,
};
use crate::{Error, Result};

/// Every entity collection, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dataset {
    pub channels: BTreeMap<ChannelId, Channel>,
    pub stream_sessions: BTreeMap<SessionId, StreamSession>,
    pub recordings: BTreeMap<RecordingId, Recording>,
    pub clip_exports: BTreeMap<ClipId, ClipExport>,
    /// Collections owned by other services (users, chat, follows), kept verbatim
    #[serde(flatten)]
    pub collaborators: serde_json::Map<String, serde_json::Value>,
}

/// Entity counts, used when migrating between backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetCounts {
    pub channels: usize,
    pub stream_sessions: usize,
    pub recordings: usize,
    pub clip_exports: usize,
}

impl Dataset {
    /// Load from `path`; a missing or blank file is an empty dataset
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write to a temp file beside `path`, fsync, then rename over `path`
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let directory = data_directory(path);
        std::fs::create_dir_all(directory)?;

        let payload = serde_json::to_vec_pretty(self)?;
        // NamedTempFile is created 0600 on unix
        let mut file = tempfile::NamedTempFile::new_in(directory)?;
        file.write_all(&payload)?;
        file.as_file().sync_all()?;
        file.persist(path)?;
        Ok(())
    }

    #[must_use]
    pub fn counts(&self) -> DatasetCounts {
        DatasetCounts {
            channels: self.channels.len(),
            stream_sessions: self.stream_sessions.len(),
            recordings: self.recordings.len(),
            clip_exports: self.clip_exports.len(),
        }
    }

    pub fn channel(&self, id: &ChannelId) -> Result<&Channel> {
        self.channels.get(id).ok_or_else(|| Error::not_found("channel", id))
    }

    pub fn channel_mut(&mut self, id: &ChannelId) -> Result<&mut Channel> {
        self.channels.get_mut(id).ok_or_else(|| Error::not_found("channel", id))
    }

    pub fn session(&self, id: &SessionId) -> Result<&StreamSession> {
        self.stream_sessions.get(id).ok_or_else(|| Error::not_found("stream session", id))
    }

    pub fn recording(&self, id: &RecordingId) -> Result<&Recording> {
        self.recordings.get(id).ok_or_else(|| Error::not_found("recording", id))
    }

    pub fn clip(&self, id: &ClipId) -> Result<&ClipExport> {
        self.clip_exports.get(id).ok_or_else(|| Error::not_found("clip export", id))
    }

    pub fn clips_for<'a>(&'a self, recording_id: &'a RecordingId) -> impl Iterator<Item = &'a ClipExport> + 'a {
        self.clip_exports
            .values()
            .filter(move |clip| &clip.recording_id == recording_id)
    }

    /// Copy of the recording with its clip summaries attached
    #[must_use]
    pub fn hydrate(&self, recording: &Recording) -> Recording {
        let mut hydrated = recording.clone();
        hydrated.clips = summarize_clips(self.clips_for(&recording.id));
        hydrated
    }

    #[must_use]
    pub fn expired_recordings(&self, now: DateTime<Utc>) -> Vec<RecordingId> {
        self.recordings
            .values()
            .filter(|recording| recording.is_expired(now))
            .map(|recording| recording.id.clone())
            .collect()
    }

    /// Drop a recording and its clips
    pub fn remove_recording(&mut self, id: &RecordingId) {
        self.clip_exports.retain(|_, clip| &clip.recording_id != id);
        self.recordings.remove(id);
    }
}

/// Directory holding the dataset file
#[must_use]
pub fn data_directory(path: &Path) -> &Path {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ChannelFixture, ClipFixture, RecordingFixture};

    #[test]
    fn test_load_missing_and_blank_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        assert_eq!(Dataset::load(&path).unwrap(), Dataset::default());

        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(Dataset::load(&path).unwrap(), Dataset::default());

        std::fs::write(&path, "{not json").unwrap();
        assert!(Dataset::load(&path).is_err());
    }

    #[test]
    fn test_write_atomic_round_trip_keeps_collaborators() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        let mut dataset = Dataset::default();
        let channel = ChannelFixture::new().with_tags(&["music"]).build();
        dataset.channels.insert(channel.id.clone(), channel);
        dataset
            .collaborators
            .insert("users".to_string(), serde_json::json!({"u1": {"id": "u1"}}));
        dataset.write_atomic(&path).unwrap();

        let loaded = Dataset::load(&path).unwrap();
        assert_eq!(loaded, dataset);
        assert!(loaded.collaborators.contains_key("users"));

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("streamSessions").is_some());
        assert!(raw.get("clipExports").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        Dataset::default().write_atomic(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_remove_recording_drops_clips() {
        let mut dataset = Dataset::default();
        let recording = RecordingFixture::new().build();
        let mut clip = ClipFixture::new().build();
        clip.recording_id = recording.id.clone();
        let other = ClipFixture::new().build();
        dataset.recordings.insert(recording.id.clone(), recording.clone());
        dataset.clip_exports.insert(clip.id.clone(), clip.clone());
        dataset.clip_exports.insert(other.id.clone(), other.clone());

        assert_eq!(dataset.hydrate(&recording).clips.len(), 1);
        dataset.remove_recording(&recording.id);
        assert!(dataset.recordings.is_empty());
        assert_eq!(dataset.clip_exports.len(), 1);
        assert!(dataset.clip_exports.contains_key(&other.id));
    }
}
