//! Flat-file dataset tooling: inspect a dataset and move it into Postgres

use futures::FutureExt;
use sqlx::PgPool;
use std::path::Path;
use tracing::info;

use crate::repository::flat_file::Dataset;
use crate::repository::postgres::{
    ChannelRepository, ClipRepository, RecordingRepository, SessionRepository,
};
use crate::transaction::with_transaction;
use crate::Result;

pub use crate::repository::flat_file::DatasetCounts;

/// Load a flat-file dataset; a missing or empty file is an empty dataset
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Dataset> {
    Dataset::load(path.as_ref())
}

/// Import every channel, session, recording and clip in one transaction
///
/// Rows that already exist fail the whole import. Collections owned by other
/// services are not imported.
pub async fn import_into_postgres(pool: &PgPool, dataset: Dataset) -> Result<DatasetCounts> {
    let counts = dataset.counts();
    let channels = ChannelRepository::new(pool.clone());
    let sessions = SessionRepository::new(pool.clone());
    let recordings = RecordingRepository::new(pool.clone());
    let clips = ClipRepository::new(pool.clone());

    with_transaction(pool, move |conn| {
        async move {
            for channel in dataset.channels.values() {
                channels.insert_with_executor(channel, &mut *conn).await?;
            }
            for session in dataset.stream_sessions.values() {
                sessions.insert_with_executor(session, &mut *conn).await?;
            }
            for recording in dataset.recordings.values() {
                recordings.insert_with_executor(recording, &mut *conn).await?;
            }
            for clip in dataset.clip_exports.values() {
                clips.insert_with_executor(clip, &mut *conn).await?;
            }
            Ok(())
        }
        .boxed()
    })
    .await?;

    info!(
        channels = counts.channels,
        stream_sessions = counts.stream_sessions,
        recordings = counts.recordings,
        clip_exports = counts.clip_exports,
        "Imported flat-file dataset"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::generate_stream_key;
    use crate::test_helpers::{ChannelFixture, ClipFixture, RecordingFixture, SessionFixture};

    fn sample() -> Dataset {
        let mut dataset = Dataset::default();
        let mut channel = ChannelFixture::new().build();
        channel.stream_key = generate_stream_key();
        let session = SessionFixture::new().with_channel(&channel.id).build();
        let mut recording = RecordingFixture::new().build();
        recording.channel_id = channel.id.clone();
        recording.session_id = session.id.clone();
        let mut clip = ClipFixture::new().build();
        clip.recording_id = recording.id.clone();
        clip.channel_id = channel.id.clone();
        clip.session_id = session.id.clone();

        dataset.channels.insert(channel.id.clone(), channel);
        dataset.stream_sessions.insert(session.id.clone(), session);
        dataset.recordings.insert(recording.id.clone(), recording);
        dataset.clip_exports.insert(clip.id.clone(), clip);
        dataset
    }

    #[test]
    fn test_load_dataset_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        assert_eq!(load_dataset(&path).unwrap().counts(), DatasetCounts::default());

        sample().write_atomic(&path).unwrap();
        let counts = load_dataset(&path).unwrap().counts();
        assert_eq!(
            counts,
            DatasetCounts {
                channels: 1,
                stream_sessions: 1,
                recordings: 1,
                clip_exports: 1,
            }
        );
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_import_into_postgres() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("../migrations").run(&pool).await.unwrap();

        let dataset = sample();
        let channel_id = dataset.channels.keys().next().unwrap().clone();
        let counts = import_into_postgres(&pool, dataset.clone()).await.unwrap();
        assert_eq!(counts.clip_exports, 1);

        let stored = ChannelRepository::new(pool.clone()).get(&channel_id).await.unwrap();
        assert_eq!(stored.as_ref(), dataset.channels.get(&channel_id));

        // A second import collides on primary keys and leaves nothing behind
        let err = import_into_postgres(&pool, dataset).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
