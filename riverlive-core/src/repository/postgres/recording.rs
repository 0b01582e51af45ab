use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgExecutor, PgPool, Row};
use std::collections::BTreeMap;

use crate::{
    models::{ChannelId, Recording, RecordingId, RecordingRendition, RecordingThumbnail},
    Result,
};

const RECORDING_COLUMNS: &str = "id, channel_id, session_id, title, duration_seconds, \
                                 playback_base_url, renditions, thumbnails, metadata, \
                                 published_at, created_at, retain_until";

/// Recording repository for database operations
///
/// Rows never carry clip summaries; the caller attaches them.
#[derive(Clone)]
pub struct RecordingRepository {
    pool: PgPool,
}

impl RecordingRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_with_executor<'e, E>(&self, recording: &Recording, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO recordings (id, channel_id, session_id, title, duration_seconds,
                                     playback_base_url, renditions, thumbnails, metadata,
                                     published_at, created_at, retain_until)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(recording.id.as_str())
        .bind(recording.channel_id.as_str())
        .bind(recording.session_id.as_str())
        .bind(&recording.title)
        .bind(recording.duration_seconds)
        .bind(&recording.playback_base_url)
        .bind(Json(&recording.renditions))
        .bind(Json(&recording.thumbnails))
        .bind(Json(&recording.metadata))
        .bind(recording.published_at)
        .bind(recording.created_at)
        .bind(recording.retain_until)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &RecordingId) -> Result<Option<Recording>> {
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_recording).transpose()
    }

    /// Get recording by ID with a row lock; `share` takes `FOR SHARE` instead of `FOR UPDATE`
    pub async fn get_locked_with_executor<'e, E>(
        &self,
        id: &RecordingId,
        share: bool,
        executor: E,
    ) -> Result<Option<Recording>>
    where
        E: PgExecutor<'e>,
    {
        let lock = if share { "FOR SHARE" } else { "FOR UPDATE" };
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = $1 {lock}");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(Self::row_to_recording).transpose()
    }

    /// Recordings of a channel, newest first
    pub async fn list_by_channel(&self, channel_id: &ChannelId, include_unpublished: bool) -> Result<Vec<Recording>> {
        let sql = format!(
            "SELECT {RECORDING_COLUMNS}
             FROM recordings
             WHERE channel_id = $1 AND ($2 OR published_at IS NOT NULL)
             ORDER BY created_at DESC, id COLLATE \"C\" DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id.as_str())
            .bind(include_unpublished)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_recording).collect()
    }

    /// Every recording of a channel, locked
    pub async fn list_by_channel_for_update_with_executor<'e, E>(
        &self,
        channel_id: &ChannelId,
        executor: E,
    ) -> Result<Vec<Recording>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT {RECORDING_COLUMNS}
             FROM recordings
             WHERE channel_id = $1
             ORDER BY id COLLATE \"C\"
             FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id.as_str())
            .fetch_all(executor)
            .await?;
        rows.iter().map(Self::row_to_recording).collect()
    }

    /// Recordings whose retention deadline has passed, locked
    pub async fn expired_for_update_with_executor<'e, E>(
        &self,
        now: DateTime<Utc>,
        executor: E,
    ) -> Result<Vec<Recording>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT {RECORDING_COLUMNS}
             FROM recordings
             WHERE retain_until IS NOT NULL AND retain_until <= $1
             ORDER BY id COLLATE \"C\"
             FOR UPDATE"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(executor).await?;
        rows.iter().map(Self::row_to_recording).collect()
    }

    /// Persist publication state
    pub async fn save_publication_with_executor<'e, E>(&self, recording: &Recording, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE recordings SET published_at = $2, retain_until = $3 WHERE id = $1")
            .bind(recording.id.as_str())
            .bind(recording.published_at)
            .bind(recording.retain_until)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Delete recordings; their clip exports cascade
    pub async fn delete_many_with_executor<'e, E>(&self, ids: &[RecordingId], executor: E) -> Result<u64>
    where
        E: PgExecutor<'e>,
    {
        let ids: Vec<&str> = ids.iter().map(RecordingId::as_str).collect();
        let result = sqlx::query("DELETE FROM recordings WHERE id = ANY($1)")
            .bind(&ids)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    fn row_to_recording(row: &PgRow) -> Result<Recording> {
        let renditions: Json<Vec<RecordingRendition>> = row.try_get("renditions")?;
        let thumbnails: Json<Vec<RecordingThumbnail>> = row.try_get("thumbnails")?;
        let metadata: Json<BTreeMap<String, String>> = row.try_get("metadata")?;
        Ok(Recording {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            session_id: row.try_get("session_id")?,
            title: row.try_get("title")?,
            duration_seconds: row.try_get("duration_seconds")?,
            playback_base_url: row.try_get("playback_base_url")?,
            renditions: renditions.0,
            thumbnails: thumbnails.0,
            metadata: metadata.0,
            published_at: row.try_get("published_at")?,
            created_at: row.try_get("created_at")?,
            retain_until: row.try_get("retain_until")?,
            clips: Vec::new(),
        })
    }
}
