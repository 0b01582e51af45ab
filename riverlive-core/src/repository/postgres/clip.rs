use sqlx::{postgres::PgRow, PgExecutor, PgPool, Row};

use crate::{
    models::{ClipExport, ClipId, ClipStatus, RecordingId},
    Result,
};

const CLIP_COLUMNS: &str = "id, recording_id, channel_id, session_id, title, start_seconds, \
                            end_seconds, status, playback_url, created_at, completed_at, \
                            storage_object";

/// Clip export repository for database operations
#[derive(Clone)]
pub struct ClipRepository {
    pool: PgPool,
}

impl ClipRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_with_executor<'e, E>(&self, clip: &ClipExport, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO clip_exports (id, recording_id, channel_id, session_id, title,
                                       start_seconds, end_seconds, status, playback_url,
                                       created_at, completed_at, storage_object)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(clip.id.as_str())
        .bind(clip.recording_id.as_str())
        .bind(clip.channel_id.as_str())
        .bind(clip.session_id.as_str())
        .bind(&clip.title)
        .bind(clip.start_seconds)
        .bind(clip.end_seconds)
        .bind(clip.status.as_str())
        .bind(&clip.playback_url)
        .bind(clip.created_at)
        .bind(clip.completed_at)
        .bind(&clip.storage_object)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &ClipId) -> Result<Option<ClipExport>> {
        let sql = format!("SELECT {CLIP_COLUMNS} FROM clip_exports WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_clip).transpose()
    }

    pub async fn get_for_update_with_executor<'e, E>(&self, id: &ClipId, executor: E) -> Result<Option<ClipExport>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!("SELECT {CLIP_COLUMNS} FROM clip_exports WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(Self::row_to_clip).transpose()
    }

    /// Clips of a recording, newest first
    pub async fn list_by_recording(&self, recording_id: &RecordingId) -> Result<Vec<ClipExport>> {
        let sql = format!(
            "SELECT {CLIP_COLUMNS}
             FROM clip_exports
             WHERE recording_id = $1
             ORDER BY created_at DESC, id COLLATE \"C\" DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(recording_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_clip).collect()
    }

    /// Clips belonging to any of `recording_ids`
    pub async fn list_by_recordings_with_executor<'e, E>(
        &self,
        recording_ids: &[RecordingId],
        executor: E,
    ) -> Result<Vec<ClipExport>>
    where
        E: PgExecutor<'e>,
    {
        if recording_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = recording_ids.iter().map(RecordingId::as_str).collect();
        let sql = format!(
            "SELECT {CLIP_COLUMNS}
             FROM clip_exports
             WHERE recording_id = ANY($1)
             ORDER BY id COLLATE \"C\""
        );
        let rows = sqlx::query(&sql).bind(&ids).fetch_all(executor).await?;
        rows.iter().map(Self::row_to_clip).collect()
    }

    pub async fn list_by_recordings(&self, recording_ids: &[RecordingId]) -> Result<Vec<ClipExport>> {
        self.list_by_recordings_with_executor(recording_ids, &self.pool).await
    }

    /// Write back the fields a render worker may change
    pub async fn save_with_executor<'e, E>(&self, clip: &ClipExport, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "UPDATE clip_exports
             SET status = $2, playback_url = $3, storage_object = $4, completed_at = $5
             WHERE id = $1",
        )
        .bind(clip.id.as_str())
        .bind(clip.status.as_str())
        .bind(&clip.playback_url)
        .bind(&clip.storage_object)
        .bind(clip.completed_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete_with_executor<'e, E>(&self, id: &ClipId, executor: E) -> Result<bool>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM clip_exports WHERE id = $1")
            .bind(id.as_str())
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every clip of the given recordings
    pub async fn delete_by_recordings_with_executor<'e, E>(
        &self,
        recording_ids: &[RecordingId],
        executor: E,
    ) -> Result<u64>
    where
        E: PgExecutor<'e>,
    {
        let ids: Vec<&str> = recording_ids.iter().map(RecordingId::as_str).collect();
        let result = sqlx::query("DELETE FROM clip_exports WHERE recording_id = ANY($1)")
            .bind(&ids)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    fn row_to_clip(row: &PgRow) -> Result<ClipExport> {
        let status: String = row.try_get("status")?;
        Ok(ClipExport {
            id: row.try_get("id")?,
            recording_id: row.try_get("recording_id")?,
            channel_id: row.try_get("channel_id")?,
            session_id: row.try_get("session_id")?,
            title: row.try_get("title")?,
            start_seconds: row.try_get("start_seconds")?,
            end_seconds: row.try_get("end_seconds")?,
            status: status.parse::<ClipStatus>()?,
            playback_url: row.try_get("playback_url")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            storage_object: row.try_get("storage_object")?,
        })
    }
}
