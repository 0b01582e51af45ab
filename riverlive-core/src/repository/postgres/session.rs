use sqlx::{postgres::PgRow, types::Json, PgExecutor, PgPool, Row};

use crate::{
    models::{ChannelId, RenditionManifest, SessionId, StreamSession},
    Result,
};

const SESSION_COLUMNS: &str = "id, channel_id, started_at, ended_at, renditions, peak_concurrent, \
                               origin_url, playback_url, ingest_endpoints, ingest_job_ids, \
                               rendition_manifests";

/// Stream session repository for database operations
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_with_executor<'e, E>(&self, session: &StreamSession, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO stream_sessions (id, channel_id, started_at, ended_at, renditions,
                                          peak_concurrent, origin_url, playback_url,
                                          ingest_endpoints, ingest_job_ids, rendition_manifests)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(session.id.as_str())
        .bind(session.channel_id.as_str())
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(&session.renditions)
        .bind(session.peak_concurrent)
        .bind(&session.origin_url)
        .bind(&session.playback_url)
        .bind(&session.ingest_endpoints)
        .bind(&session.ingest_job_ids)
        .bind(Json(&session.rendition_manifests))
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> Result<Option<StreamSession>> {
        self.get_with_executor(id, &self.pool).await
    }

    pub async fn get_with_executor<'e, E>(&self, id: &SessionId, executor: E) -> Result<Option<StreamSession>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM stream_sessions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    /// Sessions of a channel, newest first
    pub async fn list_by_channel(&self, channel_id: &ChannelId) -> Result<Vec<StreamSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS}
             FROM stream_sessions
             WHERE channel_id = $1
             ORDER BY started_at DESC, id COLLATE \"C\" DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_session).collect()
    }

    /// Persist the end of a session
    pub async fn save_end_with_executor<'e, E>(&self, session: &StreamSession, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "UPDATE stream_sessions
             SET ended_at = $2, peak_concurrent = $3
             WHERE id = $1",
        )
        .bind(session.id.as_str())
        .bind(session.ended_at)
        .bind(session.peak_concurrent)
        .execute(executor)
        .await?;
        Ok(())
    }

    fn row_to_session(row: &PgRow) -> Result<StreamSession> {
        let manifests: Json<Vec<RenditionManifest>> = row.try_get("rendition_manifests")?;
        Ok(StreamSession {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            renditions: row.try_get("renditions")?,
            peak_concurrent: row.try_get("peak_concurrent")?,
            origin_url: row.try_get("origin_url")?,
            playback_url: row.try_get("playback_url")?,
            ingest_endpoints: row.try_get("ingest_endpoints")?,
            ingest_job_ids: row.try_get("ingest_job_ids")?,
            rendition_manifests: manifests.0,
        })
    }
}
