use sqlx::{postgres::PgRow, PgExecutor, PgPool, Row};

use crate::{
    models::{Channel, ChannelId, ChannelListQuery, LiveState},
    Result,
};

const CHANNEL_COLUMNS: &str = "id, owner_id, stream_key, title, category, tags, live_state, \
                               current_session_id, created_at, updated_at";

/// Channel repository for database operations
#[derive(Clone)]
pub struct ChannelRepository {
    pool: PgPool,
}

impl ChannelRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new channel using a provided executor (pool or transaction)
    pub async fn insert_with_executor<'e, E>(&self, channel: &Channel, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO channels (id, owner_id, stream_key, title, category, tags, live_state,
                                   current_session_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(channel.id.as_str())
        .bind(channel.owner_id.as_str())
        .bind(&channel.stream_key)
        .bind(&channel.title)
        .bind(&channel.category)
        .bind(&channel.tags)
        .bind(channel.live_state.as_str())
        .bind(channel.current_session_id.as_ref().map(|id| id.as_str()))
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Get channel by ID
    pub async fn get(&self, id: &ChannelId) -> Result<Option<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_channel).transpose()
    }

    /// Get channel by ID and lock the row until the transaction ends
    pub async fn get_for_update_with_executor<'e, E>(&self, id: &ChannelId, executor: E) -> Result<Option<Channel>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(Self::row_to_channel).transpose()
    }

    pub async fn get_by_stream_key(&self, stream_key: &str) -> Result<Option<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE stream_key = $1");
        let row = sqlx::query(&sql)
            .bind(stream_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_channel).transpose()
    }

    /// List channels, live first, then oldest first
    pub async fn list(&self, query: &ChannelListQuery) -> Result<Vec<Channel>> {
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS}
             FROM channels
             WHERE ($1::TEXT IS NULL OR owner_id = $1)
               AND ($2 = ''
                    OR strpos(lower(title), $2) > 0
                    OR EXISTS (SELECT 1 FROM unnest(tags) AS tag WHERE strpos(lower(tag), $2) > 0))
             ORDER BY (live_state = 'live') DESC, created_at ASC, id COLLATE \"C\" ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(query.owner_id.as_ref().map(|id| id.as_str()))
            .bind(query.needle())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_channel).collect()
    }

    /// Write back every mutable column
    pub async fn save_with_executor<'e, E>(&self, channel: &Channel, executor: E) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "UPDATE channels
             SET stream_key = $2, title = $3, category = $4, tags = $5, live_state = $6,
                 current_session_id = $7, updated_at = $8
             WHERE id = $1",
        )
        .bind(channel.id.as_str())
        .bind(&channel.stream_key)
        .bind(&channel.title)
        .bind(&channel.category)
        .bind(&channel.tags)
        .bind(channel.live_state.as_str())
        .bind(channel.current_session_id.as_ref().map(|id| id.as_str()))
        .bind(channel.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Hard delete; sessions, recordings and clips go with it via `ON DELETE CASCADE`
    pub async fn delete_with_executor<'e, E>(&self, id: &ChannelId, executor: E) -> Result<bool>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(id.as_str())
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn row_to_channel(row: &PgRow) -> Result<Channel> {
        let live_state: String = row.try_get("live_state")?;
        Ok(Channel {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            stream_key: row.try_get("stream_key")?,
            title: row.try_get("title")?,
            category: row.try_get("category")?,
            tags: row.try_get("tags")?,
            live_state: live_state.parse::<LiveState>()?,
            current_session_id: row.try_get("current_session_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
