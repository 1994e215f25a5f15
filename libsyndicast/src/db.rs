//! Database operations for Syndicast
//!
//! Wraps a SQLite pool with the queries the pipeline needs. Job claiming
//! is a conditional update: the transition `pending -> processing` only
//! succeeds if the row is still `pending`, so overlapping drain ticks
//! cannot double-claim a job.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result, SyndicastError};
use crate::types::{
    Connection, ConnectionStatus, JobStatus, Platform, PlatformResult, Post, PostStatus,
    PublishJob, RefreshJob,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    ///
    /// Capped to one connection: every pooled connection to
    /// `sqlite::memory:` would otherwise get its own empty database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Insert or replace the connection for (user, platform).
    ///
    /// A re-authorization overwrites the previous credential set; the
    /// unique constraint keeps one row per pair.
    pub async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO social_connections (
                id, user_id, platform, access_token, refresh_token, token_expires_at,
                platform_user_id, platform_username, display_name, scopes, metadata,
                status, last_used_at, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                platform_user_id = excluded.platform_user_id,
                platform_username = excluded.platform_username,
                display_name = excluded.display_name,
                scopes = excluded.scopes,
                metadata = excluded.metadata,
                status = excluded.status,
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&connection.id)
        .bind(&connection.user_id)
        .bind(connection.platform.as_str())
        .bind(&connection.access_token)
        .bind(&connection.refresh_token)
        .bind(connection.token_expires_at)
        .bind(&connection.platform_user_id)
        .bind(&connection.platform_username)
        .bind(&connection.display_name)
        .bind(&connection.scopes)
        .bind(&connection.metadata)
        .bind(connection.status.as_str())
        .bind(connection.last_used_at)
        .bind(&connection.last_error)
        .bind(connection.created_at)
        .bind(connection.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>> {
        let row = sqlx::query("SELECT * FROM social_connections WHERE id = ?")
            .bind(connection_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(row_to_connection).transpose()
    }

    pub async fn get_connection_for(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<Connection>> {
        let row =
            sqlx::query("SELECT * FROM social_connections WHERE user_id = ? AND platform = ?")
                .bind(user_id)
                .bind(platform.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        row.map(row_to_connection).transpose()
    }

    /// The connection to publish through, if the user has a usable one
    pub async fn active_connection(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<Connection>> {
        let row = sqlx::query(
            "SELECT * FROM social_connections WHERE user_id = ? AND platform = ? AND status = 'active'",
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(row_to_connection).transpose()
    }

    /// Replace tokens after a successful exchange or refresh and reset the
    /// connection to active.
    pub async fn update_connection_tokens(
        &self,
        connection_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE social_connections
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?,
                status = 'active',
                last_error = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(connection_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn set_connection_status(
        &self,
        connection_id: &str,
        status: ConnectionStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE social_connections SET status = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .bind(connection_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Terminal refresh failure: the platform is unusable until the user
    /// re-authorizes. Tokens are retained in case the access token is
    /// still valid until natural expiry.
    pub async fn expire_connection(&self, connection_id: &str, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE social_connections
            SET status = 'expired', last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .bind(connection_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn touch_connection(&self, connection_id: &str) -> Result<()> {
        sqlx::query("UPDATE social_connections SET last_used_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(connection_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Explicit disconnect
    pub async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM social_connections WHERE id = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Active connections whose tokens expire at or before `cutoff`.
    ///
    /// Connections without a refresh token are excluded: the proactive
    /// path cannot do anything for them and they stay usable until
    /// natural expiry.
    pub async fn connections_expiring_before(&self, cutoff: i64) -> Result<Vec<Connection>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM social_connections
            WHERE status = 'active'
              AND token_expires_at IS NOT NULL
              AND token_expires_at <= ?
              AND refresh_token IS NOT NULL
            ORDER BY token_expires_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_connection).collect()
    }

    // ========================================================================
    // Posts
    // ========================================================================

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, user_id, content, target_platforms, published_platforms,
                platform_results, status, scheduled_at, metadata, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.content)
        .bind(encode_json(&post.target_platforms)?)
        .bind(encode_json(&post.published_platforms)?)
        .bind(encode_json(&post.platform_results)?)
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(&post.metadata)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(row_to_post).transpose()
    }

    pub async fn update_post_status(&self, post_id: &str, status: PostStatus) -> Result<()> {
        sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Persist the rolled-up per-platform outcome of a post
    pub async fn update_post_results(
        &self,
        post_id: &str,
        published_platforms: &[Platform],
        platform_results: &BTreeMap<Platform, PlatformResult>,
        status: PostStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET published_platforms = ?, platform_results = ?, status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(encode_json(&published_platforms)?)
        .bind(encode_json(platform_results)?)
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Scheduled posts whose time has come
    pub async fn scheduled_posts_due(&self, now: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_post).collect()
    }

    // ========================================================================
    // Posting queue
    // ========================================================================

    pub async fn create_publish_job(&self, job: &PublishJob) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO posting_queue (
                post_id, platform, connection_id, status, attempts, last_error,
                next_attempt_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.post_id)
        .bind(job.platform.as_str())
        .bind(&job.connection_id)
        .bind(job.status.as_str())
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.next_attempt_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// A non-terminal job for (post, platform), if one exists.
    ///
    /// This is the duplicate-insert check that keeps the queueing pass
    /// idempotent.
    pub async fn find_open_publish_job(
        &self,
        post_id: &str,
        platform: Platform,
    ) -> Result<Option<PublishJob>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM posting_queue
            WHERE post_id = ? AND platform = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(post_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(row_to_publish_job).transpose()
    }

    /// Pending jobs eligible to run, oldest first
    pub async fn due_publish_jobs(&self, now: i64, limit: u32) -> Result<Vec<PublishJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posting_queue
            WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_publish_job).collect()
    }

    /// Claim a job for processing. Returns false if another worker won.
    pub async fn claim_publish_job(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posting_queue SET status = 'processing', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn complete_publish_job(&self, job_id: i64, attempts: i32) -> Result<()> {
        sqlx::query(
            "UPDATE posting_queue SET status = 'completed', attempts = ?, last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(attempts)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn requeue_publish_job(
        &self,
        job_id: i64,
        attempts: i32,
        last_error: &str,
        next_attempt_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue
            SET status = 'pending', attempts = ?, last_error = ?, next_attempt_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts)
        .bind(last_error)
        .bind(next_attempt_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn fail_publish_job(&self, job_id: i64, attempts: i32, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posting_queue
            SET status = 'failed', attempts = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts)
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn publish_jobs_for_post(&self, post_id: &str) -> Result<Vec<PublishJob>> {
        let rows = sqlx::query("SELECT * FROM posting_queue WHERE post_id = ? ORDER BY id ASC")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_publish_job).collect()
    }

    // ========================================================================
    // Token refresh queue
    // ========================================================================

    pub async fn create_refresh_job(&self, job: &RefreshJob) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_refresh_queue (
                connection_id, status, attempts, last_error, next_attempt_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.connection_id)
        .bind(job.status.as_str())
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.next_attempt_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Whether a non-terminal refresh job already exists for the connection
    pub async fn open_refresh_job_exists(&self, connection_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM token_refresh_queue
            WHERE connection_id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get::<i64, _>("n") > 0)
    }

    pub async fn due_refresh_jobs(&self, now: i64, limit: u32) -> Result<Vec<RefreshJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM token_refresh_queue
            WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_refresh_job).collect()
    }

    pub async fn claim_refresh_job(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE token_refresh_queue SET status = 'processing', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn complete_refresh_job(&self, job_id: i64, attempts: i32) -> Result<()> {
        sqlx::query(
            "UPDATE token_refresh_queue SET status = 'completed', attempts = ?, last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(attempts)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn requeue_refresh_job(
        &self,
        job_id: i64,
        attempts: i32,
        last_error: &str,
        next_attempt_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE token_refresh_queue
            SET status = 'pending', attempts = ?, last_error = ?, next_attempt_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts)
        .bind(last_error)
        .bind(next_attempt_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn fail_refresh_job(&self, job_id: i64, attempts: i32, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE token_refresh_queue
            SET status = 'failed', attempts = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts)
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_refresh_job(&self, job_id: i64) -> Result<Option<RefreshJob>> {
        let row = sqlx::query("SELECT * FROM token_refresh_queue WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(row_to_refresh_job).transpose()
    }

    pub async fn refresh_jobs_for_connection(&self, connection_id: &str) -> Result<Vec<RefreshJob>> {
        let rows =
            sqlx::query("SELECT * FROM token_refresh_queue WHERE connection_id = ? ORDER BY id ASC")
                .bind(connection_id)
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_refresh_job).collect()
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| SyndicastError::InvalidInput(format!("JSON encode failed: {}", e)))
}

fn parse_platform(raw: String) -> Result<Platform> {
    Platform::from_str(&raw).map_err(SyndicastError::InvalidInput)
}

fn row_to_connection(row: SqliteRow) -> Result<Connection> {
    Ok(Connection {
        id: row.get("id"),
        user_id: row.get("user_id"),
        platform: parse_platform(row.get("platform"))?,
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        token_expires_at: row.get("token_expires_at"),
        platform_user_id: row.get("platform_user_id"),
        platform_username: row.get("platform_username"),
        display_name: row.get("display_name"),
        scopes: row.get("scopes"),
        metadata: row.get("metadata"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(ConnectionStatus::Error),
        last_used_at: row.get("last_used_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_post(row: SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.get("id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        target_platforms: serde_json::from_str(&row.get::<String, _>("target_platforms"))
            .unwrap_or_default(),
        published_platforms: serde_json::from_str(&row.get::<String, _>("published_platforms"))
            .unwrap_or_default(),
        platform_results: serde_json::from_str(&row.get::<String, _>("platform_results"))
            .unwrap_or_default(),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(PostStatus::Pending),
        scheduled_at: row.get("scheduled_at"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_publish_job(row: SqliteRow) -> Result<PublishJob> {
    Ok(PublishJob {
        id: Some(row.get("id")),
        post_id: row.get("post_id"),
        platform: parse_platform(row.get("platform"))?,
        connection_id: row.get("connection_id"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(JobStatus::Pending),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        next_attempt_at: row.get("next_attempt_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_refresh_job(row: SqliteRow) -> Result<RefreshJob> {
    Ok(RefreshJob {
        id: Some(row.get("id")),
        connection_id: row.get("connection_id"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(JobStatus::Pending),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        next_attempt_at: row.get("next_attempt_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
