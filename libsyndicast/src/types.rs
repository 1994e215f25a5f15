//! Core types for Syndicast

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Destination platforms a post can target.
///
/// Platform-specific OAuth quirks live in [`crate::oauth::providers`];
/// this enum is only the identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    LinkedIn,
    Facebook,
    Instagram,
    Reddit,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Twitter,
        Platform::LinkedIn,
        Platform::Facebook,
        Platform::Instagram,
        Platform::Reddit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::LinkedIn => "linkedin",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Reddit => "reddit",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::LinkedIn),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "reddit" => Ok(Platform::Reddit),
            _ => Err(format!("Unknown platform: '{}'", s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a stored OAuth connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Tokens stored and believed usable
    Active,
    /// Transient failure recorded, not yet terminal
    Error,
    /// Refresh retries exhausted; unusable until the user re-authorizes
    Expired,
    /// Explicitly disconnected by the user
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Revoked => "revoked",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConnectionStatus::Active),
            "error" => Ok(ConnectionStatus::Error),
            "expired" => Ok(ConnectionStatus::Expired),
            "revoked" => Ok(ConnectionStatus::Revoked),
            _ => Err(format!("Unknown connection status: '{}'", s)),
        }
    }
}

/// Stored OAuth credential set for one (user, platform) pair.
///
/// Token fields hold vault envelopes, never plaintext. At most one
/// connection exists per (user, platform); the database enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub platform_user_id: Option<String>,
    pub platform_username: Option<String>,
    pub display_name: Option<String>,
    pub scopes: Option<String>,
    pub metadata: Option<String>,
    pub status: ConnectionStatus,
    pub last_used_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Connection {
    pub fn new(user_id: String, platform: Platform, access_token: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            platform,
            access_token,
            refresh_token: None,
            token_expires_at: None,
            platform_user_id: None,
            platform_username: None,
            display_name: None,
            scopes: None,
            metadata: None,
            status: ConnectionStatus::Active,
            last_used_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregate status of a logical post across its target platforms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Publishing,
    Published,
    Partial,
    Failed,
    Scheduled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Partial => "partial",
            PostStatus::Failed => "failed",
            PostStatus::Scheduled => "scheduled",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "partial" => Ok(PostStatus::Partial),
            "failed" => Ok(PostStatus::Failed),
            "scheduled" => Ok(PostStatus::Scheduled),
            _ => Err(format!("Unknown post status: '{}'", s)),
        }
    }
}

/// Outcome of one platform's delivery attempt, kept on the post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformResult {
    pub success: bool,
    pub remote_id: Option<String>,
    pub url: Option<String>,
    pub error: Option<String>,
    pub timestamp: i64,
}

impl PlatformResult {
    pub fn succeeded(remote_id: String, url: Option<String>) -> Self {
        Self {
            success: true,
            remote_id: Some(remote_id),
            url,
            error: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            remote_id: None,
            url: None,
            error: Some(error),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// One logical content item targeting N platforms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub target_platforms: Vec<Platform>,
    pub published_platforms: Vec<Platform>,
    pub platform_results: BTreeMap<Platform, PlatformResult>,
    pub status: PostStatus,
    pub scheduled_at: Option<i64>,
    pub metadata: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(user_id: String, content: String, target_platforms: Vec<Platform>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            content,
            target_platforms,
            published_platforms: Vec::new(),
            platform_results: BTreeMap::new(),
            status: PostStatus::Pending,
            scheduled_at: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scheduled(
        user_id: String,
        content: String,
        target_platforms: Vec<Platform>,
        scheduled_at: i64,
    ) -> Self {
        let mut post = Self::new(user_id, content, target_platforms);
        post.scheduled_at = Some(scheduled_at);
        post.status = PostStatus::Scheduled;
        post
    }
}

/// Compute a post's aggregate status from its per-platform results.
///
/// A target platform is terminal once it has an entry in the result map
/// (success, terminal publish failure, or skipped at queueing for lack of
/// a connection). Targets without an entry still have work in flight, so
/// the post stays `publishing` and is never prematurely `failed`.
pub fn aggregate_status(
    target_platforms: &[Platform],
    platform_results: &BTreeMap<Platform, PlatformResult>,
) -> PostStatus {
    if target_platforms.is_empty() {
        return PostStatus::Failed;
    }

    let mut succeeded = 0usize;
    let mut terminal = 0usize;
    for platform in target_platforms {
        if let Some(result) = platform_results.get(platform) {
            terminal += 1;
            if result.success {
                succeeded += 1;
            }
        }
    }

    if terminal < target_platforms.len() {
        return PostStatus::Publishing;
    }
    if succeeded == target_platforms.len() {
        PostStatus::Published
    } else if succeeded > 0 {
        PostStatus::Partial
    } else {
        PostStatus::Failed
    }
}

/// Status of a queued unit of work (publish attempt or token refresh)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal jobs are never re-claimed
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: '{}'", s)),
        }
    }
}

/// One queued delivery of a post to a single platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: Option<i64>,
    pub post_id: String,
    pub platform: Platform,
    pub connection_id: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PublishJob {
    pub fn new_pending(post_id: String, platform: Platform, connection_id: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: None,
            post_id,
            platform,
            connection_id,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One queued proactive token refresh for a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshJob {
    pub id: Option<i64>,
    pub connection_id: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RefreshJob {
    pub fn new_pending(connection_id: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: None,
            connection_id,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trend item from the news subsystem, carried only as post metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trend {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: i64,
}
