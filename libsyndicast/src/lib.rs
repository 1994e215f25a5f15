//! Syndicast - multi-platform publishing pipeline
//!
//! This library keeps per-user OAuth connections healthy (encrypted
//! storage, proactive refresh) and reliably delivers posts to each
//! target platform through a durable queue with bounded retries and
//! partial-failure accounting.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod oauth;
pub mod publishers;
pub mod queue;
pub mod refresh;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{Result, SyndicastError};
pub use oauth::OAuthCoordinator;
pub use queue::PublishingQueue;
pub use refresh::RefreshScheduler;
pub use types::{Connection, Platform, Post, PostStatus};
pub use vault::TokenVault;
