//! Mock publisher implementation for testing
//!
//! Configurable to succeed, fail a set number of times before
//! succeeding, or fail every attempt. Records every call so tests can
//! verify retry behavior without network access.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{PlatformError, Result};
use crate::publishers::{PublishCredentials, PublishOutcome, Publisher};
use crate::types::Platform;

pub struct MockPublisher {
    platform: Platform,
    fail_remaining: Arc<Mutex<u32>>,
    error: String,
    published: Arc<Mutex<Vec<String>>>,
    call_count: Arc<Mutex<usize>>,
}

impl MockPublisher {
    pub fn succeeding(platform: Platform) -> Self {
        Self {
            platform,
            fail_remaining: Arc::new(Mutex::new(0)),
            error: String::new(),
            published: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail the first `n` publish calls, then succeed
    pub fn failing_times(platform: Platform, n: u32, error: &str) -> Self {
        Self {
            platform,
            fail_remaining: Arc::new(Mutex::new(n)),
            error: error.to_string(),
            published: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn always_failing(platform: Platform, error: &str) -> Self {
        Self {
            platform,
            fail_remaining: Arc::new(Mutex::new(u32::MAX)),
            error: error.to_string(),
            published: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn published_content(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(
        &self,
        credentials: &PublishCredentials,
        content: &str,
    ) -> Result<PublishOutcome> {
        *self.call_count.lock().unwrap() += 1;

        if credentials.access_token.is_empty() {
            return Err(PlatformError::Authentication("empty access token".to_string()).into());
        }

        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining = remaining.saturating_sub(1);
            return Err(PlatformError::Publishing(self.error.clone()).into());
        }

        self.published.lock().unwrap().push(content.to_string());

        let remote_id = format!("{}-{}", self.platform, Uuid::new_v4());
        let url = format!("https://{}.example/posts/{}", self.platform, remote_id);
        Ok(PublishOutcome {
            remote_id,
            url: Some(url),
        })
    }
}
