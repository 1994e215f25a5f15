//! Durable publishing queue
//!
//! Converts a post into one job per connected target platform and drains
//! pending jobs through the publisher adapters. Jobs retry with an
//! increasing backoff; terminal outcomes fold into the post's
//! per-platform result map and aggregate status. One platform's failure
//! never blocks another's delivery.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::db::Database;
use crate::error::{DbError, Result, SyndicastError};
use crate::oauth::OAuthCoordinator;
use crate::publishers::{PublishCredentials, PublishOutcome, PublisherRegistry};
use crate::refresh::RefreshScheduler;
use crate::types::{aggregate_status, Platform, PlatformResult, Post, PublishJob};

/// Backoff before the next attempt after `attempts` failures: 1, 5, then
/// 15 minutes repeating.
fn backoff_delay_secs(attempts: i32) -> i64 {
    match attempts {
        1 => 60,
        2 => 300,
        _ => 900,
    }
}

pub struct PublishingQueue {
    db: Database,
    coordinator: Arc<OAuthCoordinator>,
    refresher: Arc<RefreshScheduler>,
    registry: PublisherRegistry,
    config: QueueConfig,
}

impl PublishingQueue {
    pub fn new(
        db: Database,
        coordinator: Arc<OAuthCoordinator>,
        refresher: Arc<RefreshScheduler>,
        registry: PublisherRegistry,
        config: QueueConfig,
    ) -> Self {
        Self {
            db,
            coordinator,
            refresher,
            registry,
            config,
        }
    }

    /// Create one job per target platform with an active connection.
    ///
    /// Platforms without one are skipped and recorded as a terminal
    /// failure in the post's result map, so they count against the
    /// aggregate status: such a post can reach `partial` at best.
    /// Re-running the pass is a no-op for pairs that already have a
    /// non-terminal job or a terminal result. Returns the number of jobs
    /// created.
    pub async fn enqueue_post(&self, post_id: &str) -> Result<usize> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("post {}", post_id)))?;

        let mut results = post.platform_results.clone();
        let mut created = 0;

        for platform in &post.target_platforms {
            if results.contains_key(platform) {
                continue;
            }
            if self
                .db
                .find_open_publish_job(&post.id, *platform)
                .await?
                .is_some()
            {
                continue;
            }

            match self.db.active_connection(&post.user_id, *platform).await? {
                Some(connection) => {
                    let job =
                        PublishJob::new_pending(post.id.clone(), *platform, connection.id.clone());
                    self.db.create_publish_job(&job).await?;
                    created += 1;
                }
                None => {
                    warn!(
                        "Post {} targets {} but user {} has no active connection, skipping",
                        post.id, platform, post.user_id
                    );
                    results.insert(
                        *platform,
                        PlatformResult::failed("no active connection".to_string()),
                    );
                }
            }
        }

        self.roll_up(&post, results).await?;

        if created > 0 {
            info!("Queued {} delivery job(s) for post {}", created, post.id);
        }
        Ok(created)
    }

    /// One drain tick: claim due jobs oldest-first and run them
    /// sequentially, pausing briefly between jobs so a batch does not
    /// burst a platform's rate limits. Returns the number processed.
    pub async fn drain(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let jobs = self.db.due_publish_jobs(now, self.config.batch_size).await?;

        let mut processed = 0;
        for job in jobs {
            let job_id = match job.id {
                Some(id) => id,
                None => continue,
            };

            if self.registry.get(job.platform).is_none() {
                // Deployment misconfiguration, not a platform failure:
                // leave the job pending and do not consume an attempt.
                warn!(
                    "No publisher adapter registered for {}, leaving job {} queued",
                    job.platform, job_id
                );
                continue;
            }

            if !self.db.claim_publish_job(job_id).await? {
                // Another worker won the claim
                continue;
            }

            if processed > 0 && self.config.job_pause_ms > 0 {
                sleep(Duration::from_millis(self.config.job_pause_ms)).await;
            }

            self.process_job(job_id, &job).await?;
            processed += 1;
        }

        Ok(processed)
    }

    /// Promote scheduled posts whose time has come into the queue
    pub async fn promote_due_posts(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let due = self.db.scheduled_posts_due(now).await?;

        let mut promoted = 0;
        for post in due {
            info!("Promoting scheduled post {}", post.id);
            self.enqueue_post(&post.id).await?;
            promoted += 1;
        }

        Ok(promoted)
    }

    async fn process_job(&self, job_id: i64, job: &PublishJob) -> Result<()> {
        let attempts = job.attempts + 1;

        let post = match self.db.get_post(&job.post_id).await? {
            Some(post) => post,
            None => {
                // Orphaned job; nothing to roll results into
                self.db
                    .fail_publish_job(job_id, attempts, "post no longer exists")
                    .await?;
                return Ok(());
            }
        };

        match self.attempt_publish(job, &post).await {
            Ok(outcome) => {
                self.db.complete_publish_job(job_id, attempts).await?;
                self.db.touch_connection(&job.connection_id).await?;

                let mut results = post.platform_results.clone();
                results.insert(
                    job.platform,
                    PlatformResult::succeeded(outcome.remote_id.clone(), outcome.url.clone()),
                );
                self.roll_up(&post, results).await?;

                info!(
                    "Published post {} to {} as {} (attempt {})",
                    post.id, job.platform, outcome.remote_id, attempts
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if attempts < self.config.max_attempts {
                    let next = chrono::Utc::now().timestamp() + backoff_delay_secs(attempts);
                    warn!(
                        "Publish to {} failed for post {} (attempt {}/{}), retrying: {}",
                        job.platform, post.id, attempts, self.config.max_attempts, message
                    );
                    self.db
                        .requeue_publish_job(job_id, attempts, &message, next)
                        .await
                } else {
                    warn!(
                        "Publish to {} failed permanently for post {} after {} attempts: {}",
                        job.platform, post.id, attempts, message
                    );
                    self.db.fail_publish_job(job_id, attempts, &message).await?;

                    let mut results = post.platform_results.clone();
                    results.insert(job.platform, PlatformResult::failed(message));
                    self.roll_up(&post, results).await
                }
            }
        }
    }

    /// Resolve credentials, refresh if the expiry predicate says so, and
    /// invoke the adapter. Any error here consumes one attempt.
    async fn attempt_publish(&self, job: &PublishJob, post: &Post) -> Result<PublishOutcome> {
        let mut connection = self
            .db
            .get_connection(&job.connection_id)
            .await?
            .ok_or_else(|| {
                SyndicastError::from(DbError::NotFound(format!(
                    "connection {}",
                    job.connection_id
                )))
            })?;

        if self.refresher.refresh_if_due(&connection).await? {
            // Tokens rotated; pick up the fresh envelope
            connection = self
                .db
                .get_connection(&job.connection_id)
                .await?
                .ok_or_else(|| {
                    SyndicastError::from(DbError::NotFound(format!(
                        "connection {}",
                        job.connection_id
                    )))
                })?;
        }

        let access_token = self.coordinator.decrypt_access_token(&connection)?;

        let publisher = self.registry.get(job.platform).ok_or_else(|| {
            SyndicastError::InvalidInput(format!(
                "no publisher adapter registered for {}",
                job.platform
            ))
        })?;

        let credentials = PublishCredentials {
            access_token,
            platform_user_id: connection.platform_user_id.clone(),
            metadata: connection.metadata.clone(),
        };

        publisher.publish(&credentials, &post.content).await
    }

    /// Recompute and persist the post's published list, result map, and
    /// aggregate status.
    async fn roll_up(
        &self,
        post: &Post,
        results: BTreeMap<Platform, PlatformResult>,
    ) -> Result<()> {
        let published: Vec<Platform> = post
            .target_platforms
            .iter()
            .copied()
            .filter(|platform| {
                results
                    .get(platform)
                    .map(|result| result.success)
                    .unwrap_or(false)
            })
            .collect();

        let status = aggregate_status(&post.target_platforms, &results);

        self.db
            .update_post_results(&post.id, &published, &results, status)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay_secs(1), 60);
        assert_eq!(backoff_delay_secs(2), 300);
        assert_eq!(backoff_delay_secs(3), 900);
        // Repeats the last value
        assert_eq!(backoff_delay_secs(7), 900);
    }
}
