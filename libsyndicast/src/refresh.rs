//! Proactive token refresh scheduler
//!
//! A sweep enqueues a refresh job for every active connection whose
//! expiry falls inside the buffer window, then claims and processes due
//! jobs sequentially. Jobs retry a bounded number of times with a fixed
//! delay; the terminal failure marks the connection expired so future
//! posts stop targeting it until the user re-authorizes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RefreshConfig;
use crate::db::Database;
use crate::error::{OAuthError, Result, SyndicastError};
use crate::oauth::OAuthCoordinator;
use crate::types::{Connection, RefreshJob};
use crate::vault::needs_refresh;

pub struct RefreshScheduler {
    db: Database,
    coordinator: Arc<OAuthCoordinator>,
    config: RefreshConfig,
}

impl RefreshScheduler {
    pub fn new(db: Database, coordinator: Arc<OAuthCoordinator>, config: RefreshConfig) -> Self {
        Self {
            db,
            coordinator,
            config,
        }
    }

    /// One sweep tick: enqueue connections nearing expiry, then process
    /// due jobs. Returns the number of jobs processed.
    pub async fn sweep(&self) -> Result<usize> {
        self.enqueue_due_connections().await?;
        self.process_due_jobs().await
    }

    /// Idempotent enqueue: a connection with a non-terminal refresh job
    /// is never queued twice.
    async fn enqueue_due_connections(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() + self.config.buffer_minutes * 60;
        let expiring = self.db.connections_expiring_before(cutoff).await?;

        let mut enqueued = 0;
        for connection in expiring {
            if self.db.open_refresh_job_exists(&connection.id).await? {
                continue;
            }

            let job = RefreshJob::new_pending(connection.id.clone());
            self.db.create_refresh_job(&job).await?;
            enqueued += 1;
            debug!(
                "Queued token refresh for connection {} ({})",
                connection.id, connection.platform
            );
        }

        if enqueued > 0 {
            info!("Queued {} token refresh job(s)", enqueued);
        }
        Ok(enqueued)
    }

    async fn process_due_jobs(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let jobs = self.db.due_refresh_jobs(now, self.config.batch_size).await?;

        let mut processed = 0;
        for job in jobs {
            let job_id = match job.id {
                Some(id) => id,
                None => continue,
            };
            if !self.db.claim_refresh_job(job_id).await? {
                // Another worker won the claim
                continue;
            }

            self.process_job(job_id, &job).await?;
            processed += 1;
        }

        Ok(processed)
    }

    async fn process_job(&self, job_id: i64, job: &RefreshJob) -> Result<()> {
        let attempts = job.attempts + 1;

        match self.coordinator.refresh(&job.connection_id).await {
            Ok(()) => {
                self.db.complete_refresh_job(job_id, attempts).await?;
                info!(
                    "Refresh job {} completed for connection {} (attempt {})",
                    job_id, job.connection_id, attempts
                );
                Ok(())
            }
            Err(SyndicastError::OAuth(OAuthError::NoRefreshToken)) => {
                // Nothing to retry with; the access token stays usable
                // until natural expiry, so the connection is left as-is.
                warn!(
                    "Refresh job {} has no refresh token for connection {}",
                    job_id, job.connection_id
                );
                self.db
                    .fail_refresh_job(job_id, attempts, "no refresh token")
                    .await
            }
            Err(e) => {
                let message = e.to_string();
                if attempts < self.config.max_attempts {
                    let next = chrono::Utc::now().timestamp() + self.config.retry_delay_secs;
                    warn!(
                        "Refresh job {} failed (attempt {}/{}), retrying: {}",
                        job_id, attempts, self.config.max_attempts, message
                    );
                    self.db
                        .requeue_refresh_job(job_id, attempts, &message, next)
                        .await
                } else {
                    warn!(
                        "Refresh job {} exhausted {} attempts, marking connection {} expired: {}",
                        job_id, attempts, job.connection_id, message
                    );
                    self.db.fail_refresh_job(job_id, attempts, &message).await?;
                    self.db.expire_connection(&job.connection_id, &message).await
                }
            }
        }
    }

    /// Out-of-band refresh invoked by the publishing queue just before a
    /// publish attempt, so a token never expires mid-flight. Returns
    /// whether a refresh ran.
    pub async fn refresh_if_due(&self, connection: &Connection) -> Result<bool> {
        if !needs_refresh(connection.token_expires_at, self.config.buffer_minutes) {
            return Ok(false);
        }
        if connection.refresh_token.is_none() {
            // Token may still be valid until natural expiry
            return Ok(false);
        }

        self.coordinator.refresh(&connection.id).await?;
        Ok(true)
    }
}
