//! Periodic reconciliation runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::service::ReconciliationService;
use crate::resilience::{ExponentialBackoffCalculator, RetryPolicy};

/// First retry delay after a failed pass.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs [`ReconciliationService::run_once`] every `interval` until cancelled.
///
/// Each pass runs on the blocking pool. After a failure the next pass comes
/// sooner, backing off exponentially with jitter up to `interval`.
#[derive(Debug)]
pub struct ReconciliationScheduler {
    service: Arc<ReconciliationService>,
    interval: Duration,
    retry: RetryPolicy,
}

impl ReconciliationScheduler {
    /// Schedule `service` every `interval`.
    #[must_use]
    pub fn new(service: Arc<ReconciliationService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            retry: RetryPolicy::bounded_by(INITIAL_RETRY_DELAY, interval),
        }
    }

    /// Override the retry policy used after failed passes.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoffCalculator::new(&self.retry);
        let mut delay = self.interval;
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Reconciliation scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let service = Arc::clone(&self.service);
            delay = match tokio::task::spawn_blocking(move || service.run_once()).await {
                Ok(Ok(_)) => {
                    backoff.reset();
                    self.interval
                }
                Ok(Err(error)) => {
                    let retry_in = backoff.next_backoff().unwrap_or(self.interval);
                    tracing::warn!(
                        error = %error,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "Scheduled reconciliation failed"
                    );
                    retry_in
                }
                Err(error) => {
                    tracing::error!(error = %error, "Reconciliation task panicked");
                    self.interval
                }
            };
        }

        tracing::info!("Reconciliation scheduler stopped");
    }
}
