use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use callgenie_core::CallBatchStatus;
use callgenie_observability::PolicyMetrics;
use reqwest::Client;
use tokio::sync::watch;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{info, instrument, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub trait CallStatusSource: Send + Sync {
    async fn fetch_status(&self, batch_id: &str) -> Result<CallBatchStatus>;
}

/// Reads batch status from the calling backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(6))
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl CallStatusSource for HttpStatusSource {
    async fn fetch_status(&self, batch_id: &str) -> Result<CallBatchStatus> {
        let url = format!("{}/calls/batch/{}/status", self.base_url, batch_id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let status = request
            .send()
            .await
            .with_context(|| format!("status request to {url} failed"))?
            .error_for_status()?
            .json::<CallBatchStatus>()
            .await
            .context("status response was not a call batch")?;

        Ok(status)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Finished(CallBatchStatus),
    /// Gave up; the caller should point the user at call history.
    TimedOut { last: Option<CallBatchStatus> },
    Cancelled { last: Option<CallBatchStatus> },
}

impl PollOutcome {
    pub fn last_status(&self) -> Option<&CallBatchStatus> {
        match self {
            PollOutcome::Finished(status) => Some(status),
            PollOutcome::TimedOut { last } | PollOutcome::Cancelled { last } => last.as_ref(),
        }
    }
}

pub struct CallStatusPoller<S> {
    source: S,
    config: PollConfig,
    metrics: Option<Arc<PolicyMetrics>>,
}

impl<S> CallStatusPoller<S>
where
    S: CallStatusSource,
{
    pub fn new(source: S, config: PollConfig) -> Self {
        Self {
            source,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PolicyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Polls until every call in the batch is terminal, the timeout passes,
    /// or `cancel` flips to `true`. Each response overwrites the previous one.
    /// The timeout and cancellation also cut short a fetch that is still in
    /// flight.
    #[instrument(skip(self, cancel))]
    pub async fn poll(&self, batch_id: &str, mut cancel: watch::Receiver<bool>) -> PollOutcome {
        let mut last: Option<CallBatchStatus> = None;
        if *cancel.borrow() {
            return PollOutcome::Cancelled { last };
        }

        let deadline = sleep_until(Instant::now() + self.config.timeout);
        tokio::pin!(deadline);

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first fetch starts now.
        ticker.tick().await;
        self.count_poll();
        let mut fetch = Some(Box::pin(self.source.fetch_status(batch_id)));
        let mut cancel_open = true;

        loop {
            tokio::select! {
                biased;

                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            info!(batch_id = %batch_id, "call status polling stopped");
                            return PollOutcome::Cancelled { last };
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        batch_id = %batch_id,
                        timeout_secs = self.config.timeout.as_secs(),
                        "call status polling timed out"
                    );
                    return PollOutcome::TimedOut { last };
                }
                result = in_flight(&mut fetch), if fetch.is_some() => {
                    fetch = None;
                    match result {
                        Ok(status) if status.is_finished() => {
                            info!(batch_id = %batch_id, calls = status.calls.len(), "call batch finished");
                            return PollOutcome::Finished(status);
                        }
                        Ok(status) => {
                            info!(batch_id = %batch_id, pending = status.pending(), "call batch in progress");
                            last = Some(status);
                        }
                        Err(error) => {
                            warn!(batch_id = %batch_id, error = %error, "call status poll failed");
                        }
                    }
                }
                _ = ticker.tick(), if fetch.is_none() => {
                    self.count_poll();
                    fetch = Some(Box::pin(self.source.fetch_status(batch_id)));
                }
            }
        }
    }

    fn count_poll(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_poll();
        }
    }
}

/// Resolves with the pending fetch, or never when there is none.
async fn in_flight<F>(fetch: &mut Option<Pin<Box<F>>>) -> F::Output
where
    F: Future,
{
    match fetch {
        Some(fetch) => fetch.as_mut().await,
        None => pending().await,
    }
}
