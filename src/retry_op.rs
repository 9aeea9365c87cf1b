use std::{collections::HashSet, sync::Arc, time::Duration};

use crate::{
    cluster::{ClusterClient, ProduceRequest, RequiredAcks},
    error::ClusterError,
    executor::Executor,
    producer::ProducerStats,
};

/// retry policy applied by the background sender
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryOptions {
    /// maximum number of times a request is retried, `None` for no limit
    pub limit: Option<u32>,
    /// pause before retrying after errors that indicate an overloaded or
    /// unreachable cluster
    pub backoff: Duration,
    /// retry requests that were not acknowledged in time
    pub retry_on_timeouts: bool,
    /// reload metadata before retrying after routing errors
    pub refresh_metadata: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            limit: None,
            backoff: Duration::from_millis(300),
            retry_on_timeouts: false,
            refresh_metadata: true,
        }
    }
}

impl RetryOptions {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retry_on_timeouts(mut self, retry_on_timeouts: bool) -> Self {
        self.retry_on_timeouts = retry_on_timeouts;
        self
    }

    pub fn refresh_metadata(mut self, refresh_metadata: bool) -> Self {
        self.refresh_metadata = refresh_metadata;
        self
    }
}

/// what to do after a send attempt
#[derive(Debug, Default)]
pub(crate) struct RetryPlan {
    /// requests for the next cycle, retry counts already incremented
    pub retry: Vec<ProduceRequest>,
    /// requests given up on
    pub dropped: usize,
    pub backoff: bool,
    pub refresh_metadata: bool,
}

/// applies the retry policy to the outcome of a send
pub(crate) fn plan_retries(
    requests: Vec<ProduceRequest>,
    error: Option<&ClusterError>,
    options: &RetryOptions,
) -> RetryPlan {
    let error = match error {
        None => return RetryPlan::default(),
        Some(error) => error,
    };

    let total = requests.len();
    let candidates: Vec<ProduceRequest> = match error {
        ClusterError::FailedPayloads(failed) => {
            let failed: HashSet<usize> = failed.iter().copied().collect();
            requests
                .into_iter()
                .enumerate()
                .filter(|(i, _)| failed.contains(i))
                .map(|(_, r)| r)
                .collect()
        }
        ClusterError::RequestTimedOut if !options.retry_on_timeouts => Vec::new(),
        e if e.is_retryable() => requests,
        _ => Vec::new(),
    };

    // on a partial failure the requests that were not named went through
    let mut dropped = match error {
        ClusterError::FailedPayloads(_) => 0,
        _ => total - candidates.len(),
    };

    let mut retry = Vec::with_capacity(candidates.len());
    for request in candidates {
        match options.limit {
            Some(limit) if request.retries >= limit => {
                debug!(
                    "giving up on produce request for {} after {} retries",
                    request.destination, request.retries
                );
                dropped += 1;
            }
            _ => retry.push(request.retried()),
        }
    }

    let backoff = !retry.is_empty() && error.requires_backoff() && !options.backoff.is_zero();
    let refresh_metadata =
        !retry.is_empty() && options.refresh_metadata && error.requires_metadata_refresh();

    RetryPlan {
        retry,
        dropped,
        backoff,
        refresh_metadata,
    }
}

/// sends batches of produce requests for the background sender and decides
/// which of them go into the next cycle
pub(crate) struct Dispatcher<C: ClusterClient, Exe: Executor> {
    pub(crate) client: C,
    acks: RequiredAcks,
    ack_timeout: Duration,
    retry_options: RetryOptions,
    executor: Exe,
    stats: Arc<ProducerStats>,
}

impl<C: ClusterClient, Exe: Executor> Dispatcher<C, Exe> {
    pub fn new(
        client: C,
        acks: RequiredAcks,
        ack_timeout: Duration,
        retry_options: RetryOptions,
        executor: Exe,
        stats: Arc<ProducerStats>,
    ) -> Self {
        Dispatcher {
            client,
            acks,
            ack_timeout,
            retry_options,
            executor,
            stats,
        }
    }

    /// sends the requests and returns the ones to retry
    ///
    /// failures never escape: they are logged and turned into retry or drop
    /// decisions. May wait for the backoff delay before returning.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    pub async fn dispatch(&self, requests: Vec<ProduceRequest>) -> Vec<ProduceRequest> {
        if requests.is_empty() {
            return Vec::new();
        }

        self.stats.record_sent(requests.len());
        let result = self
            .client
            .send_produce_requests(&requests, self.acks, self.ack_timeout)
            .await;

        let error = match result {
            Ok(responses) => {
                trace!(
                    "sent {} produce requests, {} responses",
                    requests.len(),
                    responses.len()
                );
                None
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("unable to send {} produce requests: {}", requests.len(), e);
                } else {
                    error!("unable to send {} produce requests: {}", requests.len(), e);
                }
                Some(e)
            }
        };

        let plan = plan_retries(requests, error.as_ref(), &self.retry_options);
        if plan.dropped > 0 {
            warn!("dropping {} produce requests", plan.dropped);
            self.stats.record_dropped(plan.dropped);
        }
        self.stats.record_retried(plan.retry.len());

        if plan.backoff {
            warn!("doing backoff for {:?}", self.retry_options.backoff);
            self.executor.delay(self.retry_options.backoff).await;
        }

        if plan.refresh_metadata {
            debug!("refreshing cluster metadata before retrying");
            if let Err(e) = self.client.refresh_metadata().await {
                error!("could not refresh cluster metadata: {}", e);
            }
        }

        plan.retry
    }
}
