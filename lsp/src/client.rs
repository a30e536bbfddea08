//! Delivery client: gets aggregated diagnostics to the reconciler.
//!
//! Two lanes with different guarantees:
//!
//! - **streamed** (`stream_one`): one `diagnostics/append` request per record,
//!   retried with exponential backoff, waiting briefly for the transport to
//!   become ready first. Exhausted retries are logged and dropped; the record
//!   still lives in the aggregator and comes back with the next flush.
//! - **snapshot** (`snapshot_all`): one `diagnostics/replace` notification,
//!   no retry. Replacement is idempotent on the far side.
//!
//! Readiness is per client: `Uninitialized` moves once to `Ready` or
//! `Failed` and never back.

use std::sync::Arc;
use std::time::Duration;

use lintbridge_core::{DeliveryError, DiagnosticSink};
use lintbridge_types::{ClearResource, ResourceId, ResourceSnapshot, StreamedRecord};
use tokio::sync::watch;

use crate::protocol::{METHOD_APPEND, METHOD_CLEAR, METHOD_REPLACE};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Attempts per streamed record, including the first.
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further failure.
    pub backoff_base: Duration,
    /// How long a streamed record waits for an uninitialized transport.
    pub ready_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_millis(100),
            ready_timeout: Duration::from_secs(5),
        }
    }
}

impl DeliveryConfig {
    /// Delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Ready,
    Failed(String),
}

impl TransportState {
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

struct Inner<T> {
    transport: T,
    config: DeliveryConfig,
    state: watch::Sender<TransportState>,
    in_flight: watch::Sender<usize>,
}

/// Cheap to clone; clones share transport, state, and in-flight tracking.
pub struct DeliveryClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DeliveryClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T, config: DeliveryConfig) -> Self {
        let (state, _) = watch::channel(TransportState::Uninitialized);
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                in_flight,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.inner.state.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Run the transport handshake and record the outcome.
    pub async fn initialize(&self, root_uri: &str) -> Result<(), TransportError> {
        let result = self.inner.transport.initialize(root_uri).await;
        let next = match &result {
            Ok(()) => TransportState::Ready,
            Err(e) => TransportState::Failed(e.to_string()),
        };
        if self.settle(next) {
            match &result {
                Ok(()) => tracing::info!("Delivery transport ready"),
                Err(e) => tracing::warn!("Delivery transport failed to initialize: {e}"),
            }
        }
        result
    }

    /// Mark the transport failed without a handshake (e.g. the peer died).
    pub fn mark_failed(&self, reason: impl Into<String>) {
        if self.settle(TransportState::Failed(reason.into())) {
            tracing::warn!("Delivery transport marked failed");
        }
    }

    fn settle(&self, next: TransportState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = next;
            true
        })
    }

    async fn wait_ready(&self) {
        let mut rx = self.inner.state.subscribe();
        if rx.borrow().is_settled() {
            return;
        }
        let wait = rx.wait_for(TransportState::is_settled);
        if tokio::time::timeout(self.inner.config.ready_timeout, wait)
            .await
            .is_err()
        {
            tracing::debug!("Transport still uninitialized, sending anyway");
        }
    }

    /// Deliver one record with retry. Never fails; exhausted retries are logged.
    pub async fn stream_one(&self, update: StreamedRecord) {
        self.wait_ready().await;

        let resource_id = update.resource_id.clone();
        let params = match serde_json::to_value(&update) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(uri = %resource_id, "Cannot encode diagnostic: {e}");
                return;
            }
        };

        let max_attempts = self.inner.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self
                .inner
                .transport
                .request(METHOD_APPEND, params.clone())
                .await
            {
                Ok(_) => {
                    tracing::debug!(uri = %resource_id, attempt, "Diagnostic delivered");
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.inner.config.backoff(attempt);
                    tracing::debug!(
                        uri = %resource_id,
                        attempt,
                        "Delivery failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        uri = %resource_id,
                        attempts = max_attempts,
                        "Giving up on diagnostic delivery: {e}"
                    );
                }
            }
        }
    }

    /// Replace the reconciler's list for one resource. One attempt.
    pub fn snapshot_all(&self, snapshot: ResourceSnapshot) -> Result<(), DeliveryError> {
        let params = serde_json::to_value(&snapshot)
            .map_err(|e| DeliveryError::new(snapshot.resource_id.clone(), e.to_string()))?;
        self.inner
            .transport
            .notify(METHOD_REPLACE, params)
            .map_err(|e| DeliveryError::new(snapshot.resource_id, e.to_string()))
    }

    /// Ask the reconciler to drop one resource, or all of them.
    pub fn clear_remote(&self, resource_id: Option<ResourceId>) -> Result<(), TransportError> {
        let params = serde_json::to_value(ClearResource { resource_id })?;
        self.inner.transport.notify(METHOD_CLEAR, params)
    }

    /// Number of streamed deliveries still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Wait until every spawned streamed delivery has finished.
    pub async fn idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Decrements the in-flight count even if the delivery task is cancelled.
struct InFlight(watch::Sender<usize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl<T: Transport> DiagnosticSink for DeliveryClient<T> {
    /// Spawns the retrying delivery; requires a tokio runtime.
    fn stream(&self, update: StreamedRecord) {
        self.inner.in_flight.send_modify(|n| *n += 1);
        let guard = InFlight(self.inner.in_flight.clone());
        let client = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            client.stream_one(update).await;
        });
    }

    fn snapshot(&self, snapshot: ResourceSnapshot) -> Result<(), DeliveryError> {
        self.snapshot_all(snapshot)
    }
}
