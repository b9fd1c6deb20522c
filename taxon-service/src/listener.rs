//! Cross-instance invalidation plumbing.
//!
//! [`InvalidationBus`] carries JSON-encoded [`InvalidationEvent`]s over a
//! `tokio::sync::broadcast` channel, standing in for the real messaging
//! transport. [`InvalidationListener`] drains one subscription into
//! [`CategoryService::on_invalidation_event`].
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: notify_local_change(event)  → applied locally
//!   ↓
//! bus.publish(event as originated_elsewhere)
//!   ↓
//! Instance 2: listener decodes payload → on_invalidation_event
//! Instance 3: listener decodes payload → on_invalidation_event
//! ```

use std::sync::Arc;

use taxon_core::{InvalidationEvent, TaxonConfig, TaxonResult};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::service::CategoryService;

// ============================================================================
// BUS
// ============================================================================

/// In-process broadcast transport for invalidation payloads.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<String>,
}

impl InvalidationBus {
    /// Create a bus buffering up to `capacity` payloads per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a bus sized by `config.listener_capacity`.
    pub fn from_config(config: &TaxonConfig) -> Self {
        Self::new(config.listener_capacity)
    }

    /// Encode and broadcast `event`. Returns the number of subscribers
    /// reached; zero subscribers is not an error.
    pub fn publish(&self, event: &InvalidationEvent) -> TaxonResult<usize> {
        let payload = event.to_json()?;
        let reached = self.sender.send(payload).unwrap_or(0);
        tracing::debug!(
            entity_tag = ?event.entity_tag,
            entity_id = %event.entity_id,
            reached,
            "Published invalidation"
        );
        Ok(reached)
    }

    /// Raw payload publishing, for transports that already hold JSON.
    pub fn publish_payload(&self, payload: impl Into<String>) -> usize {
        self.sender.send(payload.into()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

// ============================================================================
// LISTENER
// ============================================================================

/// Counters reported when a listener stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerSummary {
    /// Events decoded and handed to the service.
    pub applied: u64,
    /// Payloads that could not be decoded, or whose handling failed.
    pub rejected: u64,
    /// Times the subscription fell behind and dropped payloads.
    pub lagged: u64,
}

/// Background consumer of one bus subscription.
pub struct InvalidationListener {
    service: Arc<CategoryService>,
    receiver: broadcast::Receiver<String>,
}

impl InvalidationListener {
    pub fn new(service: Arc<CategoryService>, bus: &InvalidationBus) -> Self {
        Self {
            service,
            receiver: bus.subscribe(),
        }
    }

    /// Run on a spawned task until every bus sender is dropped.
    pub fn spawn(self) -> JoinHandle<ListenerSummary> {
        tokio::spawn(self.run())
    }

    /// Drain the subscription until the channel closes.
    ///
    /// A lagging subscription has missed invalidations it can never see, so
    /// all cached category data is dropped before continuing.
    pub async fn run(mut self) -> ListenerSummary {
        let mut summary = ListenerSummary::default();
        tracing::info!("Invalidation listener started");

        loop {
            match self.receiver.recv().await {
                Ok(payload) => match self.handle(&payload).await {
                    Ok(()) => summary.applied += 1,
                    Err(e) => {
                        summary.rejected += 1;
                        tracing::warn!(error = %e, "Invalidation payload rejected");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    summary.lagged += 1;
                    tracing::warn!(skipped, "Invalidation listener lagged, dropping caches");
                    self.service.invalidate_everything();
                }
                Err(RecvError::Closed) => {
                    tracing::info!(
                        applied = summary.applied,
                        rejected = summary.rejected,
                        lagged = summary.lagged,
                        "Invalidation listener stopped"
                    );
                    return summary;
                }
            }
        }
    }

    async fn handle(&self, payload: &str) -> TaxonResult<()> {
        let event = InvalidationEvent::from_json(payload)?;
        self.service.on_invalidation_event(&event).await?;
        Ok(())
    }
}
