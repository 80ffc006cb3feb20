//! Delivery loop that feeds events to a handler.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::StreamResult;
use crate::channel::StreamConsumer;
use crate::event::StreamEvent;

/// Receives events from [`deliver`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// A returned error is logged and delivery continues with the next event.
    async fn handle(&self, event: &StreamEvent) -> StreamResult<()>;
}

/// Counters reported when delivery finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Events handed to the handler.
    pub delivered: u64,
    /// Events the handler rejected.
    pub handler_errors: u64,
    /// Whether a `done` event was observed.
    pub completed: bool,
}

/// Drains `consumer` into `handler` until the stream ends, is cancelled, or a
/// `done` event has been handled.
pub async fn deliver(mut consumer: StreamConsumer, handler: &dyn EventHandler) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    while let Some(event) = consumer.next().await {
        stats.delivered += 1;
        if let Err(error) = handler.handle(&event).await {
            stats.handler_errors += 1;
            warn!(%error, event = event.kind().label(), "event handler failed; continuing");
        }
        if event.is_done() {
            stats.completed = true;
            break;
        }
    }
    debug!(
        delivered = stats.delivered,
        handler_errors = stats.handler_errors,
        completed = stats.completed,
        "event delivery finished"
    );
    stats
}
