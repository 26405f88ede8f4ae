use async_trait::async_trait;
use std::sync::Arc;

use super::envelope::Envelope;
use super::errors::Result;

/// The outbound half of a broker session as the RPC client sees it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes `envelope` so that it is routed to `target_queue`.
    /// Must fail fast rather than block when the broker is unreachable.
    async fn publish(&self, target_queue: &str, envelope: &Envelope) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

pub type TransportPtr = Arc<dyn Transport>;
