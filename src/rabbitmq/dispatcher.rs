use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::envelope::ReplyDelivery;
use super::errors::Result;
use super::registry::PendingCallRegistry;

/// Background task that reads the reply stream and hands each body to the
/// call waiting on its correlation id.
pub struct ReplyDispatcher {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ReplyDispatcher {
    /// Spawns the routing loop onto the current tokio runtime.
    pub fn spawn<S>(replies: S, registry: Arc<PendingCallRegistry>) -> Self
    where
        S: Stream<Item = Result<ReplyDelivery>> + Send + 'static,
    {
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::run(replies, registry, stop_rx));
        Self {
            stop: Some(stop),
            handle,
        }
    }

    async fn run<S>(
        replies: S,
        registry: Arc<PendingCallRegistry>,
        mut stop_rx: oneshot::Receiver<()>,
    ) where
        S: Stream<Item = Result<ReplyDelivery>> + Send + 'static,
    {
        info!("Reply dispatcher started");
        let mut replies = Box::pin(replies);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    debug!("Reply dispatcher received stop signal");
                    break;
                }
                next = replies.next() => match next {
                    Some(Ok(delivery)) => route(&registry, delivery),
                    Some(Err(e)) => warn!("Error receiving reply: {}", e),
                    None => {
                        warn!("Reply stream closed");
                        break;
                    }
                },
            }
        }

        info!("Reply dispatcher stopped");
    }

    /// Signals the loop to exit and waits for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!("Reply dispatcher task ended abnormally: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Routes one delivery. Never blocks: the sink is a single-slot channel.
pub fn route(registry: &PendingCallRegistry, delivery: ReplyDelivery) {
    let Some(correlation_id) = delivery.correlation_id else {
        warn!("Discarding reply without correlation id");
        return;
    };

    match registry.take_if_present(&correlation_id) {
        Some(call) => {
            let waited = call.registered_at.elapsed();
            if call.sink.send(delivery.body).is_err() {
                // Caller went away between our lookup and the send.
                debug!(correlation_id = %correlation_id, "Reply receiver already dropped");
            } else {
                debug!(correlation_id = %correlation_id, ?waited, "Reply routed");
            }
        }
        None => {
            warn!(correlation_id = %correlation_id, "Received reply for unknown correlation id");
        }
    }
}
