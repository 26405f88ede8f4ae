use futures::stream::Stream;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::BrokerConnection;
use super::dispatcher::ReplyDispatcher;
use super::envelope::{Envelope, ReplyDelivery};
use super::errors::{Result, RpcError};
use super::registry::{lock_ignore_poison, PendingCallRegistry, Registration};
use super::transport::TransportPtr;
use crate::config::RpcConfig;

/// Synchronous request/response over a broker.
///
/// One client owns one session, one reply queue and one dispatcher task;
/// any number of `call`s may run against it concurrently. Share it behind
/// an `Arc`.
pub struct RpcClient {
    transport: TransportPtr,
    reply_queue: String,
    registry: Arc<PendingCallRegistry>,
    dispatcher: Mutex<Option<ReplyDispatcher>>,
    closed: AtomicBool,
}

impl RpcClient {
    /// Opens the broker session, declares the reply queue and starts the
    /// reply dispatcher. Any failure closes what was opened and is returned.
    pub async fn connect(config: &RpcConfig) -> Result<Self> {
        let connection = BrokerConnection::open(
            &config.amqp_uri,
            &config.connection_name,
            config.connect_timeout(),
        )
        .await?;

        let reply_queue = match connection.declare_reply_queue().await {
            Ok(name) => name,
            Err(e) => {
                connection.close_quietly().await;
                return Err(e);
            }
        };

        let replies = match connection.consume_replies(&reply_queue).await {
            Ok(replies) => replies,
            Err(e) => {
                connection.close_quietly().await;
                return Err(e);
            }
        };

        Ok(Self::with_transport(Arc::new(connection), reply_queue, replies))
    }

    /// Assembles a client from an already open transport and the stream of
    /// deliveries arriving on `reply_queue`. Must be called inside a tokio runtime.
    pub fn with_transport<S>(transport: TransportPtr, reply_queue: String, replies: S) -> Self
    where
        S: Stream<Item = Result<ReplyDelivery>> + Send + 'static,
    {
        let registry = Arc::new(PendingCallRegistry::new());
        let dispatcher = ReplyDispatcher::spawn(replies, registry.clone());

        Self {
            transport,
            reply_queue,
            registry,
            dispatcher: Mutex::new(Some(dispatcher)),
            closed: AtomicBool::new(false),
        }
    }

    /// Publishes `body` to `target_queue` and waits up to `timeout` for the
    /// reply carrying the same correlation id. Publishes at most once.
    pub async fn call(
        &self,
        target_queue: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionUnavailable("RPC client is closed".to_string()));
        }
        if !self.transport.is_connected() {
            error!("RabbitMQ connection or channel is not available for call");
            return Err(RpcError::ConnectionUnavailable(
                "RabbitMQ connection not available".to_string(),
            ));
        }

        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        // Registered before publishing so an early reply always finds its
        // sink; deregistered when this future completes or is dropped.
        let registration = Registration::new(&self.registry, correlation_id.clone(), tx)?;

        // A close() that ran since the first check has already cancelled the
        // registry and stopped the dispatcher; nothing would ever fill this sink.
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionUnavailable("RPC client is closed".to_string()));
        }

        let envelope = Envelope::request(correlation_id, self.reply_queue.clone(), body);
        if let Err(e) = self.transport.publish(target_queue, &envelope).await {
            error!(
                correlation_id = %registration.id(),
                target_queue,
                "Failed to publish request: {}",
                e
            );
            return Err(e);
        }

        debug!(correlation_id = %registration.id(), ?timeout, "Waiting for reply");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                debug!(correlation_id = %registration.id(), "Received reply");
                Ok(response)
            }
            Ok(Err(_)) => Err(RpcError::ConnectionUnavailable(
                "RPC client closed while awaiting reply".to_string(),
            )),
            Err(_) => {
                warn!(correlation_id = %registration.id(), ?timeout, "Timed out waiting for reply");
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// `call` with JSON encoding of the request and decoding of the reply.
    pub async fn call_json<Req, Resp>(
        &self,
        target_queue: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let response = self.call(target_queue, payload, timeout).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    /// Stops the dispatcher, fails every outstanding call with
    /// `ConnectionUnavailable`, then closes the channel and the connection.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("RPC client already closed");
            return Ok(());
        }
        info!("Closing RPC client");

        let dispatcher = lock_ignore_poison(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop().await;
        }

        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "Cancelled outstanding calls on close");
        }

        self.transport.close().await
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
