// Shared helpers for integration tests. Each test file pulls this in with `mod common;`.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as reply_mpsc;
use rabbit_rpc::rabbitmq::{Envelope, ReplyDelivery, Result, RpcError, Transport};
use rabbit_rpc::RpcClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const REPLY_QUEUE: &str = "amq.gen-test-reply";

/// In-memory stand-in for RabbitMQ. Published requests are handed to the
/// test; replies are pushed into the client's reply stream.
pub struct SimulatedBroker {
    connected: AtomicBool,
    fail_publish: AtomicBool,
    closed: AtomicBool,
    requests: mpsc::UnboundedSender<(String, Envelope)>,
    replies: reply_mpsc::UnboundedSender<Result<ReplyDelivery>>,
}

impl SimulatedBroker {
    pub fn reply(&self, request: &Envelope, body: &[u8]) {
        self.deliver(request.reply(body.to_vec()).into());
    }

    pub fn deliver(&self, delivery: ReplyDelivery) {
        // The stream is closed once the client shuts down; late replies just vanish.
        let _ = self.replies.unbounded_send(Ok(delivery));
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SimulatedBroker {
    async fn publish(&self, target_queue: &str, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(RpcError::ConnectionUnavailable("broker down".into()));
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RpcError::PublishError("simulated publish failure".into()));
        }
        self.requests
            .send((target_queue.to_string(), envelope.clone()))
            .map_err(|e| RpcError::PublishError(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.replies.close_channel();
        Ok(())
    }
}

pub struct Harness {
    pub client: Arc<RpcClient>,
    pub broker: Arc<SimulatedBroker>,
    pub requests: mpsc::UnboundedReceiver<(String, Envelope)>,
}

impl Harness {
    pub fn new() -> Self {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = reply_mpsc::unbounded();

        let broker = Arc::new(SimulatedBroker {
            connected: AtomicBool::new(true),
            fail_publish: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            requests: requests_tx,
            replies: replies_tx,
        });

        let client = Arc::new(RpcClient::with_transport(
            broker.clone(),
            REPLY_QUEUE.to_string(),
            replies_rx,
        ));

        Self {
            client,
            broker,
            requests,
        }
    }

    pub async fn next_request(&mut self) -> (String, Envelope) {
        self.requests
            .recv()
            .await
            .expect("client dropped while a request was expected")
    }
}
