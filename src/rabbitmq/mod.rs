// src/rabbitmq/mod.rs
// Broker-backed request/response over RabbitMQ

pub mod errors;
pub mod envelope;
pub mod transport;
pub mod connection;
pub mod registry;
pub mod dispatcher;
pub mod client;
pub mod worker;

// Re-export specific items to simplify imports elsewhere
pub use client::RpcClient;
pub use connection::BrokerConnection;
pub use dispatcher::ReplyDispatcher;
pub use envelope::{Envelope, ReplyDelivery, JSON_CONTENT_TYPE};
pub use errors::{Result, RpcError};
pub use registry::PendingCallRegistry;
pub use transport::{Transport, TransportPtr};
pub use worker::ReplyWorker;
