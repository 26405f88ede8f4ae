//! Synchronous RPC calls over RabbitMQ.
//!
//! [`RpcClient::call`] publishes a request with a fresh correlation id and a
//! `reply_to` pointing at a private reply queue, then waits for the matching
//! reply. A single background [`ReplyDispatcher`] reads the reply queue and
//! routes each reply to the call waiting on its correlation id.

pub mod config;
pub mod models;
pub mod rabbitmq;

pub use config::RpcConfig;
pub use rabbitmq::{Envelope, ReplyDispatcher, Result, RpcClient, RpcError};
