// src/rabbitmq/errors.rs

use serde_json::Error as SerdeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Dialing the broker failed or did not finish within the connect timeout.
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("Reply queue error: {0}")]
    QueueError(String),

    #[error("Reply consumer error: {0}")]
    ConsumeError(String),

    /// The channel or connection is closed at call time. Never waits out a timeout.
    #[error("RabbitMQ connection not available: {0}")]
    ConnectionUnavailable(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RPC request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Correlation id already registered: {0}")]
    DuplicateCorrelationId(String),

    #[error("Message serialization error: {0}")]
    SerializationError(#[from] SerdeError),
}

// Custom Result type for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// True for the per-call errors a caller may reasonably retry by calling again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Timeout(_) | RpcError::PublishError(_))
    }
}
