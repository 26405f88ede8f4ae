use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use lapin::{options::*, types::FieldTable, Channel, Connection, ConnectionProperties};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::envelope::{Envelope, ReplyDelivery};
use super::errors::{Result, RpcError};
use super::transport::Transport;

/// One logical session to the broker and the single channel opened on it.
pub struct BrokerConnection {
    connection: Connection,
    channel: Channel,
}

impl BrokerConnection {
    /// Dials `uri` and opens one channel. Failure at either step is returned
    /// as is; nothing is retried and no half-open session survives.
    pub async fn open(uri: &str, connection_name: &str, connect_timeout: Duration) -> Result<Self> {
        if uri.is_empty() {
            return Err(RpcError::ConnectionError(
                "RabbitMQ URL cannot be empty".to_string(),
            ));
        }

        info!(connection_name, "Connecting to RabbitMQ");
        let properties = ConnectionProperties::default()
            .with_connection_name(connection_name.to_string().into());

        let connecting = Connection::connect(uri, properties);
        let connection = match timeout(connect_timeout, connecting).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                error!("Failed to connect to RabbitMQ: {}", e);
                return Err(RpcError::ConnectionError(format!("Failed to connect: {}", e)));
            }
            Err(_) => {
                error!("Connecting to RabbitMQ timed out after {:?}", connect_timeout);
                return Err(RpcError::ConnectionError(format!(
                    "Connection timed out after {:?}",
                    connect_timeout
                )));
            }
        };
        info!("RabbitMQ connection established");

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open RabbitMQ channel: {}", e);
                if let Err(close_err) = connection.close(0, "Channel open failed").await {
                    warn!("Failed to close connection after channel error: {}", close_err);
                }
                return Err(RpcError::ChannelError(format!("Failed to create channel: {}", e)));
            }
        };
        debug!(channel_id = channel.id(), "RabbitMQ channel opened");

        Ok(Self { connection, channel })
    }

    /// Declares a server-named queue that is exclusive to this connection and
    /// deleted with it, so no two clients can share a reply queue.
    pub async fn declare_reply_queue(&self) -> Result<String> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::QueueError(format!("Failed to declare reply queue: {}", e)))?;

        let name = queue.name().as_str().to_owned();
        info!(reply_queue = %name, "Declared reply queue");
        Ok(name)
    }

    /// Registers the single auto-acknowledging consumer on the reply queue.
    pub async fn consume_replies(
        &self,
        reply_queue: &str,
    ) -> Result<BoxStream<'static, Result<ReplyDelivery>>> {
        let consumer_tag = format!("rpc-reply-{}", &Uuid::new_v4().to_string()[..8]);
        let consumer = self
            .channel
            .basic_consume(
                reply_queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::ConsumeError(format!("Failed to register consumer: {}", e)))?;

        info!(reply_queue, consumer_tag = %consumer_tag, "Consumer started on reply queue");

        Ok(consumer.map(|delivery| {
            delivery
                .map(ReplyDelivery::from)
                .map_err(|e| RpcError::ConsumeError(e.to_string()))
        })
        .boxed())
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Best-effort teardown used when construction fails part way.
    pub(crate) async fn close_quietly(&self) {
        if let Err(e) = self.close().await {
            warn!("Error while closing RabbitMQ session: {}", e);
        }
    }
}

#[async_trait]
impl Transport for BrokerConnection {
    async fn publish(&self, target_queue: &str, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(RpcError::ConnectionUnavailable(
                "RabbitMQ connection or channel is closed".to_string(),
            ));
        }

        debug!(
            target_queue,
            correlation_id = %envelope.correlation_id,
            "Publishing request"
        );

        self.channel
            .basic_publish(
                "",
                target_queue,
                BasicPublishOptions::default(),
                &envelope.body,
                envelope.properties(),
            )
            .await
            .map_err(|e| {
                if self.is_connected() {
                    RpcError::PublishError(e.to_string())
                } else {
                    RpcError::ConnectionUnavailable(e.to_string())
                }
            })?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> Result<()> {
        // Channel first, then the connection that owns it.
        let channel_result = if self.channel.status().connected() {
            self.channel
                .close(0, "Closing RPC client")
                .await
                .map_err(|e| RpcError::ChannelError(e.to_string()))
        } else {
            debug!("RabbitMQ channel already closed, skipping");
            Ok(())
        };

        if let Err(e) = &channel_result {
            error!("Error closing RabbitMQ channel: {}", e);
        }

        if self.connection.status().connected() {
            self.connection
                .close(0, "Closing RPC client")
                .await
                .map_err(|e| RpcError::ConnectionError(e.to_string()))?;
            info!("RabbitMQ connection closed");
        } else {
            debug!("RabbitMQ connection already closed, skipping");
        }

        channel_result
    }
}
