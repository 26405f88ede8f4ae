use futures::stream::StreamExt;
use lapin::{message::Delivery, options::*, types::FieldTable, Channel};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::connection::BrokerConnection;
use super::envelope::Envelope;
use super::errors::{Result, RpcError};
use super::transport::Transport;

/// Consumes a request queue and answers each request on its `reply_to`
/// queue, copying the correlation id.
pub struct ReplyWorker {
    connection: BrokerConnection,
    queue: String,
}

impl ReplyWorker {
    pub fn new(connection: BrokerConnection, queue: &str) -> Self {
        Self {
            connection,
            queue: queue.to_string(),
        }
    }

    /// Serves requests until the consumer stream ends or the channel drops.
    pub async fn run<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let channel = self.connection.channel();

        channel
            .queue_declare(&self.queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| RpcError::QueueError(format!("Failed to declare queue: {}", e)))?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| RpcError::ChannelError(format!("Failed to set QoS: {}", e)))?;

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                "rpc_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::ConsumeError(format!("Failed to create consumer: {}", e)))?;

        info!("RPC worker started on queue: {}", self.queue);

        let handler = Arc::new(handler);

        while let Some(delivery_result) = consumer.next().await {
            match delivery_result {
                Ok(delivery) => {
                    let channel = channel.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = process_request(channel, delivery, handler).await {
                            error!("Error processing RPC request: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error receiving request: {}", e);
                    if !self.connection.is_connected() {
                        warn!("Channel disconnected, stopping worker");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}

async fn process_request<F, Fut>(
    channel: Channel,
    delivery: Delivery,
    handler: Arc<F>,
) -> Result<()>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    let Some(request) = Envelope::from_request(&delivery) else {
        error!("Received RPC request without reply_to or correlation_id");
        reject(&delivery, false).await;
        return Ok(());
    };

    let response = match handler(request.body.clone()).await {
        Ok(response) => response,
        Err(e) => {
            error!(correlation_id = %request.correlation_id, "Error processing request: {}", e);
            reject(&delivery, false).await;
            return Ok(());
        }
    };

    let reply = request.reply(response);
    let published = channel
        .basic_publish(
            "",
            &request.reply_to,
            BasicPublishOptions::default(),
            &reply.body,
            reply.properties(),
        )
        .await;

    match published {
        Ok(_) => {
            info!(
                correlation_id = %request.correlation_id,
                reply_to = %request.reply_to,
                "Sent reply"
            );
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| RpcError::ChannelError(format!("Failed to ack request: {}", e)))
        }
        Err(e) => {
            error!(correlation_id = %request.correlation_id, "Failed to send reply: {}", e);
            reject(&delivery, true).await;
            Err(RpcError::PublishError(e.to_string()))
        }
    }
}

async fn reject(delivery: &Delivery, requeue: bool) {
    if let Err(e) = delivery.reject(BasicRejectOptions { requeue }).await {
        warn!("Failed to reject request: {}", e);
    }
}
