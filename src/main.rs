use anyhow::{Context, Result};
use rabbit_rpc::models::{GenerationParams, MusicGenerationRequest, MusicGenerationResponse};
use rabbit_rpc::rabbitmq::{BrokerConnection, ReplyWorker, RpcError};
use rabbit_rpc::{RpcClient, RpcConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RpcConfig::load().context("Failed to load configuration")?;
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("call") => {
            let music_type = args.get(2).map(String::as_str).unwrap_or("classical");
            let ai_model = args.get(3).map(String::as_str).unwrap_or("lstm");
            run_call(&config, music_type, ai_model).await
        }
        Some("worker") => run_worker(&config).await,
        _ => {
            println!("Usage: rabbit-rpc [call [music_type] [ai_model] | worker]");
            Ok(())
        }
    }
}

async fn run_call(config: &RpcConfig, music_type: &str, ai_model: &str) -> Result<()> {
    let client = RpcClient::connect(config)
        .await
        .context("Failed to initialize RabbitMQ client")?;
    info!(reply_queue = %client.reply_queue(), "RabbitMQ client initialized");

    let request = MusicGenerationRequest::new(GenerationParams::new(music_type, ai_model));
    info!(task_id = %request.task_id, "Sending generation request");

    let outcome = client
        .call_json::<_, MusicGenerationResponse>(
            &config.request_queue,
            &request,
            config.rpc_timeout(),
        )
        .await;

    match outcome {
        Ok(response) => match response.into_result() {
            Ok(response) => info!(
                task_id = %response.task_id,
                mp3_url = ?response.mp3_url,
                midi_url = ?response.midi_url,
                "Generation completed"
            ),
            Err(failure) => error!(task_id = %request.task_id, "{}", failure),
        },
        Err(RpcError::Timeout(after)) => {
            error!(task_id = %request.task_id, ?after, "Worker did not answer in time")
        }
        Err(e) => error!(task_id = %request.task_id, "Error calling generation service: {}", e),
    }

    client.close().await?;
    Ok(())
}

async fn run_worker(config: &RpcConfig) -> Result<()> {
    let connection = BrokerConnection::open(
        &config.amqp_uri,
        &config.connection_name,
        config.connect_timeout(),
    )
    .await?;
    let worker = Arc::new(ReplyWorker::new(connection, &config.request_queue));

    let serving = worker.clone();
    let handle = tokio::spawn(async move {
        serving.run(generate).await
    });

    info!("RPC worker running. Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down worker...");
    worker.close().await?;
    match handle.await {
        Ok(Err(e)) => error!("Worker stopped with error: {}", e),
        Err(e) => error!("Worker task failed: {}", e),
        Ok(Ok(())) => {}
    }
    Ok(())
}

async fn generate(body: Vec<u8>) -> rabbit_rpc::Result<Vec<u8>> {
    let request: MusicGenerationRequest = serde_json::from_slice(&body)?;
    info!(task_id = %request.task_id, music_type = %request.params.music_type, "Generating");

    // Stand-in for the real model run.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut response =
        MusicGenerationResponse::completed(&request.task_id, &format!("{}.mp3", request.task_id));
    response.model_used = Some(request.params.model_type);
    response.length_generated = Some(request.params.length);
    Ok(serde_json::to_vec(&response)?)
}
