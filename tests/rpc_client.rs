mod common;

use async_trait::async_trait;
use common::{Harness, REPLY_QUEUE};
use futures::channel::mpsc as reply_mpsc;
use rabbit_rpc::models::{GenerationParams, MusicGenerationRequest, MusicGenerationResponse};
use rabbit_rpc::rabbitmq::{
    Envelope, ReplyDelivery, Result, RpcError, Transport, JSON_CONTENT_TYPE,
};
use rabbit_rpc::RpcClient;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn call_returns_matching_reply_body() {
    let mut harness = Harness::new();
    let client = harness.client.clone();
    let broker = harness.broker.clone();

    let worker = tokio::spawn(async move {
        let (queue, request) = harness.next_request().await;
        assert_eq!(queue, "music_requests");
        assert_eq!(request.body, br#"{"task_id":"abc"}"#);
        tokio::time::sleep(Duration::from_millis(500)).await;
        broker.reply(&request, br#"{"status":"completed","mp3_url":"a.mp3"}"#);
        harness
    });

    let response = client
        .call("music_requests", br#"{"task_id":"abc"}"#.to_vec(), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response, br#"{"status":"completed","mp3_url":"a.mp3"}"#);
    assert_eq!(client.pending_calls(), 0);
    worker.await.unwrap();
}

/// Answers every request from inside `publish`, before `publish` returns.
struct EagerBroker {
    replies: reply_mpsc::UnboundedSender<Result<ReplyDelivery>>,
}

#[async_trait]
impl Transport for EagerBroker {
    async fn publish(&self, _target_queue: &str, envelope: &Envelope) -> Result<()> {
        let _ = self
            .replies
            .unbounded_send(Ok(envelope.reply(b"early".to_vec()).into()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.replies.close_channel();
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn reply_arriving_before_publish_returns_is_delivered() {
    let (replies_tx, replies_rx) = reply_mpsc::unbounded();
    let client = RpcClient::with_transport(
        Arc::new(EagerBroker { replies: replies_tx }),
        REPLY_QUEUE.to_string(),
        replies_rx,
    );

    let response = client
        .call("music_requests", b"{}".to_vec(), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response, b"early");
    assert_eq!(client.pending_calls(), 0);
    client.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn call_without_reply_times_out_and_deregisters() {
    let harness = Harness::new();
    let started = Instant::now();

    let err = harness
        .client
        .call("music_requests", br#"{"task_id":"abc"}"#.to_vec(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_secs(2)));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn replies_in_reverse_order_reach_their_own_callers() {
    let mut harness = Harness::new();

    let client_x = harness.client.clone();
    let call_x = tokio::spawn(async move {
        client_x.call("music_requests", b"X".to_vec(), Duration::from_secs(5)).await
    });
    let client_y = harness.client.clone();
    let call_y = tokio::spawn(async move {
        client_y.call("music_requests", b"Y".to_vec(), Duration::from_secs(5)).await
    });

    let mut by_body = HashMap::new();
    for _ in 0..2 {
        let (_, request) = harness.next_request().await;
        by_body.insert(request.body.clone(), request);
    }

    harness.broker.reply(&by_body[&b"Y".to_vec()], b"reply-Y");
    harness.broker.reply(&by_body[&b"X".to_vec()], b"reply-X");

    assert_eq!(call_x.await.unwrap().unwrap(), b"reply-X");
    assert_eq!(call_y.await.unwrap().unwrap(), b"reply-Y");
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn many_concurrent_calls_never_cross_talk() {
    const CALLS: usize = 32;
    let mut harness = Harness::new();

    let mut handles = Vec::new();
    for i in 0..CALLS {
        let client = harness.client.clone();
        handles.push(tokio::spawn(async move {
            let response = client
                .call("music_requests", format!("req-{i}").into_bytes(), Duration::from_secs(10))
                .await;
            (i, response)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..CALLS {
        let (_, request) = harness.next_request().await;
        requests.push(request);
    }
    assert_eq!(harness.client.pending_calls(), CALLS);

    requests.shuffle(&mut rand::rng());
    for request in &requests {
        let body = String::from_utf8(request.body.clone()).unwrap();
        harness
            .broker
            .reply(request, body.replace("req-", "resp-").as_bytes());
    }

    for handle in handles {
        let (i, response) = handle.await.unwrap();
        assert_eq!(response.unwrap(), format!("resp-{i}").into_bytes());
    }
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn published_envelopes_use_unique_ids_and_the_reply_queue() {
    let mut harness = Harness::new();

    for _ in 0..16 {
        let client = harness.client.clone();
        tokio::spawn(async move {
            let _ = client
                .call("music_requests", b"{}".to_vec(), Duration::from_secs(1))
                .await;
        });
    }

    let mut ids = HashSet::new();
    for _ in 0..16 {
        let (_, request) = harness.next_request().await;
        assert_eq!(request.reply_to, REPLY_QUEUE);
        assert_eq!(request.content_type, JSON_CONTENT_TYPE);
        assert!(ids.insert(request.correlation_id));
    }
}

#[tokio::test(start_paused = true)]
async fn late_reply_is_dropped_without_disturbing_other_calls() {
    let mut harness = Harness::new();

    let client_w = harness.client.clone();
    let call_w = tokio::spawn(async move {
        client_w.call("music_requests", b"W".to_vec(), Duration::from_secs(30)).await
    });
    let client_z = harness.client.clone();
    let call_z = tokio::spawn(async move {
        client_z.call("music_requests", b"Z".to_vec(), Duration::from_millis(100)).await
    });

    let mut by_body = HashMap::new();
    for _ in 0..2 {
        let (_, request) = harness.next_request().await;
        by_body.insert(request.body.clone(), request);
    }

    assert!(matches!(call_z.await.unwrap(), Err(RpcError::Timeout(_))));
    assert_eq!(harness.client.pending_calls(), 1);

    harness.broker.reply(&by_body[&b"Z".to_vec()], b"too late");
    harness.broker.deliver(ReplyDelivery {
        correlation_id: None,
        body: b"stray".to_vec(),
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.client.pending_calls(), 1);

    harness.broker.reply(&by_body[&b"W".to_vec()], b"reply-W");
    assert_eq!(call_w.await.unwrap().unwrap(), b"reply-W");
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test]
async fn publish_failure_returns_immediately_and_cleans_up() {
    let harness = Harness::new();
    harness.broker.fail_publishes();

    let err = harness
        .client
        .call("music_requests", b"{}".to_vec(), Duration::from_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::PublishError(_)));
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test]
async fn disconnected_broker_fails_fast() {
    let mut harness = Harness::new();
    harness.broker.disconnect();

    let err = harness
        .client
        .call("music_requests", b"{}".to_vec(), Duration::from_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::ConnectionUnavailable(_)));
    assert_eq!(harness.client.pending_calls(), 0);
    assert!(harness.requests.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn close_resolves_outstanding_calls_with_an_error() {
    const CALLS: usize = 3;
    let mut harness = Harness::new();

    let mut handles = Vec::new();
    for _ in 0..CALLS {
        let client = harness.client.clone();
        handles.push(tokio::spawn(async move {
            client.call("music_requests", b"{}".to_vec(), Duration::from_secs(30)).await
        }));
    }
    for _ in 0..CALLS {
        harness.next_request().await;
    }
    assert_eq!(harness.client.pending_calls(), CALLS);

    let started = Instant::now();
    harness.client.close().await.unwrap();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RpcError::ConnectionUnavailable(_))));
    }
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(harness.broker.is_closed());
    assert!(harness.client.is_closed());
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test]
async fn calls_after_close_fail_fast_and_close_is_idempotent() {
    let harness = Harness::new();
    harness.client.close().await.unwrap();
    harness.client.close().await.unwrap();

    let err = harness
        .client
        .call("music_requests", b"{}".to_vec(), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ConnectionUnavailable(_)));
}

#[tokio::test(start_paused = true)]
async fn abandoned_call_deregisters() {
    let mut harness = Harness::new();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        harness
            .client
            .call("music_requests", b"{}".to_vec(), Duration::from_secs(60)),
    )
    .await;

    assert!(abandoned.is_err());
    harness.next_request().await;
    assert_eq!(harness.client.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn typed_call_round_trips_generation_records() {
    let mut harness = Harness::new();
    let client = harness.client.clone();
    let broker = harness.broker.clone();

    tokio::spawn(async move {
        let (_, request) = harness.next_request().await;
        let decoded: MusicGenerationRequest = serde_json::from_slice(&request.body).unwrap();
        let response = MusicGenerationResponse::completed(&decoded.task_id, "out.mp3");
        broker.reply(&request, &serde_json::to_vec(&response).unwrap());
        harness
    });

    let request = MusicGenerationRequest::new(GenerationParams::new("jazz", "lstm"));
    let response: MusicGenerationResponse = client
        .call_json("music_requests", &request, Duration::from_secs(5))
        .await
        .unwrap();

    let accepted = response.into_result().unwrap();
    assert_eq!(accepted.task_id, request.task_id);
    assert_eq!(accepted.mp3_url.as_deref(), Some("out.mp3"));
}
