//! §8 scenarios 1-3: single caption delivery, batching, and the usage cap.

mod common;

use std::time::Duration;

use common::{fresh_pool, seed_api_key, seed_api_key_with_limits, spawn_fake_upstream, spawn_relay};
use serde_json::json;

async fn register(base: &str, api_key: &str, stream_key: &str) -> serde_json::Value {
    let client = reqwest::Client::new();
    let body = json!({"apiKey": api_key, "streamKey": stream_key, "domain": "https://a.example"});
    client
        .post(format!("{base}/live"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn single_caption_advances_sequence_and_emits_caption_result() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K1").await;
    let (upstream_addr, hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let registered = register(&base, "K1", "S1").await;
    let token = registered["token"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/captions"))
        .bearer_auth(token)
        .json(&json!({"captions": [{"text": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let ack: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(ack["ok"], true);
    assert!(ack["requestId"].is_string());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = client
        .get(format!("{base}/live"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(status["sequence"].as_u64(), Some(1));
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_of_two_captions_advances_sequence_by_one_slot() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K2").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let registered = register(&base, "K2", "S1").await;
    let token = registered["token"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/captions"))
        .bearer_auth(token)
        .json(&json!({"captions": [{"text": "a"}, {"text": "b"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = client
        .get(format!("{base}/live"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(status["sequence"].as_u64(), Some(1));
}

#[tokio::test]
async fn empty_captions_array_is_400() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K3").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let registered = register(&base, "K3", "S1").await;
    let token = registered["token"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/captions"))
        .bearer_auth(token)
        .json(&json!({"captions": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn daily_limit_exceeded_still_acks_202_but_fails_async() {
    let pool = fresh_pool().await;
    seed_api_key_with_limits(&pool, "K4", Some(2), None).await;
    let (upstream_addr, hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let registered = register(&base, "K4", "S1").await;
    let token = registered["token"].as_str().unwrap();
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/captions"))
            .bearer_auth(token)
            .json(&json!({"captions": [{"text": "x"}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
    }

    // Third single caption exceeds the daily_limit=2 cap.
    let third = client
        .post(format!("{base}/captions"))
        .bearer_auth(token)
        .json(&json!({"captions": [{"text": "over"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(third.status(), 202);

    tokio::time::sleep(Duration::from_millis(200)).await;
    // Only the first two captions ever reached the fake upstream.
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
}
