//! The advisory mic lock (last-writer-wins, release-by-non-holder is a
//! no-op) and `/sync`'s round trip against the fake upstream.

mod common;

use common::{fresh_pool, seed_api_key, spawn_fake_upstream, spawn_relay};
use serde_json::json;

async fn register(base: &str) -> String {
    let client = reqwest::Client::new();
    let registered: serde_json::Value = client
        .post(format!("{base}/live"))
        .json(&json!({"apiKey": "K1", "streamKey": "S1", "domain": "https://a.example"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    registered["token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn mic_claim_then_claim_by_another_client_is_last_writer_wins() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K1").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;
    let token = register(&base).await;

    let client = reqwest::Client::new();
    let claim_a = client
        .post(format!("{base}/mic"))
        .bearer_auth(&token)
        .json(&json!({"action": "claim", "clientId": "a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(claim_a.status(), 204);

    let claim_b = client
        .post(format!("{base}/mic"))
        .bearer_auth(&token)
        .json(&json!({"action": "claim", "clientId": "b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(claim_b.status(), 204);
}

#[tokio::test]
async fn release_by_non_holder_is_a_no_op() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K1").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;
    let token = register(&base).await;

    let client = reqwest::Client::new();
    client
        .post(format!("{base}/mic"))
        .bearer_auth(&token)
        .json(&json!({"action": "claim", "clientId": "a"}))
        .send()
        .await
        .unwrap();

    let release_by_other = client
        .post(format!("{base}/mic"))
        .bearer_auth(&token)
        .json(&json!({"action": "release", "clientId": "b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(release_by_other.status(), 204);
}

#[tokio::test]
async fn sync_returns_a_bounded_round_trip_time() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K1").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;
    let token = register(&base).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/sync"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["statusCode"].as_u64(), Some(200));
    assert!(body["roundTripTime"].as_i64().unwrap() >= 0);
}
