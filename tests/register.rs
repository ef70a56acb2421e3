//! §8 scenarios 1 and 4: registration, idempotent re-registration, and the
//! domain-allowlist/unknown-key rejections.

mod common;

use common::{fresh_pool, seed_api_key, spawn_fake_upstream, spawn_relay, spawn_relay_with};
use serde_json::json;

#[tokio::test]
async fn register_then_reregister_returns_the_same_token_and_session_id() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K1").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let body = json!({"apiKey": "K1", "streamKey": "S1", "domain": "https://a.example"});

    let first = client.post(format!("{base}/live")).json(&body).send().await.unwrap();
    assert_eq!(first.status(), 200);
    let first_json: serde_json::Value = first.json().await.unwrap();
    assert_eq!(first_json["sequence"].as_u64(), Some(0));

    let second = client.post(format!("{base}/live")).json(&body).send().await.unwrap();
    assert_eq!(second.status(), 200);
    let second_json: serde_json::Value = second.json().await.unwrap();

    assert_eq!(first_json["token"], second_json["token"]);
    assert_eq!(first_json["sessionId"], second_json["sessionId"]);
}

#[tokio::test]
async fn register_with_unknown_key_is_401() {
    let pool = fresh_pool().await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let body = json!({"apiKey": "missing", "streamKey": "S1", "domain": "https://a.example"});
    let resp = client.post(format!("{base}/live")).json(&body).send().await.unwrap();

    assert_eq!(resp.status(), 401);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "unknown_key");
}

#[tokio::test]
async fn register_with_disallowed_domain_is_403() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K2").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay_with(pool, format!("http://{upstream_addr}/ingest"), |config| {
        config.allowed_domains =
            caption_relay::config::AllowedDomains::List(vec!["https://allowed.example".to_owned()]);
    })
    .await;

    let client = reqwest::Client::new();
    let body = json!({"apiKey": "K2", "streamKey": "S1", "domain": "https://other.example"});
    let resp = client.post(format!("{base}/live")).json(&body).send().await.unwrap();

    assert_eq!(resp.status(), 403);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "domain_not_allowed");
}

#[tokio::test]
async fn register_with_missing_fields_is_400() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K3").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let body = json!({"apiKey": "K3", "streamKey": "", "domain": "https://a.example"});
    let resp = client.post(format!("{base}/live")).json(&body).send().await.unwrap();

    assert_eq!(resp.status(), 400);
}
