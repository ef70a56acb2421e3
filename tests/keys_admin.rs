//! §8 scenario 5 and the admin CRUD surface: create/list/revoke, admin
//! gating, and the free-tier self-service path's duplicate-email refusal.

mod common;

use common::{fresh_pool, seed_api_key, spawn_fake_upstream, spawn_relay};
use serde_json::json;

#[tokio::test]
async fn admin_routes_require_the_configured_admin_key() {
    let pool = fresh_pool().await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let unauthorized = client.get(format!("{base}/keys")).send().await.unwrap();
    assert_eq!(unauthorized.status(), 403);

    let authorized = client
        .get(format!("{base}/keys"))
        .header("x-admin-key", &cfg.admin_key)
        .send()
        .await
        .unwrap();
    assert_eq!(authorized.status(), 200);
}

#[tokio::test]
async fn admin_can_create_list_and_revoke_a_key() {
    let pool = fresh_pool().await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let created: serde_json::Value = client
        .post(format!("{base}/keys"))
        .header("x-admin-key", &cfg.admin_key)
        .json(&json!({"owner": "alice"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let key = created["key"].as_str().unwrap().to_owned();
    assert_eq!(created["active"], true);

    let list: Vec<serde_json::Value> = client
        .get(format!("{base}/keys"))
        .header("x-admin-key", &cfg.admin_key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.iter().any(|row| row["key"] == key));

    let deleted = client
        .delete(format!("{base}/keys/{key}"))
        .header("x-admin-key", &cfg.admin_key)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    // A revoked key fails registration on the next attempt, per the revoke
    // semantics described alongside PATCH/DELETE in the scenario this test
    // is grounded on.
    let register = client
        .post(format!("{base}/live"))
        .json(&json!({"apiKey": key, "streamKey": "S1", "domain": "https://a.example"}))
        .send()
        .await
        .unwrap();
    assert_eq!(register.status(), 401);
    let body: serde_json::Value = register.json().await.unwrap();
    assert_eq!(body["code"], "revoked");
}

#[tokio::test]
async fn freetier_refuses_a_second_key_for_the_same_email() {
    let pool = fresh_pool().await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, _cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let body = json!({"owner": "bob", "email": "bob@example.com"});

    let first = client
        .post(format!("{base}/keys?freetier"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);

    let second = client
        .post(format!("{base}/keys?freetier"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 400);
}

#[tokio::test]
async fn seeded_key_is_usable_before_revocation() {
    let pool = fresh_pool().await;
    seed_api_key(&pool, "K-usable").await;
    let (upstream_addr, _hits) = spawn_fake_upstream().await;
    let (base, cfg) = spawn_relay(pool, format!("http://{upstream_addr}/ingest")).await;

    let client = reqwest::Client::new();
    let fetched: serde_json::Value = client
        .get(format!("{base}/keys/K-usable"))
        .header("x-admin-key", &cfg.admin_key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["active"], true);
}
