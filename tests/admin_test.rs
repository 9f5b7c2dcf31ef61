//! Admin API tests.

use std::net::SocketAddr;
use std::sync::Arc;

use api_gateway::Gateway;
use api_gateway::admin::{AdminState, setup_admin_router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

mod common;

const KEY: &str = "test-admin-key";

async fn start_admin(gateway: Arc<Gateway>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = setup_admin_router(AdminState::new(gateway, KEY));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let gateway = Arc::new(Gateway::new(common::base_config(vec![])));
    let admin = start_admin(gateway).await;
    let client = common::client();

    let res = client.get(format!("http://{}/admin/status", admin)).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("http://{}/admin/status", admin))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("http://{}/admin/status", admin))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["strategy"], "round_robin");
    assert_eq!(status["breaker_scope"], "global");
    assert_eq!(status["running"], false);
}

#[tokio::test]
async fn test_add_route_and_remove_backend() {
    let backend = common::start_mock_backend("added").await;
    let gw = common::start_gateway(common::base_config(vec![])).await;
    let admin = start_admin(gw.gateway.clone()).await;
    let client = common::client();
    let backends_url = format!("http://{}/admin/backends", admin);

    assert_eq!(client.get(gw.url("/")).send().await.unwrap().status(), 503);

    let entry = json!({"id": "added", "host": "127.0.0.1", "port": backend.port()});
    let res = client.post(&backends_url).bearer_auth(KEY).json(&entry).send().await.unwrap();
    assert_eq!(res.status(), 201);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["id"], "added");
    assert_eq!(created["health_status"], "healthy");

    let res = client.post(&backends_url).bearer_auth(KEY).json(&entry).send().await.unwrap();
    assert_eq!(res.status(), 409);

    let res = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "added");

    let listed: Value = client
        .get(&backends_url)
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["total_requests"], 1);

    let res = client
        .delete(format!("{}/added", backends_url))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);

    let res = client
        .delete(format!("{}/added", backends_url))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    assert_eq!(client.get(gw.url("/")).send().await.unwrap().status(), 503);
    gw.stop().await;
}

#[tokio::test]
async fn test_invalid_backend_rejected() {
    let gateway = Arc::new(Gateway::new(common::base_config(vec![])));
    let admin = start_admin(gateway.clone()).await;

    let res = common::client()
        .post(format!("http://{}/admin/backends", admin))
        .bearer_auth(KEY)
        .json(&json!({"id": "", "host": "127.0.0.1", "port": 0, "health_check_path": "health"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid backend entry");
    assert!(body["details"].as_array().unwrap().len() >= 3);
    assert!(gateway.load_balancer().backends().is_empty());
}

#[tokio::test]
async fn test_backend_timeout_must_fit_request_timeout() {
    let mut config = common::base_config(vec![]);
    config.listener.request_timeout_secs = 10;
    let gateway = Arc::new(Gateway::new(config));
    let admin = start_admin(gateway.clone()).await;
    let client = common::client();

    let res = client
        .post(format!("http://{}/admin/backends", admin))
        .bearer_auth(KEY)
        .json(&json!({"id": "slow", "host": "127.0.0.1", "port": 9000, "timeout_secs": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    let details = body["details"].as_array().unwrap();
    assert_eq!(details.len(), 1);
    assert!(details[0].as_str().unwrap().starts_with("timeout_secs:"));
    assert!(gateway.load_balancer().backends().is_empty());

    let res = client
        .post(format!("http://{}/admin/backends", admin))
        .bearer_auth(KEY)
        .json(&json!({"id": "slow", "host": "127.0.0.1", "port": 9000, "timeout_secs": 9}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
}

#[tokio::test]
async fn test_metrics_snapshot() {
    let a = common::start_mock_backend("a").await;
    let gw = common::start_gateway(common::base_config(vec![common::backend("a", a)])).await;
    let admin = start_admin(gw.gateway.clone()).await;
    let client = common::client();

    for _ in 0..4 {
        client.get(gw.url("/")).send().await.unwrap();
    }

    let m: Value = client
        .get(format!("http://{}/admin/metrics", admin))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(m["total_requests"], 4);
    assert_eq!(m["successful_requests"], 4);
    assert_eq!(m["success_rate_percent"], 100.0);
    assert_eq!(m["circuit_breaker_state"], "closed");
    assert_eq!(m["backends"][0]["id"], "a");
    assert_eq!(m["backends"][0]["health_status"], "healthy");
    gw.stop().await;
}
