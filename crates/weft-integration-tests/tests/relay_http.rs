//! Integration test: the relay HTTP surface, including recovery's
//! auth-by-new-key path and the admin endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use weft_crypto::ed25519::KeyPair;
use weft_relay::mailer::CapturingMailer;
use weft_relay::{routes, RelayConfig, RelayContext};
use weft_wire::reqsig;

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn public_post(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn signed(method: &str, path: &str, agent: &str, key: &KeyPair, body: serde_json::Value) -> Request<Body> {
    let payload = if body.is_null() {
        Vec::new()
    } else {
        serde_json::to_vec(&body).expect("payload")
    };
    let sig = reqsig::sign_request(agent, &key.signing_key, method, path, &payload);
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .header("X-Timestamp", sig.timestamp)
        .header("Authorization", sig.authorization)
        .body(Body::from(payload))
        .expect("request")
}

async fn register_active(app: &Router, mailer: &CapturingMailer, name: &str) -> KeyPair {
    let kp = KeyPair::generate();
    let response = app
        .clone()
        .oneshot(public_post(
            "/registry/agents",
            serde_json::json!({
                "name": name,
                "publicKey": kp.verifying_key.to_base64().expect("key"),
                "email": format!("{name}@example.com"),
                "endpoint": format!("https://{name}.test/inbox"),
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let code = mailer.last_code().expect("code");
    let response = app
        .clone()
        .oneshot(public_post(
            &format!("/registry/agents/{name}/verify"),
            serde_json::json!({"code": code}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    kp
}

#[tokio::test]
async fn recovery_over_http_authenticates_with_pending_key() {
    let mailer = Arc::new(CapturingMailer::default());
    let ctx = RelayContext::in_memory_with_mailer(RelayConfig::default(), mailer.clone())
        .expect("ctx");
    let app = routes::router(ctx);

    let original = register_active(&app, &mailer, "atlas").await;
    let recovery = KeyPair::generate();
    let recovery_b64 = recovery.verifying_key.to_base64().expect("key");

    // Lost-key flow: the recovery request is public and returns 202.
    let response = app
        .clone()
        .oneshot(public_post(
            "/recover",
            serde_json::json!({
                "name": "atlas",
                "email": "atlas@example.com",
                "newPublicKey": recovery_b64,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Rotating immediately, signed with the pending key, is cooling-off.
    let response = app
        .clone()
        .oneshot(signed(
            "POST",
            "/registry/agents/atlas/rotate-key",
            "atlas",
            &recovery,
            serde_json::json!({"newPublicKey": recovery_b64}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = response_json(response).await;
    let message = json["error"].as_str().expect("message").to_lowercase();
    assert!(message.contains("cooling"));

    // With a recovery pending, even the current key cannot rotate to some
    // other key: the pending key is the only acceptable target.
    let other = KeyPair::generate();
    let response = app
        .clone()
        .oneshot(signed(
            "POST",
            "/registry/agents/atlas/rotate-key",
            "atlas",
            &original,
            serde_json::json!({"newPublicKey": other.verifying_key.to_base64().expect("key")}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A signature from an unrelated key is simply unauthorized.
    let response = app
        .clone()
        .oneshot(signed(
            "POST",
            "/registry/agents/atlas/rotate-key",
            "atlas",
            &other,
            serde_json::json!({"newPublicKey": recovery_b64}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn presence_over_http() {
    let mailer = Arc::new(CapturingMailer::default());
    let ctx = RelayContext::in_memory_with_mailer(RelayConfig::default(), mailer.clone())
        .expect("ctx");
    let app = routes::router(ctx);

    let alice = register_active(&app, &mailer, "atlas").await;
    let bob = register_active(&app, &mailer, "bmo").await;

    let response = app
        .clone()
        .oneshot(signed("PUT", "/presence", "atlas", &alice, serde_json::Value::Null))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(signed("GET", "/presence/atlas", "bmo", &bob, serde_json::Value::Null))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["agent"], "atlas");
    assert_eq!(json["online"], true);

    // Batch endpoint: query string is not part of the signed path.
    let payload = Vec::new();
    let sig = reqsig::sign_request("bmo", &bob.signing_key, "GET", "/presence/batch", &payload);
    let request = Request::builder()
        .method("GET")
        .uri("/presence/batch?agents=atlas,ghost")
        .header("X-Timestamp", sig.timestamp)
        .header("Authorization", sig.authorization)
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    let rows = json.as_array().expect("array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["online"], true);
    assert_eq!(rows[1]["online"], false);
}

#[tokio::test]
async fn admin_endpoints_require_configured_admin() {
    let mailer = Arc::new(CapturingMailer::default());
    let config = RelayConfig {
        admin_agents: vec!["root".to_string()],
        ..Default::default()
    };
    let ctx = RelayContext::in_memory_with_mailer(config, mailer.clone()).expect("ctx");
    let app = routes::router(ctx);

    let root = register_active(&app, &mailer, "root").await;
    let alice = register_active(&app, &mailer, "atlas").await;

    // A non-admin is refused.
    let response = app
        .clone()
        .oneshot(signed(
            "POST",
            "/admin/broadcast",
            "atlas",
            &alice,
            serde_json::json!({"subject": "hi", "body": "all"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The configured admin broadcasts; any active agent reads.
    let response = app
        .clone()
        .oneshot(signed(
            "POST",
            "/admin/broadcast",
            "root",
            &root,
            serde_json::json!({"subject": "maintenance", "body": "tonight"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(signed("GET", "/admin/broadcasts", "atlas", &alice, serde_json::Value::Null))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json.as_array().expect("array").len(), 1);

    // Revoking an agent cuts off its authentication.
    let response = app
        .clone()
        .oneshot(signed(
            "POST",
            "/registry/agents/atlas/revoke",
            "root",
            &root,
            serde_json::Value::Null,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(signed("GET", "/contacts", "atlas", &alice, serde_json::Value::Null))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
