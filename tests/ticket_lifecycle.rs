use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use ticketdesk::api_router::build_app;
use ticketdesk::core::config::{AppConfig, StorageKind};
use ticketdesk::directory::NewModel;
use ticketdesk::storage::InMemoryBackend;
use ticketdesk::tickets::{AuditAction, CreateTicketRequest, TicketStatus};
use ticketdesk::AppState;

const ADMIN_TOKEN: &str = "let-me-in";

fn config(data_dir: Option<&std::path::Path>) -> AppConfig {
    let mut config = AppConfig::default();
    config.uploads.signing_key = Some("integration-key".to_string());
    config.admin.token_hash = Some(hex::encode(Sha256::digest(ADMIN_TOKEN.as_bytes())));
    match data_dir {
        Some(dir) => {
            config.storage.backend = StorageKind::File;
            config.storage.data_dir = dir.to_path_buf();
        }
        None => config.storage.backend = StorageKind::Memory,
    }
    config
}

async fn memory_state() -> Arc<AppState> {
    let state = AppState::with_backend(config(None), Arc::new(InMemoryBackend::new()))
        .await
        .expect("state");
    Arc::new(state)
}

async fn send(
    state: &Arc<AppState>,
    method: Method,
    uri: &str,
    headers: &[(&str, String)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = build_app(state.clone()).oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn create_owned_ticket(state: &Arc<AppState>) -> (String, String) {
    let (_, model) = send(state, Method::POST, "/api/models", &[], Some(json!({"name": "Luna"}))).await;
    let (_, chatter) = send(
        state,
        Method::POST,
        "/api/chatters",
        &[],
        Some(json!({"name": "Mia", "model_ids": [model["id"]]})),
    )
    .await;
    let (status, ticket) = send(
        state,
        Method::POST,
        "/api/tickets",
        &[],
        Some(json!({
            "title": "Call",
            "price": 50,
            "model_id": model["id"],
            "chatter_id": chatter["id"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        ticket["id"].as_str().expect("id").to_string(),
        chatter["id"].as_str().expect("chatter id").to_string(),
    )
}

#[tokio::test]
async fn test_http_lifecycle() {
    let state = memory_state().await;
    let (id, owner) = create_owned_ticket(&state).await;

    let (status, ticket) = send(&state, Method::GET, &format!("/api/tickets/{id}"), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "pending");
    assert_eq!(ticket["model_name"], "Luna");
    assert_eq!(ticket["type"], "custom");

    let (status, _) = send(
        &state,
        Method::PUT,
        &format!("/api/tickets/{id}"),
        &[("x-actor-id", Uuid::new_v4().to_string())],
        Some(json!({"price": 99})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &state,
        Method::PUT,
        &format!("/api/tickets/{id}"),
        &[],
        Some(json!({"price": 99})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, can_edit) = send(
        &state,
        Method::GET,
        &format!("/api/tickets/{id}/can-edit"),
        &[("x-actor-id", owner.clone())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(can_edit["can_edit"], true);

    let (status, ticket) = send(
        &state,
        Method::PUT,
        &format!("/api/tickets/{id}/complete"),
        &[("x-actor-id", owner.clone())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "completed");

    let (status, body) = send(
        &state,
        Method::PUT,
        &format!("/api/tickets/{id}/cancel"),
        &[("x-actor-id", owner.clone())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().expect("error").contains("completed"));

    let (status, log) = send(&state, Method::GET, &format!("/api/tickets/{id}/audit"), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let log = log.as_array().expect("entries");
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["action"], "created");
    assert_eq!(log[1]["action"], "completed");
    assert_eq!(log[1]["old_values"], json!({"status": "pending"}));
    assert_eq!(log[1]["new_values"], json!({"status": "completed"}));
}

#[tokio::test]
async fn test_http_validation_and_not_found() {
    let state = memory_state().await;

    let (status, body) = send(&state, Method::POST, "/api/tickets", &[], Some(json!({"title": "Call"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("price"));

    let (status, _) = send(
        &state,
        Method::GET,
        &format!("/api/tickets/{}", Uuid::new_v4()),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_admin_delete() {
    let state = memory_state().await;
    let (id, _owner) = create_owned_ticket(&state).await;
    let uri = format!("/api/tickets/{id}");

    let (status, _) = send(&state, Method::DELETE, &uri, &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &state,
        Method::DELETE,
        &uri,
        &[("x-admin-token", "guess".to_string())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &state,
        Method::DELETE,
        &uri,
        &[
            ("x-admin-token", ADMIN_TOKEN.to_string()),
            ("x-admin-label", "ops".to_string()),
        ],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&state, Method::GET, &uri, &[], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, log) = send(&state, Method::GET, &format!("{uri}/audit"), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let last = log.as_array().and_then(|l| l.last()).expect("entry").clone();
    assert_eq!(last["action"], "deleted");
    assert_eq!(last["changed_by"], "ops");

    let (status, page) = send(
        &state,
        Method::GET,
        "/api/audit?action=deleted",
        &[("x-admin-token", ADMIN_TOKEN.to_string())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 1);
}

#[tokio::test]
async fn test_http_idempotent_create() {
    let state = memory_state().await;
    let body = json!({"title": "Call", "price": 50});
    let key = [("idempotency-key", "abc-123".to_string())];

    let (first_status, first) = send(&state, Method::POST, "/api/tickets", &key, Some(body.clone())).await;
    let (_, second) = send(&state, Method::POST, "/api/tickets", &key, Some(body)).await;
    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(first["id"], second["id"]);

    let (_, all) = send(&state, Method::GET, "/api/tickets", &[], None).await;
    assert_eq!(all.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_http_upload_token_roundtrip() {
    let state = memory_state().await;
    let (id, owner) = create_owned_ticket(&state).await;
    let uri = format!("/api/tickets/{id}/upload-token");

    let (status, _) = send(&state, Method::POST, &uri, &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &state,
        Method::POST,
        &uri,
        &[("x-actor-id", Uuid::new_v4().to_string())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, token) = send(&state, Method::POST, &uri, &[("x-actor-id", owner)], None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(token["ticket_id"], id.as_str());

    let (status, grant) = send(
        &state,
        Method::POST,
        "/api/uploads/verify",
        &[],
        Some(json!({"token": token["token"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(grant["ticket_id"], id.as_str());
    assert!(grant.get("nonce").is_none());

    let files = json!([{"name": "a.jpg", "size": 1024, "content_type": "image/jpeg"}]);
    let (status, redemption) = send(
        &state,
        Method::POST,
        "/api/uploads/redeem",
        &[],
        Some(json!({"token": token["token"], "files": files})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(redemption["ticket_id"], id.as_str());

    let (status, body) = send(
        &state,
        Method::POST,
        "/api/uploads/redeem",
        &[],
        Some(json!({"token": token["token"], "files": files})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().expect("error").contains("redeemed"));

    let (status, _) = send(
        &state,
        Method::POST,
        "/api/uploads/verify",
        &[],
        Some(json!({"token": "not.a-token"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_health() {
    let state = memory_state().await;
    create_owned_ticket(&state).await;

    for uri in ["/health", "/api/health"] {
        let (status, body) = send(&state, Method::GET, uri, &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["tickets"], 1);
        assert_eq!(body["admin_enabled"], true);
    }
}

#[tokio::test]
async fn test_http_audit_query_with_extreme_paging() {
    let state = memory_state().await;
    create_owned_ticket(&state).await;

    let (status, page) = send(
        &state,
        Method::GET,
        &format!("/api/audit?limit={}&offset=1", usize::MAX),
        &[("x-admin-token", ADMIN_TOKEN.to_string())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 1);
    assert_eq!(page["has_more"], false);
    assert_eq!(page["entries"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_file_backend_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    let (ticket_id, model_id) = {
        let state = AppState::open(config(Some(dir.path()))).await.expect("state");
        let model = state
            .directory
            .create_model(NewModel {
                name: "Luna".to_string(),
            })
            .await
            .expect("model");
        let mut request = CreateTicketRequest::new("Call", 50.0);
        request.model_id = Some(model.id);
        let ticket = state.tickets.create_ticket(request).await.expect("ticket");
        (ticket.id, model.id)
    };

    for name in ["models", "tickets", "ticket_audit"] {
        let path = dir.path().join(format!("{name}.json"));
        assert!(path.exists(), "{} missing", path.display());
    }

    let state = AppState::open(config(Some(dir.path()))).await.expect("reopen");
    let ticket = state.tickets.get_ticket(ticket_id).await.expect("ticket");
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert_eq!(ticket.model_id, Some(model_id));
    assert_eq!(ticket.code, "TKT-000001");

    let log = state.tickets.get_ticket_audit_log(ticket_id).await.expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, AuditAction::Created);

    let next = state
        .tickets
        .create_ticket(CreateTicketRequest::new("Video", 80.0))
        .await
        .expect("ticket");
    assert_eq!(next.code, "TKT-000002");
}
