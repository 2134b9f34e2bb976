//! Router-level tests over in-memory collaborators.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pulseox_api::{create_router, ServerState};
use pulseox_core::{Error, Result, StaticIdentityVerifier, TextGenerator};
use pulseox_devices::DeviceRegistry;
use pulseox_notify::{NotificationService, NotificationTransport};
use pulseox_store::{MemoryTreeStore, TreeStore};

struct OkTransport;

#[async_trait::async_trait]
impl NotificationTransport for OkTransport {
    async fn ensure_subscribed(&self, _device_id: &str) {}
    async fn send(&self, _device_id: &str, _payload: &str) -> Result<()> {
        Ok(())
    }
}

struct CannedGenerator;

#[async_trait::async_trait]
impl TextGenerator for CannedGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok("your readings look stable".to_string())
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryTreeStore>,
    registry: DeviceRegistry,
}

fn setup() -> TestApp {
    let store = Arc::new(MemoryTreeStore::new());
    let identity = Arc::new(StaticIdentityVerifier::new());
    identity.add_user("tok-a", "alice", Some("alice@example.com"));
    identity.add_user("tok-b", "bob", Some("bob@example.com"));

    let notifications = NotificationService::with_transport(
        store.clone() as Arc<dyn TreeStore>,
        Arc::new(OkTransport),
        std::time::Duration::from_secs(60),
    );

    let state = ServerState::new(
        store.clone() as Arc<dyn TreeStore>,
        notifications,
        identity,
        Arc::new(CannedGenerator),
    );
    let registry = state.registry.clone();
    TestApp {
        router: create_router(state),
        store,
        registry,
    }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn bearer(token: &str) -> (&'static str, String) {
    ("authorization", format!("Bearer {token}"))
}

#[tokio::test]
async fn test_health_is_public() {
    let app = setup();
    let (status, body) = send(&app.router, "GET", "/api/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn test_user_routes_require_bearer_token() {
    let app = setup();
    let (status, _) = send(&app.router, "GET", "/api/records", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app.router,
        "GET",
        "/api/records",
        &[("authorization", "Bearer bogus")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_device_post_rejects_bad_credentials() {
    let app = setup();
    app.registry.provision_legacy("esp", "s3cret", "alice").unwrap();

    let reading = json!({"spo2": 97.0, "heart_rate": 71.0});

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/records",
        &[("x-device-id", "esp"), ("x-device-secret", "wrong")],
        Some(reading.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Unknown device is indistinguishable from a bad secret here.
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/records",
        &[("x-device-id", "ghost"), ("x-device-secret", "s3cret")],
        Some(reading),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_device_post_validates_user_header() {
    let app = setup();
    app.registry.provision_legacy("esp", "s3cret", "alice").unwrap();

    let device_headers = [
        ("x-device-id", "esp"),
        ("x-device-secret", "s3cret"),
        ("x-user-id", "bob"),
    ];
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/records",
        &device_headers,
        Some(json!({"spo2": 97.0, "heart_rate": 71.0})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // With a binding in place the same request succeeds.
    app.registry.register("esp", "bob", "s3cret").unwrap();
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/records",
        &device_headers,
        Some(json!({"spo2": 97.0, "hr": 71.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let key = body["key"].as_str().unwrap().to_string();

    let global = app.store.get(&format!("records/{key}")).unwrap().unwrap();
    let personal = app
        .store
        .get(&format!("user_records/bob/{key}"))
        .unwrap()
        .unwrap();
    assert_eq!(global["ts"], personal["ts"]);
}

#[tokio::test]
async fn test_device_post_requires_reading_fields() {
    let app = setup();
    app.registry.provision_legacy("esp", "s3cret", "alice").unwrap();

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/records",
        &[("x-device-id", "esp"), ("x-device-secret", "s3cret")],
        Some(json!({"spo2": 97.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_schedule_creation_statuses() {
    let app = setup();
    app.registry.provision_legacy("esp", "s3cret", "alice").unwrap();
    let auth = bearer("tok-a");
    let auth_header = [(auth.0, auth.1.as_str())];

    // Missing fields.
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &auth_header,
        Some(json!({"device_id": "esp"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let future = chrono::Utc::now() + chrono::Duration::minutes(5);
    let schedule_time = wall_clock(&future);

    // Unknown device.
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &auth_header,
        Some(json!({"device_id": "ghost", "schedule_time": schedule_time})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Known device, caller without access.
    let bob = bearer("tok-b");
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &[(bob.0, bob.1.as_str())],
        Some(json!({"device_id": "esp", "schedule_time": schedule_time})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Past fire time.
    let past = chrono::Utc::now() - chrono::Duration::minutes(5);
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &auth_header,
        Some(json!({"device_id": "esp", "schedule_time": wall_clock(&past)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Valid request.
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &auth_header,
        Some(json!({"device_id": "esp", "schedule_time": schedule_time})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule_status"], json!("scheduled"));
    assert!(body["schedule_id"].as_str().is_some());
    assert!(body["notification_time"].as_str().is_some());
}

#[tokio::test]
async fn test_schedule_delete_lifecycle() {
    let app = setup();
    app.registry.provision_legacy("esp", "s3cret", "alice").unwrap();
    let auth = bearer("tok-a");
    let auth_header = [(auth.0, auth.1.as_str())];

    let future = chrono::Utc::now() + chrono::Duration::minutes(5);
    let (_, body) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &auth_header,
        Some(json!({"device_id": "esp", "schedule_time": wall_clock(&future)})),
    )
    .await;
    let schedule_id = body["schedule_id"].as_str().unwrap().to_string();

    // Deleting while still scheduled succeeds and empties the listing.
    let (status, _) = send(
        &app.router,
        "DELETE",
        &format!("/api/schedules/{schedule_id}"),
        &auth_header,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listing) = send(&app.router, "GET", "/api/schedules", &auth_header, None).await;
    assert_eq!(listing["schedules"].as_array().unwrap().len(), 0);

    // A sent schedule refuses deletion.
    let (_, body) = send(
        &app.router,
        "POST",
        "/api/schedules",
        &auth_header,
        Some(json!({"device_id": "esp", "schedule_time": wall_clock(&future)})),
    )
    .await;
    let schedule_id = body["schedule_id"].as_str().unwrap().to_string();
    app.store
        .set(
            &format!("schedules/{schedule_id}/status"),
            &json!("sent"),
        )
        .unwrap();

    let (status, _) = send(
        &app.router,
        "DELETE",
        &format!("/api/schedules/{schedule_id}"),
        &auth_header,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sharing_endpoints() {
    let app = setup();
    app.registry.provision("esp", "s3cret").unwrap();
    app.registry.register("esp", "alice", "s3cret").unwrap();
    let auth = bearer("tok-a");
    let auth_header = [(auth.0, auth.1.as_str())];

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/devices/esp/users",
        &auth_header,
        Some(json!({"user_email": "bob@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, members) = send(
        &app.router,
        "GET",
        "/api/devices/esp/users",
        &auth_header,
        None,
    )
    .await;
    assert_eq!(members["users"].as_array().unwrap().len(), 2);

    let (status, _) = send(
        &app.router,
        "DELETE",
        "/api/devices/esp/users/bob",
        &auth_header,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Removing yourself as the last member violates the invariant.
    let (status, _) = send(
        &app.router,
        "DELETE",
        "/api/devices/esp/users/alice",
        &auth_header,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_assistant_answers_and_logs_session() {
    let app = setup();
    let auth = bearer("tok-a");
    let auth_header = [(auth.0, auth.1.as_str())];

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/assistant/ask",
        &auth_header,
        Some(json!({"question": "how is my heart rate trending?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], json!("your readings look stable"));

    let session_id = body["session_id"].as_str().unwrap();
    let meta = app
        .store
        .get(&format!("ai_chats/alice/{session_id}/meta"))
        .unwrap()
        .unwrap();
    assert_eq!(
        meta["last_user_message"],
        json!("how is my heart rate trending?")
    );
}

fn wall_clock(at: &chrono::DateTime<chrono::Utc>) -> Value {
    use chrono::{Datelike, Timelike};
    json!({
        "year": at.year(),
        "month": at.month(),
        "day": at.day(),
        "hour": at.hour(),
        "minute": at.minute(),
    })
}
