//! Server state and router.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use pulseox_core::{IdentityVerifier, TextGenerator};
use pulseox_devices::{AccessControl, DeviceRegistry, HealthRecords};
use pulseox_notify::NotificationService;
use pulseox_store::TreeStore;

use crate::auth::bearer_auth_middleware;
use crate::handlers::{assistant, basic, devices, records, schedules};

const MAX_REQUEST_BODY_SIZE: usize = 256 * 1024;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn TreeStore>,
    pub registry: DeviceRegistry,
    pub access: AccessControl,
    pub records: HealthRecords,
    pub notifications: Arc<NotificationService>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub generator: Arc<dyn TextGenerator>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn TreeStore>,
        notifications: Arc<NotificationService>,
        identity: Arc<dyn IdentityVerifier>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let registry = DeviceRegistry::new(store.clone());
        let access = AccessControl::new(registry.clone());
        let records = HealthRecords::new(registry.clone());
        Self {
            store,
            registry,
            access,
            records,
            notifications,
            identity,
            generator,
        }
    }
}

/// Build the application router.
pub fn create_router(state: ServerState) -> Router {
    // Public routes (no authentication).
    let public_routes = Router::new().route("/api/health", get(basic::health_handler));

    // Device-authenticated ingest (id/secret headers, checked in-handler).
    let device_routes = Router::new().route("/api/records", post(records::post_record_handler));

    // Bearer-authenticated user routes.
    let user_routes = Router::new()
        .route("/api/records", get(records::list_records_handler))
        .route("/api/devices/register", post(devices::register_device_handler))
        .route("/api/devices", get(devices::list_devices_handler))
        .route("/api/devices/:device_id/users", get(devices::list_members_handler))
        .route("/api/devices/:device_id/users", post(devices::add_member_handler))
        .route(
            "/api/devices/:device_id/users/:user_id",
            delete(devices::remove_member_handler),
        )
        .route(
            "/api/devices/:device_id/test-notification",
            post(devices::test_notification_handler),
        )
        .route("/api/schedules", post(schedules::create_schedule_handler))
        .route("/api/schedules", get(schedules::list_schedules_handler))
        .route(
            "/api/schedules/device/:device_id",
            get(schedules::list_device_schedules_handler),
        )
        .route(
            "/api/schedules/:schedule_id",
            delete(schedules::delete_schedule_handler),
        )
        .route("/api/assistant/ask", post(assistant::ask_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(device_routes)
        .merge(user_routes)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
