//! Device registration, sharing and test-notification endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::Extension;
use serde_json::{json, Value};

use pulseox_core::AuthUser;
use pulseox_devices::RegistrationOutcome;

use crate::error::ApiError;
use crate::models::{AddMemberBody, RegisterDeviceBody, StatusResponse};
use crate::server::ServerState;

/// Register the caller against a device they hold the secret for.
pub async fn register_device_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<RegisterDeviceBody>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (device_id, secret) = match (body.device_id, body.device_secret) {
        (Some(d), Some(s)) => (d, s),
        _ => return Err(ApiError::invalid_request("missing device_id or device_secret")),
    };

    let outcome = state.registry.register(&device_id, &user.uid, &secret)?;
    let message = match outcome {
        RegistrationOutcome::Registered => "device registered successfully",
        RegistrationOutcome::AlreadyRegistered => "device already registered to this user",
    };
    Ok(Json(StatusResponse {
        status: "ok",
        message: message.to_string(),
    }))
}

/// The caller's devices: legacy-owned plus shared, de-duplicated.
pub async fn list_devices_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let devices = state.access.devices_for_user(&user.uid)?;
    Ok(Json(json!({ "devices": devices })))
}

/// Members of one device, legacy owner first.
pub async fn list_members_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let members = state
        .access
        .list_members(&device_id, &user.uid, state.identity.as_ref())
        .await?;
    Ok(Json(json!({ "device_id": device_id, "users": members })))
}

/// Share a device with another user by email.
pub async fn add_member_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(device_id): Path<String>,
    Json(body): Json<AddMemberBody>,
) -> Result<Json<StatusResponse>, ApiError> {
    let email = body
        .user_email
        .ok_or_else(|| ApiError::invalid_request("missing user_email"))?;

    state
        .access
        .add_user(&device_id, &user.uid, &email, state.identity.as_ref())
        .await?;
    Ok(Json(StatusResponse {
        status: "ok",
        message: format!("user {email} added to device successfully"),
    }))
}

/// Remove a member from a device.
pub async fn remove_member_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path((device_id, target_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.access.remove_user(&device_id, &user.uid, &target_id)?;
    Ok(Json(StatusResponse {
        status: "ok",
        message: "user removed from device successfully".to_string(),
    }))
}

/// Synchronous dispatch-and-wait, for verifying a device's broker path.
/// Bounded by the transport timeouts; failures surface as 502.
pub async fn test_notification_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.access.authorize(&device_id, &user.uid)?;
    state.notifications.send_test(&device_id).await?;
    Ok(Json(StatusResponse {
        status: "ok",
        message: "test notification sent successfully".to_string(),
    }))
}
