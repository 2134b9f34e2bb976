//! Schedule endpoints.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

use pulseox_core::AuthUser;

use crate::error::ApiError;
use crate::models::{CreateScheduleBody, CreateScheduleResponse, ScheduleView};
use crate::server::ServerState;

/// Create a reminder schedule for a device the caller controls.
pub async fn create_schedule_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateScheduleBody>,
) -> Result<Json<CreateScheduleResponse>, ApiError> {
    let (device_id, time) = match (body.device_id, body.schedule_time) {
        (Some(d), Some(t)) => (d, t),
        _ => return Err(ApiError::invalid_request("missing device_id or schedule_time")),
    };

    // Access is checked before anything is persisted.
    state.access.authorize(&device_id, &user.uid)?;

    let (schedule_id, schedule) = state
        .notifications
        .create_schedule(&user.uid, &device_id, time)
        .await?;

    Ok(Json(CreateScheduleResponse {
        status: "ok",
        schedule_id,
        schedule_status: schedule.status,
        notification_time: schedule.notification_time_utc.to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    pub limit: Option<usize>,
}

/// The caller's schedules, newest first.
pub async fn list_schedules_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListSchedulesQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(100);
    let schedules = state
        .notifications
        .schedules()
        .list_for_user(&user.uid, limit)?;
    let views: Vec<ScheduleView> = schedules
        .into_iter()
        .map(|(id, schedule)| ScheduleView { id, schedule })
        .collect();
    Ok(Json(json!({ "schedules": views })))
}

/// The caller's schedules for one device.
pub async fn list_device_schedules_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.access.authorize(&device_id, &user.uid)?;

    let schedules = state
        .notifications
        .schedules()
        .list_for_device(&device_id, &user.uid)?;
    let views: Vec<ScheduleView> = schedules
        .into_iter()
        .map(|(id, schedule)| ScheduleView { id, schedule })
        .collect();
    Ok(Json(json!({ "device_id": device_id, "schedules": views })))
}

/// Delete a schedule that has not been sent yet.
pub async fn delete_schedule_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(schedule_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.notifications.delete_schedule(&schedule_id, &user.uid)?;
    Ok(Json(json!({
        "status": "ok",
        "message": "schedule deleted successfully",
    })))
}
