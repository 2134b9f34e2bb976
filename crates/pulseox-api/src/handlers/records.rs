//! Health-record endpoints.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::Extension;
use serde::Deserialize;

use pulseox_core::AuthUser;

use crate::auth::{authenticate_device, optional_user_header};
use crate::error::ApiError;
use crate::models::{PostRecordBody, PostRecordResponse, RecordView};
use crate::server::ServerState;

/// Device-authenticated reading ingest.
///
/// The server stamps the timestamp and resolves the owning user from the
/// optional `X-User-Id` header (validated against the sharing bindings)
/// or the legacy single-owner field.
pub async fn post_record_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<PostRecordBody>,
) -> Result<Json<PostRecordResponse>, ApiError> {
    let device_id = authenticate_device(&state, &headers)?;

    let spo2 = body.spo2;
    let heart_rate = body.heart_rate.or(body.hr);
    let (spo2, heart_rate) = match (spo2, heart_rate) {
        (Some(s), Some(h)) => (s, h),
        _ => return Err(ApiError::invalid_request("missing spo2 or heart_rate")),
    };

    let user_id = state
        .records
        .resolve_posting_user(&device_id, optional_user_header(&headers).as_deref())?;
    let key = state.records.ingest(&device_id, &user_id, spo2, heart_rate)?;

    Ok(Json(PostRecordResponse { status: "ok", key }))
}

#[derive(Debug, Deserialize)]
pub struct ListRecordsQuery {
    pub limit: Option<usize>,
}

/// A user's reading history, newest first.
pub async fn list_records_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<Json<Vec<RecordView>>, ApiError> {
    let limit = query.limit.unwrap_or(1000);
    let records = state.records.list_for_user(&user.uid, limit)?;
    let views = records
        .into_iter()
        .map(|(id, record)| RecordView { id, record })
        .collect();
    Ok(Json(views))
}
