//! Assistant endpoint: answers questions over the caller's recent
//! readings via the opaque completion collaborator, and logs the exchange.

use axum::extract::State;
use axum::response::Json;
use axum::Extension;
use serde_json::json;
use uuid::Uuid;

use pulseox_core::AuthUser;
use pulseox_store::push_id::current_millis;

use crate::error::ApiError;
use crate::models::{AskBody, AskResponse};
use crate::server::ServerState;

const CONTEXT_RECORDS: usize = 25;

pub async fn ask_handler(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = body
        .question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::invalid_request("missing question"))?;
    let session_id = body
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let records = state.records.list_for_user(&user.uid, CONTEXT_RECORDS)?;
    let mut context = String::from("Recent readings (newest first):\n");
    if records.is_empty() {
        context.push_str("none\n");
    }
    for (_, record) in &records {
        context.push_str(&format!(
            "- ts={} heart_rate={} spo2={} device={}\n",
            record.ts, record.heart_rate, record.spo2, record.device_id
        ));
    }
    let prompt = format!(
        "You are a health-monitoring assistant. Answer the user's question \
         using their heart-rate and SpO2 history below.\n\n{context}\nQuestion: {question}"
    );

    let reply = state.generator.complete(&prompt).await?;

    // Log both turns and the session meta in one atomic update, reserving
    // the message keys first so they stay chronologically ordered.
    let messages_path = format!("ai_chats/{}/{}/messages", user.uid, session_id);
    let key_user = state
        .store
        .push(&messages_path, &json!({ "_reserved": true }))?;
    let key_reply = state
        .store
        .push(&messages_path, &json!({ "_reserved": true }))?;
    let now = current_millis() as i64;
    state.store.update(vec![
        (
            format!("{messages_path}/{key_user}"),
            json!({ "role": "user", "content": question, "ts": now }),
        ),
        (
            format!("{messages_path}/{key_reply}"),
            json!({ "role": "assistant", "content": reply, "ts": now + 1 }),
        ),
        (
            format!("ai_chats/{}/{}/meta", user.uid, session_id),
            json!({ "last_updated": now + 1, "last_user_message": question }),
        ),
    ])?;

    Ok(Json(AskResponse { reply, session_id }))
}
