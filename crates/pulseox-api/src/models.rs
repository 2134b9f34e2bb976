//! Request and response bodies.

use serde::{Deserialize, Serialize};

use pulseox_devices::HealthRecord;
use pulseox_notify::{Schedule, ScheduleTime};

/// Device-posted reading. `hr` is the legacy alias for `heart_rate`.
#[derive(Debug, Deserialize)]
pub struct PostRecordBody {
    pub spo2: Option<f64>,
    pub heart_rate: Option<f64>,
    pub hr: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PostRecordResponse {
    pub status: &'static str,
    pub key: String,
}

/// A reading with its feed key, as listed back to users.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub id: String,
    #[serde(flatten)]
    pub record: HealthRecord,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceBody {
    pub device_id: Option<String>,
    pub device_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberBody {
    pub user_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleBody {
    pub device_id: Option<String>,
    pub schedule_time: Option<ScheduleTime>,
}

#[derive(Debug, Serialize)]
pub struct CreateScheduleResponse {
    pub status: &'static str,
    pub schedule_id: String,
    pub schedule_status: pulseox_notify::ScheduleStatus,
    /// The computed UTC fire instant, ISO-8601.
    pub notification_time: String,
}

/// A schedule with its id, as listed back to users.
#[derive(Debug, Serialize)]
pub struct ScheduleView {
    pub id: String,
    #[serde(flatten)]
    pub schedule: Schedule,
}

#[derive(Debug, Deserialize)]
pub struct AskBody {
    pub question: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub reply: String,
    pub session_id: String,
}
