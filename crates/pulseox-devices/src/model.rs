//! Stored documents and API-facing views for devices and records.

use serde::{Deserialize, Serialize};

/// A provisioned device document (`devices/{device_id}`).
///
/// The secret is set at provisioning time and never rewritten. `user_id`
/// is the pre-sharing single-owner field; it is cleared when the device
/// migrates to per-user bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub secret: String,

    /// Legacy single owner, present only on devices provisioned before
    /// multi-user sharing.
    #[serde(default, rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub legacy_owner: Option<String>,

    /// First-registration timestamp (ms epoch), set once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<i64>,
}

/// A per-user access grant (`device_users/{device_id}/{user_id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUserBinding {
    /// When this user gained access (ms epoch).
    pub registered_at: i64,

    /// The inviting user, absent for the original owner and for
    /// self-registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

/// One member in a device's user listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMember {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    pub is_legacy: bool,
}

/// One device in a user's device listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDeviceSummary {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    pub is_legacy: bool,
    pub user_count: usize,
}

/// A sensor reading (`records/{key}` and `user_records/{user}/{key}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub device_id: String,
    pub spo2: f64,
    pub heart_rate: f64,
    /// Server-stamped timestamp (ms epoch).
    pub ts: i64,
}
