//! Health-record ingest and per-user history.
//!
//! Devices post readings over the device-authenticated path; the server
//! stamps the timestamp and fans the record out to the global feed and the
//! owning user's feed in one atomic update.

use serde_json::json;
use tracing::debug;

use pulseox_core::{Error, Result};
use pulseox_store::push_id::current_millis;
use pulseox_store::ChildOrder;

use crate::model::HealthRecord;
use crate::registry::DeviceRegistry;

/// Record ingest and queries.
#[derive(Clone)]
pub struct HealthRecords {
    registry: DeviceRegistry,
}

impl HealthRecords {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    /// Resolve which user a device-authenticated post writes for.
    ///
    /// An explicit user id must be a member (binding, or legacy owner as
    /// fallback). Without one, the legacy owner is used; a device bound to
    /// no one cannot accept records yet.
    pub fn resolve_posting_user(
        &self,
        device_id: &str,
        explicit_user: Option<&str>,
    ) -> Result<String> {
        match explicit_user {
            Some(uid) => {
                if self.registry.binding(device_id, uid)?.is_some() {
                    return Ok(uid.to_string());
                }
                let device = self.registry.require_device(device_id)?;
                if device.legacy_owner.as_deref() == Some(uid) {
                    return Ok(uid.to_string());
                }
                Err(Error::Unauthorized("user not allowed for this device".into()))
            }
            None => {
                let device = self.registry.require_device(device_id)?;
                device.legacy_owner.ok_or_else(|| {
                    Error::Conflict("device is not yet registered to any user".into())
                })
            }
        }
    }

    /// Store one reading, fanning out to `records/` and
    /// `user_records/{user}/` atomically. Returns the generated key.
    pub fn ingest(
        &self,
        device_id: &str,
        user_id: &str,
        spo2: f64,
        heart_rate: f64,
    ) -> Result<String> {
        let store = self.registry.store();

        let record = HealthRecord {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            spo2,
            heart_rate,
            ts: current_millis() as i64,
        };
        let value = serde_json::to_value(&record)?;

        // Reserve a key, then write both feed locations in one update.
        let key = store.push("records", &json!({ "_reserved": true }))?;
        store.update(vec![
            (format!("records/{key}"), value.clone()),
            (format!("user_records/{user_id}/{key}"), value),
        ])?;

        debug!(device_id, user_id, key, "record ingested");
        Ok(key)
    }

    /// The user's most recent readings, newest first.
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<(String, HealthRecord)>> {
        let rows = self.registry.store().query(
            &format!("user_records/{user_id}"),
            &ChildOrder::by("ts").limit_to_last(limit),
        )?;
        let mut records = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            // Skip reservation placeholders that never got overwritten.
            if value.get("ts").is_none() {
                continue;
            }
            records.push((key, serde_json::from_value(value)?));
        }
        records.reverse();
        Ok(records)
    }
}
