//! Schedule documents and their store.
//!
//! A schedule's fire time is computed once at creation by localizing the
//! requested wall-clock in the owner's timezone and converting to UTC.
//! Status moves `scheduled -> sent | failed`; both terminal states carry a
//! diagnostic message and are written as one atomic multi-field update.

use std::sync::Arc;

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use pulseox_core::{Error, Result};
use pulseox_store::push_id::current_millis;
use pulseox_store::{ChildOrder, TreeStore};

/// Requested wall-clock fire time, interpreted in the owner's timezone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScheduleTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

/// Schedule lifecycle status. `scheduled` is the sole non-terminal state;
/// `pending` is accepted when reading documents written by earlier
/// deployments and is never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    #[serde(alias = "pending")]
    Scheduled,
    Sent,
    Failed,
}

/// A persisted reminder job (`schedules/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub user_id: String,
    pub device_id: String,
    pub scheduled_time: ScheduleTime,
    /// Creation timestamp (ms epoch).
    pub created_at: i64,
    pub status: ScheduleStatus,
    /// The absolute UTC fire instant.
    pub notification_time_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
}

fn schedule_path(schedule_id: &str) -> String {
    format!("schedules/{schedule_id}")
}

/// Localize a wall-clock in `tz` and convert to UTC.
///
/// Ambiguous local times (DST fold) resolve to the earlier instant;
/// nonexistent ones (DST gap, or an invalid date) are rejected.
pub fn compute_fire_time(time: &ScheduleTime, tz: Tz) -> Result<DateTime<Utc>> {
    match tz.with_ymd_and_hms(time.year, time.month, time.day, time.hour, time.minute, 0) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(Error::InvalidRequest(format!(
            "invalid date/time: {:04}-{:02}-{:02} {:02}:{:02} does not exist in {tz}",
            time.year, time.month, time.day, time.hour, time.minute
        ))),
    }
}

/// The owner's stored timezone, defaulting to UTC when absent or invalid.
pub fn user_timezone(store: &dyn TreeStore, user_id: &str) -> Tz {
    match store.get(&format!("user_profiles/{user_id}/timezone")) {
        Ok(Some(serde_json::Value::String(name))) => name.parse().unwrap_or_else(|_| {
            warn!(user_id, timezone = %name, "unknown timezone, falling back to UTC");
            Tz::UTC
        }),
        _ => Tz::UTC,
    }
}

/// Typed access to the `schedules/` collection.
#[derive(Clone)]
pub struct ScheduleStore {
    store: Arc<dyn TreeStore>,
}

impl ScheduleStore {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Persist a new schedule. The fire instant must be strictly in the
    /// future at creation time.
    pub fn create(
        &self,
        user_id: &str,
        device_id: &str,
        time: ScheduleTime,
        tz: Tz,
    ) -> Result<(String, Schedule)> {
        let fire_at = compute_fire_time(&time, tz)?;
        let now = Utc::now();
        if fire_at <= now {
            return Err(Error::InvalidRequest(
                "scheduled time must be in the future".into(),
            ));
        }

        let schedule = Schedule {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            scheduled_time: time,
            created_at: now.timestamp_millis(),
            status: ScheduleStatus::Scheduled,
            notification_time_utc: fire_at,
            status_message: None,
            status_updated_at: None,
            sent_at: None,
        };
        let id = self
            .store
            .push("schedules", &serde_json::to_value(&schedule)?)?;
        Ok((id, schedule))
    }

    pub fn get(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        match self.store.get(&schedule_path(schedule_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// A user's schedules, newest first.
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<(String, Schedule)>> {
        let rows = self
            .store
            .query("schedules", &ChildOrder::by("user_id").equal_to(user_id))?;
        Self::into_sorted(rows, limit)
    }

    /// A user's schedules for one device, newest first.
    pub fn list_for_device(
        &self,
        device_id: &str,
        user_id: &str,
    ) -> Result<Vec<(String, Schedule)>> {
        let rows = self
            .store
            .query("schedules", &ChildOrder::by("device_id").equal_to(device_id))?;
        let rows = rows
            .into_iter()
            .filter(|(_, v)| v.get("user_id").and_then(|u| u.as_str()) == Some(user_id))
            .collect();
        Self::into_sorted(rows, usize::MAX)
    }

    fn into_sorted(
        rows: Vec<(String, serde_json::Value)>,
        limit: usize,
    ) -> Result<Vec<(String, Schedule)>> {
        let mut schedules = Vec::with_capacity(rows.len());
        for (id, value) in rows {
            schedules.push((id, serde_json::from_value::<Schedule>(value)?));
        }
        schedules.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
        schedules.truncate(limit);
        Ok(schedules)
    }

    /// All non-terminal schedules (including legacy `pending` documents).
    pub fn pending(&self) -> Result<Vec<(String, Schedule)>> {
        let mut rows = self
            .store
            .query("schedules", &ChildOrder::by("status").equal_to("scheduled"))?;
        rows.extend(
            self.store
                .query("schedules", &ChildOrder::by("status").equal_to("pending"))?,
        );
        let mut pending = Vec::with_capacity(rows.len());
        for (id, value) in rows {
            pending.push((id, serde_json::from_value::<Schedule>(value)?));
        }
        Ok(pending)
    }

    /// Delete a schedule on behalf of its owner.
    ///
    /// Only the owner may delete; a schedule that has already been sent
    /// stays as an audit record.
    pub fn delete(&self, schedule_id: &str, user_id: &str) -> Result<Schedule> {
        let schedule = self
            .get(schedule_id)?
            .ok_or_else(|| Error::schedule_not_found(schedule_id))?;
        if schedule.user_id != user_id {
            return Err(Error::Forbidden(
                "you don't have permission to delete this schedule".into(),
            ));
        }
        if schedule.status == ScheduleStatus::Sent {
            return Err(Error::Conflict(
                "cannot delete a schedule that has already been sent".into(),
            ));
        }
        self.store.delete(&schedule_path(schedule_id))?;
        Ok(schedule)
    }

    /// Record a successful dispatch. Returns false (and writes nothing)
    /// when the schedule no longer exists or already left `scheduled`.
    pub fn mark_sent(&self, schedule_id: &str, message: &str) -> Result<bool> {
        self.transition(schedule_id, ScheduleStatus::Sent, message)
    }

    /// Record a failed dispatch, same no-op rule as [`Self::mark_sent`].
    pub fn mark_failed(&self, schedule_id: &str, message: &str) -> Result<bool> {
        self.transition(schedule_id, ScheduleStatus::Failed, message)
    }

    fn transition(&self, schedule_id: &str, status: ScheduleStatus, message: &str) -> Result<bool> {
        // Re-check the precondition right before the final write so a
        // deletion or a competing transition turns this into a no-op.
        match self.get(schedule_id)? {
            Some(s) if s.status == ScheduleStatus::Scheduled => {}
            _ => return Ok(false),
        }

        let now = current_millis() as i64;
        let path = schedule_path(schedule_id);
        let mut ops = vec![
            (format!("{path}/status"), serde_json::to_value(status)?),
            (format!("{path}/status_message"), json!(message)),
            (format!("{path}/status_updated_at"), json!(now)),
        ];
        if status == ScheduleStatus::Sent {
            ops.push((format!("{path}/sent_at"), json!(now)));
        }
        self.store.update(ops)?;
        Ok(true)
    }
}
