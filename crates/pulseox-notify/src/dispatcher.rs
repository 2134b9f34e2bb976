//! Notification dispatch.
//!
//! Delivers one message per fired schedule to the device's topic (the
//! device identity, verbatim) and owns the terminal status write, so the
//! stored message reflects the transport-level outcome. The payload is the
//! dispatch timestamp in epoch milliseconds, which is what the devices
//! expect.

use std::sync::Arc;

use tracing::{error, info};

use pulseox_core::Result;
use pulseox_store::push_id::current_millis;

use crate::broker::NotificationTransport;
use crate::schedule::ScheduleStore;

/// Publishes notifications and records their outcome.
pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
    schedules: ScheduleStore,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>, schedules: ScheduleStore) -> Self {
        Self {
            transport,
            schedules,
        }
    }

    /// Dispatch a fired schedule: publish, then write exactly one terminal
    /// status. A schedule deleted mid-flight makes the write a no-op.
    pub async fn dispatch(&self, schedule_id: &str, device_id: &str) {
        self.transport.ensure_subscribed(device_id).await;

        let payload = current_millis().to_string();
        let outcome = self.transport.send(device_id, &payload).await;

        let result = match outcome {
            Ok(()) => {
                info!(schedule_id, device_id, "notification delivered");
                self.schedules
                    .mark_sent(schedule_id, "notification delivered")
            }
            Err(e) => {
                error!(schedule_id, device_id, error = %e, "notification failed");
                self.schedules.mark_failed(schedule_id, &e.to_string())
            }
        };
        if let Err(e) = result {
            error!(schedule_id, error = %e, "failed to record dispatch outcome");
        }
    }

    /// Synchronous dispatch for the test-notification endpoint: same
    /// transport, no store write, failure surfaces to the caller.
    pub async fn send_test(&self, device_id: &str) -> Result<()> {
        self.transport.ensure_subscribed(device_id).await;
        let payload = current_millis().to_string();
        self.transport.send(device_id, &payload).await
    }
}
