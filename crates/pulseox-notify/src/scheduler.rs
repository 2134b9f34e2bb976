//! Precise-timer notification scheduler.
//!
//! One tokio task per non-terminal schedule sleeps until the fire instant,
//! then re-checks that the schedule still exists and is still `scheduled`
//! before handing it to the dispatcher. Armed timers are re-created from
//! the store on startup; a schedule found overdue beyond the grace window
//! is marked failed and never retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulseox_core::Result;

use crate::dispatcher::NotificationDispatcher;
use crate::schedule::{ScheduleStatus, ScheduleStore};

/// Arms and cancels per-schedule timers.
pub struct NotificationScheduler {
    schedules: ScheduleStore,
    dispatcher: Arc<NotificationDispatcher>,
    timers: DashMap<String, JoinHandle<()>>,
    /// How late a fire may run and still be dispatched.
    grace: Duration,
}

impl NotificationScheduler {
    pub fn new(
        schedules: ScheduleStore,
        dispatcher: Arc<NotificationDispatcher>,
        grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            schedules,
            dispatcher,
            timers: DashMap::new(),
            grace,
        })
    }

    /// Arm a timer for a schedule. Re-arming an id replaces its timer.
    pub fn arm(self: &Arc<Self>, schedule_id: &str, fire_at: DateTime<Utc>) {
        let scheduler = Arc::clone(self);
        let id = schedule_id.to_string();
        let handle = tokio::spawn(async move {
            let delay = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            scheduler.fire(&id).await;
            scheduler.timers.remove(&id);
        });

        debug!(schedule_id, %fire_at, "timer armed");
        if let Some(previous) = self.timers.insert(schedule_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancel the armed timer for a schedule, if any.
    pub fn cancel(&self, schedule_id: &str) {
        if let Some((_, handle)) = self.timers.remove(schedule_id) {
            handle.abort();
            debug!(schedule_id, "timer cancelled");
        }
    }

    /// Number of currently armed timers.
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Re-arm every non-terminal schedule from the store. Overdue ones
    /// within the grace window fire immediately; beyond it they are marked
    /// failed (at-most-once, no retry).
    pub fn rearm_pending(self: &Arc<Self>) -> Result<usize> {
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.grace).unwrap_or_else(|_| {
            chrono::Duration::seconds(60)
        });
        let mut armed = 0;

        for (id, schedule) in self.schedules.pending()? {
            if schedule.status != ScheduleStatus::Scheduled {
                continue;
            }
            if schedule.notification_time_utc + grace < now {
                warn!(schedule_id = %id, fire_at = %schedule.notification_time_utc, "schedule missed its fire window");
                self.schedules
                    .mark_failed(&id, "missed fire window while scheduler was offline")?;
                continue;
            }
            self.arm(&id, schedule.notification_time_utc);
            armed += 1;
        }
        info!(armed, "schedules re-armed");
        Ok(armed)
    }

    /// Abort every armed timer.
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }

    /// Timer body: verify the schedule is still live, then dispatch.
    async fn fire(&self, schedule_id: &str) {
        match self.schedules.get(schedule_id) {
            Ok(Some(schedule)) if schedule.status == ScheduleStatus::Scheduled => {
                self.dispatcher
                    .dispatch(schedule_id, &schedule.device_id)
                    .await;
            }
            Ok(_) => {
                debug!(schedule_id, "stale timer fired for deleted or terminal schedule");
            }
            Err(e) => {
                warn!(schedule_id, error = %e, "failed to load schedule at fire time");
            }
        }
    }
}
