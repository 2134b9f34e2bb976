//! The long-lived notification service.
//!
//! Bundles the broker connection, dispatcher and scheduler into one object
//! with an explicit lifecycle. The process constructs exactly one instance
//! and injects it wherever schedules are created or messages published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use pulseox_core::Result;
use pulseox_store::TreeStore;

use crate::broker::{BrokerConfig, BrokerConnectionManager, NotificationTransport};
use crate::dispatcher::NotificationDispatcher;
use crate::schedule::{user_timezone, Schedule, ScheduleStore, ScheduleTime};
use crate::scheduler::NotificationScheduler;

/// Owns the schedule-to-notification pipeline.
pub struct NotificationService {
    schedules: ScheduleStore,
    scheduler: Arc<NotificationScheduler>,
    dispatcher: Arc<NotificationDispatcher>,
    transport: Arc<dyn NotificationTransport>,
    broker: Option<Arc<BrokerConnectionManager>>,
    started: AtomicBool,
}

impl NotificationService {
    /// Build the production pipeline on top of the given store and broker.
    pub fn new(store: Arc<dyn TreeStore>, broker_config: BrokerConfig, grace: Duration) -> Arc<Self> {
        let broker = BrokerConnectionManager::new(broker_config);
        let transport = broker.clone() as Arc<dyn NotificationTransport>;
        let schedules = ScheduleStore::new(store);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            transport.clone(),
            schedules.clone(),
        ));
        let scheduler = NotificationScheduler::new(schedules.clone(), dispatcher.clone(), grace);

        Arc::new(Self {
            schedules,
            scheduler,
            dispatcher,
            transport,
            broker: Some(broker),
            started: AtomicBool::new(false),
        })
    }

    /// Build the pipeline with a custom transport (tests).
    pub fn with_transport(
        store: Arc<dyn TreeStore>,
        transport: Arc<dyn NotificationTransport>,
        grace: Duration,
    ) -> Arc<Self> {
        let schedules = ScheduleStore::new(store);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            transport.clone(),
            schedules.clone(),
        ));
        let scheduler = NotificationScheduler::new(schedules.clone(), dispatcher.clone(), grace);

        Arc::new(Self {
            schedules,
            scheduler,
            dispatcher,
            transport,
            broker: None,
            started: AtomicBool::new(false),
        })
    }

    /// Connect to the broker and re-arm persisted schedules.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(broker) = &self.broker {
            broker.start().await;
        }
        let armed = self.scheduler.rearm_pending()?;
        info!(armed, "notification service started");
        Ok(())
    }

    /// Cancel timers and close the broker connection.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown();
        if let Some(broker) = &self.broker {
            broker.stop().await;
        }
        info!("notification service stopped");
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.schedules
    }

    pub fn scheduler(&self) -> &Arc<NotificationScheduler> {
        &self.scheduler
    }

    /// Create a schedule for an already-authorized user and arm its timer.
    ///
    /// The wall-clock is interpreted in the owner's stored timezone
    /// (UTC when absent) and must produce a future instant. The device id
    /// is added to the broker subscription set at creation time.
    pub async fn create_schedule(
        &self,
        user_id: &str,
        device_id: &str,
        time: ScheduleTime,
    ) -> Result<(String, Schedule)> {
        let tz = user_timezone(self.schedules.store().as_ref(), user_id);
        let (id, schedule) = self.schedules.create(user_id, device_id, time, tz)?;
        self.transport.ensure_subscribed(device_id).await;
        self.scheduler.arm(&id, schedule.notification_time_utc);
        Ok((id, schedule))
    }

    /// Delete a non-terminal schedule and cancel its timer.
    pub fn delete_schedule(&self, schedule_id: &str, user_id: &str) -> Result<()> {
        self.schedules.delete(schedule_id, user_id)?;
        self.scheduler.cancel(schedule_id);
        Ok(())
    }

    /// Synchronous test dispatch for an already-authorized caller.
    pub async fn send_test(&self, device_id: &str) -> Result<()> {
        self.dispatcher.send_test(device_id).await
    }
}
