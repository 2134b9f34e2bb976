//! Schedule-to-notification delivery pipeline for PulseOx.
//!
//! A schedule is a persisted reminder job targeting one device at an
//! absolute UTC instant. The scheduler arms one timer per non-terminal
//! schedule and re-arms them from the store on startup; when a timer
//! fires, the dispatcher publishes to the device's MQTT topic over a
//! persistent, reconnecting broker connection (with a one-shot fallback)
//! and records the terminal status back into the store.
//!
//! All long-lived state hangs off [`NotificationService`], constructed
//! once at process start with an explicit `start()`/`stop()` lifecycle.

pub mod broker;
pub mod dispatcher;
pub mod schedule;
pub mod scheduler;
pub mod service;

pub use broker::{BrokerConfig, BrokerConnectionManager, NotificationTransport};
pub use dispatcher::NotificationDispatcher;
pub use schedule::{Schedule, ScheduleStatus, ScheduleStore, ScheduleTime};
pub use scheduler::NotificationScheduler;
pub use service::NotificationService;
