//! Device ownership, sharing and health-record ingest for PulseOx.
//!
//! Devices are provisioned out-of-band with a fixed identity and secret.
//! Users gain access either through the legacy single-owner field or
//! through per-user bindings; the registry migrates the former into the
//! latter the first time a second user registers. Access control sits in
//! front of every device-scoped operation.

pub mod access;
pub mod model;
pub mod records;
pub mod registry;

pub use access::{AccessControl, AddUserOutcome};
pub use model::{DeviceMember, DeviceRecord, DeviceUserBinding, HealthRecord, UserDeviceSummary};
pub use records::HealthRecords;
pub use registry::{DeviceRegistry, RegistrationOutcome};
