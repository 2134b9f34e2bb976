//! Device registry over the document store.
//!
//! Owns the `devices/{id}` and `device_users/{id}/{uid}` paths plus the
//! `user_devices/{uid}/{id}` reverse index. Every mutation that touches a
//! binding also maintains the index in the same atomic update.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use pulseox_core::{Error, Result};
use pulseox_store::push_id::current_millis;
use pulseox_store::TreeStore;

use crate::model::{DeviceRecord, DeviceUserBinding};

pub(crate) fn device_path(device_id: &str) -> String {
    format!("devices/{device_id}")
}

pub(crate) fn bindings_path(device_id: &str) -> String {
    format!("device_users/{device_id}")
}

pub(crate) fn binding_path(device_id: &str, user_id: &str) -> String {
    format!("device_users/{device_id}/{user_id}")
}

pub(crate) fn index_path(user_id: &str, device_id: &str) -> String {
    format!("user_devices/{user_id}/{device_id}")
}

/// Outcome of a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new binding was created for the caller.
    Registered,
    /// The caller already held a binding; nothing changed.
    AlreadyRegistered,
}

/// Registry of provisioned devices and their user bindings.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn TreeStore>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    pub(crate) fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Seed a device record. Provisioning happens out-of-band; user
    /// requests never create devices.
    pub fn provision(&self, device_id: &str, secret: &str) -> Result<()> {
        self.store
            .set(&device_path(device_id), &json!({ "secret": secret }))?;
        Ok(())
    }

    /// Seed a pre-sharing device owned by a single user.
    pub fn provision_legacy(&self, device_id: &str, secret: &str, owner: &str) -> Result<()> {
        self.store.set(
            &device_path(device_id),
            &json!({ "secret": secret, "user_id": owner }),
        )?;
        Ok(())
    }

    /// Load a device record, if provisioned.
    pub fn device(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        match self.store.get(&device_path(device_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Load a device record or fail with `NotFound`.
    pub fn require_device(&self, device_id: &str) -> Result<DeviceRecord> {
        self.device(device_id)?
            .ok_or_else(|| Error::device_not_found(device_id))
    }

    /// Load a device and check its secret byte-exact.
    pub fn verify_secret(&self, device_id: &str, supplied: &str) -> Result<DeviceRecord> {
        let device = self.require_device(device_id)?;
        if device.secret != supplied {
            return Err(Error::Unauthorized("invalid device credentials".into()));
        }
        Ok(device)
    }

    /// All bindings for a device, keyed by user id.
    pub fn bindings(&self, device_id: &str) -> Result<BTreeMap<String, DeviceUserBinding>> {
        match self.store.get(&bindings_path(device_id))? {
            Some(Value::Object(map)) => {
                let mut bindings = BTreeMap::new();
                for (uid, value) in map {
                    bindings.insert(uid, serde_json::from_value(value)?);
                }
                Ok(bindings)
            }
            _ => Ok(BTreeMap::new()),
        }
    }

    /// A single binding, if present.
    pub fn binding(&self, device_id: &str, user_id: &str) -> Result<Option<DeviceUserBinding>> {
        match self.store.get(&binding_path(device_id, user_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Register a user against a device they hold the secret for.
    ///
    /// Idempotent for an already-bound user. The first registration by a
    /// second distinct user migrates the legacy single-owner field into a
    /// binding (preserving the owner's original timestamp) and clears it,
    /// together with the new binding, in one atomic update.
    pub fn register(
        &self,
        device_id: &str,
        user_id: &str,
        supplied_secret: &str,
    ) -> Result<RegistrationOutcome> {
        let device = self.verify_secret(device_id, supplied_secret)?;

        if self.binding(device_id, user_id)?.is_some() {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        let now = current_millis() as i64;
        let mut ops: Vec<(String, Value)> = Vec::new();

        if let Some(owner) = device.legacy_owner.as_deref() {
            if owner != user_id {
                let owner_binding = json!({
                    "registered_at": device.registered_at.unwrap_or(now),
                });
                ops.push((binding_path(device_id, owner), owner_binding.clone()));
                ops.push((index_path(owner, device_id), owner_binding));
                ops.push((format!("{}/user_id", device_path(device_id)), Value::Null));
                info!(device_id, owner, "migrating legacy owner to shared binding");
            }
        }

        let binding = json!({ "registered_at": now });
        ops.push((binding_path(device_id, user_id), binding.clone()));
        ops.push((index_path(user_id, device_id), binding));

        if device.registered_at.is_none() {
            ops.push((
                format!("{}/registered_at", device_path(device_id)),
                json!(now),
            ));
        }

        self.store.update(ops)?;
        info!(device_id, user_id, "device registered");
        Ok(RegistrationOutcome::Registered)
    }
}
