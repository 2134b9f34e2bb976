//! Access control and device sharing.
//!
//! `authorize` is the single gate in front of every device-scoped
//! operation: unknown device surfaces as `NotFound`, a known device the
//! caller is not a member of as `Forbidden`. Sharing mutations keep the
//! at-least-one-member invariant: a removal that would leave a device with
//! no users is rejected.

use serde_json::Value;
use tracing::{info, warn};

use pulseox_core::{Error, IdentityVerifier, Result};
use pulseox_store::push_id::current_millis;
use pulseox_store::ChildOrder;

use crate::model::{DeviceMember, DeviceRecord, UserDeviceSummary};
use crate::registry::{binding_path, device_path, index_path, DeviceRegistry};

/// Outcome of a sharing invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddUserOutcome {
    Added,
    /// The invitee already held a binding; nothing changed.
    AlreadyMember,
}

/// Membership decisions for device-scoped operations.
#[derive(Clone)]
pub struct AccessControl {
    registry: DeviceRegistry,
}

impl AccessControl {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Check that `user_id` may operate on `device_id`.
    ///
    /// Returns the device record so callers do not re-load it. No side
    /// effects.
    pub fn authorize(&self, device_id: &str, user_id: &str) -> Result<DeviceRecord> {
        let device = self.registry.require_device(device_id)?;
        if device.legacy_owner.as_deref() == Some(user_id)
            || self.registry.binding(device_id, user_id)?.is_some()
        {
            return Ok(device);
        }
        Err(Error::Forbidden(
            "you don't have permission to access this device".into(),
        ))
    }

    /// Share a device with another user, identified by email.
    ///
    /// Idempotent when the invitee is already a member.
    pub async fn add_user(
        &self,
        device_id: &str,
        inviter_id: &str,
        invitee_email: &str,
        identity: &dyn IdentityVerifier,
    ) -> Result<AddUserOutcome> {
        let invitee = identity
            .find_by_email(invitee_email)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user with email {invitee_email} not found")))?;

        self.authorize(device_id, inviter_id)?;

        if self.registry.binding(device_id, &invitee.uid)?.is_some() {
            return Ok(AddUserOutcome::AlreadyMember);
        }

        let binding = serde_json::json!({
            "registered_at": current_millis() as i64,
            "added_by": inviter_id,
        });
        self.registry.store().update(vec![
            (binding_path(device_id, &invitee.uid), binding.clone()),
            (index_path(&invitee.uid, device_id), binding),
        ])?;
        info!(device_id, inviter_id, invitee = %invitee.uid, "user added to device");
        Ok(AddUserOutcome::Added)
    }

    /// Remove a member from a device.
    ///
    /// Rejects self-removal of the last remaining member, and any removal
    /// of the legacy owner (ownership transfer is not supported).
    pub fn remove_user(&self, device_id: &str, remover_id: &str, target_id: &str) -> Result<()> {
        let device = self.authorize(device_id, remover_id)?;

        let bindings = self.registry.bindings(device_id)?;
        let total_members = bindings.len() + usize::from(device.legacy_owner.is_some());

        if target_id == remover_id && total_members <= 1 {
            return Err(Error::Forbidden(
                "cannot remove the last user from device".into(),
            ));
        }
        if device.legacy_owner.as_deref() == Some(target_id) {
            return Err(Error::Forbidden(
                "cannot remove the device owner; transfer ownership first".into(),
            ));
        }
        if !bindings.contains_key(target_id) {
            return Err(Error::NotFound(
                "user is not registered to this device".into(),
            ));
        }

        self.registry.store().update(vec![
            (binding_path(device_id, target_id), Value::Null),
            (index_path(target_id, device_id), Value::Null),
        ])?;
        info!(device_id, remover_id, target_id, "user removed from device");
        Ok(())
    }

    /// List a device's members, legacy owner first.
    ///
    /// Emails come from the identity directory; members that no longer
    /// resolve there are skipped.
    pub async fn list_members(
        &self,
        device_id: &str,
        viewer_id: &str,
        identity: &dyn IdentityVerifier,
    ) -> Result<Vec<DeviceMember>> {
        let device = self.authorize(device_id, viewer_id)?;
        let mut members = Vec::new();

        if let Some(owner) = device.legacy_owner.as_deref() {
            match identity.find_by_uid(owner).await? {
                Some(entry) => members.push(DeviceMember {
                    user_id: owner.to_string(),
                    email: entry.email,
                    registered_at: device.registered_at,
                    added_by: None,
                    is_legacy: true,
                }),
                None => warn!(device_id, owner, "legacy owner missing from directory"),
            }
        }

        for (uid, binding) in self.registry.bindings(device_id)? {
            match identity.find_by_uid(&uid).await? {
                Some(entry) => members.push(DeviceMember {
                    user_id: uid,
                    email: entry.email,
                    registered_at: Some(binding.registered_at),
                    added_by: binding.added_by,
                    is_legacy: false,
                }),
                None => continue,
            }
        }
        Ok(members)
    }

    /// List the devices a user participates in: legacy-owned plus shared,
    /// de-duplicated by device id.
    pub fn devices_for_user(&self, user_id: &str) -> Result<Vec<UserDeviceSummary>> {
        let store = self.registry.store();
        let mut devices: Vec<UserDeviceSummary> = Vec::new();

        // Legacy single-owner devices, via the store's ordered-child query.
        let legacy = store.query("devices", &ChildOrder::by("user_id").equal_to(user_id))?;
        for (device_id, value) in legacy {
            let device: DeviceRecord = serde_json::from_value(value)?;
            let bindings = self.registry.bindings(&device_id)?;
            devices.push(UserDeviceSummary {
                device_id,
                registered_at: device.registered_at,
                added_by: None,
                is_legacy: true,
                user_count: bindings.len() + 1,
            });
        }

        // Shared devices, via the maintained reverse index.
        let shared = match store.get(&format!("user_devices/{user_id}"))? {
            Some(Value::Object(map)) => map,
            _ => Default::default(),
        };
        for (device_id, value) in shared {
            if devices.iter().any(|d| d.device_id == device_id) {
                continue;
            }
            let binding: crate::model::DeviceUserBinding = serde_json::from_value(value)?;
            let device = self.registry.require_device(&device_id)?;
            let bindings = self.registry.bindings(&device_id)?;
            devices.push(UserDeviceSummary {
                device_id,
                registered_at: Some(binding.registered_at),
                added_by: binding.added_by,
                is_legacy: false,
                user_count: bindings.len() + usize::from(device.legacy_owner.is_some()),
            });
        }
        Ok(devices)
    }
}
