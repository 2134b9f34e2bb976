//! Tests for device registration, sharing and the membership invariant.

use std::sync::Arc;

use pulseox_core::{Error, StaticIdentityVerifier};
use pulseox_devices::{
    AccessControl, AddUserOutcome, DeviceRegistry, HealthRecords, RegistrationOutcome,
};
use pulseox_store::{MemoryTreeStore, TreeStore};

fn setup() -> (Arc<MemoryTreeStore>, DeviceRegistry, AccessControl) {
    let store = Arc::new(MemoryTreeStore::new());
    let registry = DeviceRegistry::new(store.clone() as Arc<dyn TreeStore>);
    let access = AccessControl::new(registry.clone());
    (store, registry, access)
}

fn identities() -> StaticIdentityVerifier {
    let identity = StaticIdentityVerifier::new();
    identity.add_user("tok-a", "alice", Some("alice@example.com"));
    identity.add_user("tok-b", "bob", Some("bob@example.com"));
    identity.add_user("tok-c", "carol", Some("carol@example.com"));
    identity
}

#[test]
fn test_register_requires_existing_device_and_secret() {
    let (_store, registry, _access) = setup();

    let missing = registry.register("esp", "alice", "s3cret");
    assert!(matches!(missing, Err(Error::NotFound(_))));

    registry.provision("esp", "s3cret").unwrap();
    let wrong = registry.register("esp", "alice", "wrong");
    assert!(matches!(wrong, Err(Error::Unauthorized(_))));

    let ok = registry.register("esp", "alice", "s3cret").unwrap();
    assert_eq!(ok, RegistrationOutcome::Registered);
}

#[test]
fn test_register_is_idempotent() {
    let (_store, registry, _access) = setup();
    registry.provision("esp", "s3cret").unwrap();

    assert_eq!(
        registry.register("esp", "alice", "s3cret").unwrap(),
        RegistrationOutcome::Registered
    );
    assert_eq!(
        registry.register("esp", "alice", "s3cret").unwrap(),
        RegistrationOutcome::AlreadyRegistered
    );

    let bindings = registry.bindings("esp").unwrap();
    assert_eq!(bindings.len(), 1);
}

#[test]
fn test_legacy_migration_preserves_owner_timestamp() {
    let (store, registry, _access) = setup();
    registry.provision_legacy("esp", "s3cret", "alice").unwrap();
    store
        .set(
            "devices/esp/registered_at",
            &serde_json::json!(1_111_000_i64),
        )
        .unwrap();

    registry.register("esp", "bob", "s3cret").unwrap();

    let device = registry.require_device("esp").unwrap();
    assert!(device.legacy_owner.is_none(), "legacy field must be cleared");

    let bindings = registry.bindings("esp").unwrap();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings["alice"].registered_at, 1_111_000);
    assert!(bindings["bob"].registered_at > 1_111_000);
}

#[test]
fn test_authorize_distinguishes_missing_and_forbidden() {
    let (_store, registry, access) = setup();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();

    assert!(access.authorize("esp", "alice").is_ok());
    assert!(matches!(
        access.authorize("esp", "mallory"),
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(
        access.authorize("ghost", "alice"),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_add_user_is_idempotent() {
    let (_store, registry, access) = setup();
    let identity = identities();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();

    let first = access
        .add_user("esp", "alice", "bob@example.com", &identity)
        .await
        .unwrap();
    assert_eq!(first, AddUserOutcome::Added);

    let second = access
        .add_user("esp", "alice", "bob@example.com", &identity)
        .await
        .unwrap();
    assert_eq!(second, AddUserOutcome::AlreadyMember);

    let bindings = registry.bindings("esp").unwrap();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings["bob"].added_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_add_user_rejections() {
    let (_store, registry, access) = setup();
    let identity = identities();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();

    let unknown = access
        .add_user("esp", "alice", "nobody@example.com", &identity)
        .await;
    assert!(matches!(unknown, Err(Error::NotFound(_))));

    let outsider = access
        .add_user("esp", "mallory", "bob@example.com", &identity)
        .await;
    assert!(matches!(outsider, Err(Error::Forbidden(_))));
}

#[test]
fn test_remove_last_user_is_rejected() {
    let (_store, registry, access) = setup();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();

    let result = access.remove_user("esp", "alice", "alice");
    assert!(matches!(result, Err(Error::Forbidden(_))));

    // Membership unchanged.
    assert_eq!(registry.bindings("esp").unwrap().len(), 1);
}

#[tokio::test]
async fn test_remove_legacy_owner_requires_transfer() {
    let (_store, registry, access) = setup();
    let identity = identities();
    registry.provision_legacy("esp", "s3cret", "alice").unwrap();
    // Sharing via invite does not migrate the legacy field, so alice stays
    // the legacy owner while bob holds a binding.
    access
        .add_user("esp", "alice", "bob@example.com", &identity)
        .await
        .unwrap();

    let by_member = access.remove_user("esp", "bob", "alice");
    assert!(matches!(by_member, Err(Error::Forbidden(_))));

    let by_self = access.remove_user("esp", "alice", "alice");
    assert!(matches!(by_self, Err(Error::Forbidden(_))));

    let device = registry.require_device("esp").unwrap();
    assert_eq!(device.legacy_owner.as_deref(), Some("alice"));
}

#[test]
fn test_membership_never_reaches_zero() {
    let (_store, registry, access) = setup();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();
    registry.register("esp", "bob", "s3cret").unwrap();
    registry.register("esp", "carol", "s3cret").unwrap();

    access.remove_user("esp", "alice", "bob").unwrap();
    access.remove_user("esp", "alice", "carol").unwrap();
    let last = access.remove_user("esp", "alice", "alice");
    assert!(matches!(last, Err(Error::Forbidden(_))));

    let device = registry.require_device("esp").unwrap();
    let members =
        registry.bindings("esp").unwrap().len() + usize::from(device.legacy_owner.is_some());
    assert!(members >= 1, "device must always keep at least one member");
}

#[test]
fn test_remove_unknown_member_is_not_found() {
    let (_store, registry, access) = setup();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();
    registry.register("esp", "bob", "s3cret").unwrap();

    let result = access.remove_user("esp", "alice", "carol");
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_list_members_marks_legacy_owner() {
    let (_store, registry, access) = setup();
    let identity = identities();
    registry.provision_legacy("esp", "s3cret", "alice").unwrap();

    let members = access.list_members("esp", "alice", &identity).await.unwrap();
    assert_eq!(members.len(), 1);
    assert!(members[0].is_legacy);
    assert_eq!(members[0].email.as_deref(), Some("alice@example.com"));
}

#[tokio::test]
async fn test_list_members_skips_unresolvable_users() {
    let (_store, registry, access) = setup();
    let identity = identities();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();
    registry.register("esp", "bob", "s3cret").unwrap();
    identity.remove_user("bob");

    let members = access.list_members("esp", "alice", &identity).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, "alice");
}

#[test]
fn test_devices_for_user_merges_and_deduplicates() {
    let (_store, registry, access) = setup();
    registry.provision_legacy("cam", "s3cret", "alice").unwrap();
    registry.provision("esp", "s3cret").unwrap();
    registry.register("esp", "alice", "s3cret").unwrap();
    registry.register("esp", "bob", "s3cret").unwrap();

    let devices = access.devices_for_user("alice").unwrap();
    assert_eq!(devices.len(), 2);

    let cam = devices.iter().find(|d| d.device_id == "cam").unwrap();
    assert!(cam.is_legacy);
    let esp = devices.iter().find(|d| d.device_id == "esp").unwrap();
    assert!(!esp.is_legacy);
    assert_eq!(esp.user_count, 2);

    assert!(access.devices_for_user("carol").unwrap().is_empty());
}

#[test]
fn test_record_posting_user_resolution() {
    let (_store, registry, _access) = setup();
    let records = HealthRecords::new(registry.clone());
    registry.provision_legacy("esp", "s3cret", "alice").unwrap();

    // No explicit user: legacy owner wins.
    assert_eq!(records.resolve_posting_user("esp", None).unwrap(), "alice");
    // Explicit legacy owner is accepted as a fallback.
    assert_eq!(
        records.resolve_posting_user("esp", Some("alice")).unwrap(),
        "alice"
    );
    // Explicit non-member is rejected.
    assert!(matches!(
        records.resolve_posting_user("esp", Some("bob")),
        Err(Error::Unauthorized(_))
    ));

    registry.register("esp", "bob", "s3cret").unwrap();
    assert_eq!(
        records.resolve_posting_user("esp", Some("bob")).unwrap(),
        "bob"
    );

    // After migration the device has no legacy owner; an implicit post has
    // no one to write for.
    let (_s2, registry2, _a2) = setup();
    let records2 = HealthRecords::new(registry2.clone());
    registry2.provision("bare", "s3cret").unwrap();
    assert!(matches!(
        records2.resolve_posting_user("bare", None),
        Err(Error::Conflict(_))
    ));
}

#[test]
fn test_ingest_writes_both_feeds_with_identical_ts() {
    let (store, registry, _access) = setup();
    let records = HealthRecords::new(registry.clone());
    registry.provision_legacy("esp", "s3cret", "alice").unwrap();

    let key = records.ingest("esp", "alice", 97.5, 72.0).unwrap();

    let global = store.get(&format!("records/{key}")).unwrap().unwrap();
    let personal = store
        .get(&format!("user_records/alice/{key}"))
        .unwrap()
        .unwrap();
    assert_eq!(global["ts"], personal["ts"]);
    assert_eq!(global["spo2"], serde_json::json!(97.5));

    let listed = records.list_for_user("alice", 10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, key);
}
