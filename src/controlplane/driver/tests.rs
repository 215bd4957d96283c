use super::*;
use crate::controlplane::backends::{
    CreateBehavior, MemoryAnfClient, StaticEntitlements, DEFAULT_SUBSCRIPTION_ID,
};
use crate::domain::export::{NasType, PROTOCOL_CIFS, PROTOCOL_NFSV3, PROTOCOL_NFSV41};
use crate::domain::ports::{AnfClient, BackendFeature, FileSystem, StorageDriverRef};
use crate::domain::state::ProvisioningState;
use crate::domain::volume::SnapshotState;
use assert_matches::assert_matches;
use chrono::NaiveDateTime;
use std::sync::Arc;

const POOL: &str = "anf_pool";
const GIB: u64 = 1 << 30;

struct Harness {
    driver: NasStorageDriver,
    client: Arc<MemoryAnfClient>,
}

fn config() -> DriverConfig {
    DriverConfig {
        backend_name: "anf".into(),
        subscription_id: DEFAULT_SUBSCRIPTION_ID.into(),
        location: "eastus".into(),
        service_level: "Premium".into(),
        ..Default::default()
    }
}

async fn harness_with(config: DriverConfig, entitlements: StaticEntitlements) -> Harness {
    let client = Arc::new(MemoryAnfClient::with_default_inventory());
    let driver = NasStorageDriver::initialize(
        config,
        &BTreeMap::new(),
        DriverOptions::default(),
        client.clone(),
        Arc::new(entitlements),
    )
    .await
    .unwrap();
    Harness { driver, client }
}

async fn harness() -> Harness {
    harness_with(config(), StaticEntitlements::allow_all()).await
}

async fn backend_volume(h: &Harness, token: &str) -> FileSystem {
    h.client.volume_by_creation_token(token).await.unwrap()
}

async fn created(h: &Harness, name: &str, token: &str, size: &str) -> VolumeConfig {
    let mut volume = VolumeConfig::new(name, token).with_size(size);
    h.driver.create(&mut volume, POOL).await.unwrap();
    volume
}

fn imported(token: &str, protocols: &[&str], pool: &str) -> FileSystem {
    FileSystem {
        resource_group: "rg1".into(),
        netapp_account: "acct1".into(),
        capacity_pool: pool.into(),
        name: token.into(),
        location: "eastus".into(),
        provisioning_state: ProvisioningState::Available,
        creation_token: token.into(),
        service_level: "Premium".into(),
        protocol_types: protocols.iter().map(|p| p.to_string()).collect(),
        quota_in_bytes: 200 * GIB,
        unix_permissions: "0755".into(),
        labels: BTreeMap::from([("provisioning".to_string(), String::new())]),
        ..Default::default()
    }
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test]
async fn test_initialize_reports_pools() {
    let h = harness().await;

    assert!(h.driver.initialized());
    assert_eq!(h.driver.backend_name(), "anf");
    assert_eq!(h.driver.storage_pools().len(), 1);
    assert_eq!(h.driver.storage_pools()[0].name, POOL);
    assert_eq!(h.driver.protocol(), Protocol::File);
    // Only the Premium capacity pool serves the single Premium storage pool
    assert_eq!(h.driver.backend_pools().len(), 1);
    assert!(h.driver.backend_pools()[0].contains("\"capacityPool\":\"pool1\""));

    h.driver.terminate();
    assert!(!h.driver.initialized());
}

#[tokio::test]
async fn test_initialize_rejects_bad_pool() {
    let client = Arc::new(MemoryAnfClient::with_default_inventory());
    let config = DriverConfig {
        service_level: "Gold".into(),
        ..config()
    };
    let result = NasStorageDriver::initialize(
        config,
        &BTreeMap::new(),
        DriverOptions::default(),
        client,
        Arc::new(StaticEntitlements::allow_all()),
    )
    .await;
    assert_matches!(result.err(), Some(Error::Configuration(_)));
}

#[test]
fn test_default_backend_name() {
    assert_eq!(default_backend_name("abcdef-123"), "azurenetappfiles_abcde");
    let random = default_backend_name("abc");
    assert!(random.starts_with("azurenetappfiles_"));
    assert_eq!(random.len(), "azurenetappfiles_".len() + 6);
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_raises_small_volume_and_writes_back() {
    let h = harness().await;
    let mut volume = VolumeConfig::new("vol1", "anf-vol1").with_size("50Gi");
    volume.mount_options = Some("nfsvers=4.1".into());

    h.driver.create(&mut volume, POOL).await.unwrap();

    assert_eq!(volume.size, "107374182400");
    assert_eq!(volume.service_level.as_deref(), Some("Premium"));
    assert_eq!(volume.snapshot_dir.as_deref(), Some("false"));
    assert_eq!(volume.unix_permissions.as_deref(), Some("0777"));
    assert!(volume.internal_id.is_some());

    let backend = backend_volume(&h, "anf-vol1").await;
    assert_eq!(backend.provisioning_state, ProvisioningState::Available);
    assert_eq!(backend.capacity_pool, "pool1");
    assert_eq!(backend.protocol_types, vec![PROTOCOL_NFSV41.to_string()]);
    assert!(!backend.kerberos_enabled);

    let rule = &backend.export_policy.rules[0];
    assert!(rule.nfsv41 && !rule.nfsv3);
    assert!(rule.unix_read_write);
    assert!(!rule.has_kerberos());
    assert_eq!(rule.allowed_clients, "0.0.0.0/0");

    assert!(backend.labels[TELEMETRY_LABEL_TAG].contains("\"plugin\":\"azure-netapp-files\""));
    assert!(backend.labels.contains_key(PROVISIONING_LABEL_TAG));
}

#[tokio::test(start_paused = true)]
async fn test_create_uses_pool_defaults() {
    let h = harness().await;
    let mut volume = VolumeConfig::new("vol2", "anf-vol2");

    h.driver.create(&mut volume, POOL).await.unwrap();

    let backend = backend_volume(&h, "anf-vol2").await;
    assert_eq!(backend.quota_in_bytes, 100 * GIB);
    assert_eq!(backend.protocol_types, vec![PROTOCOL_NFSV3.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_create_without_unix_permissions_capability() {
    let h = harness().await;
    h.client.set_feature(BackendFeature::UnixPermissions, false);
    let mut volume = VolumeConfig::new("vol3", "anf-vol3");

    h.driver.create(&mut volume, POOL).await.unwrap();
    assert_eq!(volume.unix_permissions, None);
}

#[tokio::test]
async fn test_create_validates_names_before_any_call() {
    let h = harness().await;

    let long_name = format!("a{}", "b".repeat(64));
    let mut volume = VolumeConfig::new(long_name, "anf-ok");
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(_)));

    let long_token = format!("a{}", "b".repeat(80));
    let mut volume = VolumeConfig::new("ok", long_token);
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(_)));

    assert_eq!(h.client.refreshes(), 0);
    assert_eq!(h.client.create_calls(), 0);
}

#[tokio::test]
async fn test_create_validates_permissions_and_export_rule() {
    let h = harness().await;

    let mut volume = VolumeConfig::new("perms", "anf-perms").with_size("100Gi");
    volume.unix_permissions = Some("abc".into());
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(_)));

    let mut volume = VolumeConfig::new("perms", "anf-perms").with_size("100Gi");
    volume.unix_permissions = Some("0999".into());
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(_)));

    let mut volume = VolumeConfig::new("rule", "anf-rule").with_size("100Gi");
    volume.export_rule = Some("10.0.0.0/8,not-an-address".into());
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(_)));

    assert_eq!(h.client.refreshes(), 0);
    assert_eq!(h.client.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_runs_on_spawned_task() {
    let h = harness().await;
    let client = h.client.clone();
    let driver: StorageDriverRef = Arc::new(h.driver);

    let volume = tokio::spawn(async move {
        let mut volume = VolumeConfig::new("spawned", "anf-spawned").with_size("100Gi");
        let result = driver.create(&mut volume, POOL).await;
        result.map(|_| volume)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(volume.size, "107374182400");
    assert_eq!(client.create_calls(), 1);
}

#[tokio::test]
async fn test_create_rejects_unknown_pool_and_sizes() {
    let h = harness_with(
        DriverConfig {
            limit_volume_size: "200Gi".into(),
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;

    let mut volume = VolumeConfig::new("vol", "anf-vol").with_size("200Gi");
    assert_matches!(h.driver.create(&mut volume, "nope").await, Err(Error::Validation(_)));

    let mut volume = VolumeConfig::new("vol", "anf-vol").with_size("500M");
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(msg)) if msg.contains("too small"));

    let mut volume = VolumeConfig::new("vol", "anf-vol").with_size("300Gi");
    assert_matches!(
        h.driver.create(&mut volume, POOL).await,
        Err(Error::SizeLimit { limit, .. }) if limit == 200 * GIB
    );

    let mut volume = VolumeConfig::new("vol", "anf-vol").with_size("lots");
    assert_matches!(h.driver.create(&mut volume, POOL).await, Err(Error::Validation(_)));

    assert_eq!(h.client.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_in_progress_is_retryable() {
    let h = harness().await;
    h.client.set_create_behavior("anf-slow", CreateBehavior::Stuck);

    let mut volume = VolumeConfig::new("slow", "anf-slow").with_size("100Gi");
    let err = h.driver.create(&mut volume, POOL).await.unwrap_err();
    assert!(err.is_volume_creating());
    assert!(err.is_retryable());

    let mut retry = VolumeConfig::new("slow", "anf-slow").with_size("100Gi");
    let err = h.driver.create(&mut retry, POOL).await.unwrap_err();
    assert_matches!(err, Error::VolumeCreating { ref message, .. } if message.contains("Creating"));

    assert_eq!(h.client.create_calls(), 1);
    assert_eq!(h.client.delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_existing_volume() {
    let h = harness().await;
    created(&h, "dup", "anf-dup", "100Gi").await;

    let mut again = VolumeConfig::new("dup", "anf-dup").with_size("100Gi");
    assert_matches!(
        h.driver.create(&mut again, POOL).await,
        Err(Error::VolumeExists { .. })
    );
    assert_eq!(h.client.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_cleans_up_failed_volume() {
    let h = harness().await;
    h.client.set_create_behavior("anf-bad", CreateBehavior::Fail);

    let mut volume = VolumeConfig::new("bad", "anf-bad").with_size("100Gi");
    let err = h.driver.create(&mut volume, POOL).await.unwrap_err();
    assert_matches!(err, Error::AbortState { .. });
    assert_eq!(h.client.delete_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_placement_follows_configured_order() {
    let h = harness_with(
        DriverConfig {
            service_level: String::new(),
            capacity_pools: vec!["pool3".into(), "rg1/acct1/pool2".into(), "pool1".into()],
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;
    h.client.fail_capacity_pool("rg1/acct1/pool3", "quota exceeded");

    let mut volume = VolumeConfig::new("placed", "anf-placed").with_size("100Gi");
    h.driver.create(&mut volume, POOL).await.unwrap();

    assert_eq!(
        h.client.create_attempts(),
        vec!["rg1/acct1/pool3".to_string(), "rg1/acct1/pool2".to_string()]
    );
    assert_eq!(backend_volume(&h, "anf-placed").await.capacity_pool, "pool2");
}

#[tokio::test(start_paused = true)]
async fn test_placement_exhausted_lists_every_failure() {
    let h = harness_with(
        DriverConfig {
            service_level: String::new(),
            capacity_pools: vec!["pool2".into(), "pool1".into()],
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;
    h.client.fail_capacity_pool("rg1/acct1/pool2", "quota exceeded");
    h.client.fail_capacity_pool("rg1/acct1/pool1", "throttled");

    let mut volume = VolumeConfig::new("nowhere", "anf-nowhere").with_size("100Gi");
    let err = h.driver.create(&mut volume, POOL).await.unwrap_err();

    let Error::PlacementExhausted { failures, .. } = err else {
        panic!("expected placement failure, got {:?}", err);
    };
    let pools: Vec<&str> = failures.iter().map(|f| f.capacity_pool.as_str()).collect();
    assert_eq!(pools, vec!["rg1/acct1/pool2", "rg1/acct1/pool1"]);
    assert!(failures.iter().next().unwrap().reason.contains("quota exceeded"));
    assert!(volume.internal_id.is_none());
}

#[tokio::test]
async fn test_no_subnet_in_location() {
    let h = harness_with(
        DriverConfig {
            location: "westus".into(),
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;

    let mut volume = VolumeConfig::new("vol", "anf-vol").with_size("100Gi");
    assert_matches!(
        h.driver.create(&mut volume, POOL).await,
        Err(Error::NoSubnet { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn test_kerberos_volume() {
    let h = harness_with(
        DriverConfig {
            kerberos: "sec=krb5p".into(),
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;

    let mut volume = VolumeConfig::new("secure", "anf-secure").with_size("100Gi");
    h.driver.create(&mut volume, POOL).await.unwrap();

    let backend = backend_volume(&h, "anf-secure").await;
    assert!(backend.kerberos_enabled);
    assert_eq!(backend.protocol_types, vec![PROTOCOL_NFSV41.to_string()]);
    let rule = &backend.export_policy.rules[0];
    assert!(rule.kerberos5p_read_write);
    assert!(!rule.kerberos5_read_write && !rule.kerberos5i_read_write);
    assert!(!rule.unix_read_write && !rule.unix_read_only);
    assert!(!rule.nfsv3);

    let info = h.driver.publish(&mut volume).await.unwrap();
    assert_eq!(info.nfs_server_ip, backend.mount_targets[0].server_fqdn);
}

#[tokio::test]
async fn test_kerberos_requires_entitlement() {
    let h = harness_with(
        DriverConfig {
            kerberos: "sec=krb5".into(),
            ..config()
        },
        StaticEntitlements::deny_all(),
    )
    .await;

    let mut volume = VolumeConfig::new("secure", "anf-secure").with_size("100Gi");
    assert_matches!(
        h.driver.create(&mut volume, POOL).await,
        Err(Error::Entitlement { .. })
    );
    assert_eq!(h.client.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_smb_volume() {
    let h = harness_with(
        DriverConfig {
            nas_type: NasType::Smb,
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;

    let mut volume = created(&h, "share", "anf-share", "100Gi").await;
    let backend = backend_volume(&h, "anf-share").await;
    assert_eq!(backend.protocol_types, vec![PROTOCOL_CIFS.to_string()]);
    assert!(backend.export_policy.rules.is_empty());
    assert!(backend.unix_permissions.is_empty());

    h.driver.create_followup(&mut volume).await.unwrap();
    assert_eq!(volume.access_info.smb_path, "\\anf-share");
    assert_eq!(volume.access_info.smb_server, backend.mount_targets[0].server_fqdn);
    assert_eq!(volume.file_system, Some(NasType::Smb));

    let info = h.driver.publish(&mut volume).await.unwrap();
    assert_eq!(info.filesystem_type, Some(NasType::Smb));
    assert_eq!(info.smb_path, "\\anf-share");
    assert!(info.nfs_path.is_empty());
}

// =============================================================================
// Clone
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_clone_snapshots_source() {
    let h = harness().await;
    let source = created(&h, "src", "anf-src", "100Gi").await;

    let mut clone = VolumeConfig::new("copy", "anf-copy");
    clone.clone_source_volume_internal = Some("anf-src".into());
    h.driver.create_clone(&source, &mut clone, None).await.unwrap();

    assert_eq!(h.client.snapshot_create_calls(), 1);
    let snapshots = h.client.snapshot_names("anf-src");
    assert_eq!(snapshots.len(), 1);
    assert!(NaiveDateTime::parse_from_str(&snapshots[0], SNAPSHOT_NAME_FORMAT).is_ok());
    assert_eq!(clone.clone_source_snapshot_internal.as_deref(), Some(snapshots[0].as_str()));

    let backend = backend_volume(&h, "anf-copy").await;
    assert_eq!(backend.capacity_pool, "pool1");
    assert_eq!(backend.quota_in_bytes, 100 * GIB);
    assert_eq!(clone.internal_id.as_deref(), Some(backend.id.as_str()));
    assert_eq!(backend.labels[PROVISIONING_LABEL_TAG], "");
}

#[tokio::test(start_paused = true)]
async fn test_clone_from_named_snapshot() {
    let h = harness().await;
    let source = created(&h, "src", "anf-src", "100Gi").await;
    h.driver
        .create_snapshot(&SnapshotConfig::new("snap1", &source), &source)
        .await
        .unwrap();

    let mut clone = VolumeConfig::new("copy", "anf-copy");
    clone.clone_source_volume_internal = Some("anf-src".into());
    clone.clone_source_snapshot_internal = Some("snap1".into());
    h.driver.create_clone(&source, &mut clone, Some(POOL)).await.unwrap();
    assert_eq!(h.client.snapshot_create_calls(), 1);

    let mut missing = VolumeConfig::new("copy2", "anf-copy2");
    missing.clone_source_snapshot = Some("nope".into());
    assert_matches!(
        h.driver.create_clone(&source, &mut missing, None).await,
        Err(Error::NotFound { .. })
    );

    let mut again = VolumeConfig::new("copy", "anf-copy");
    again.clone_source_snapshot = Some("snap1".into());
    assert_matches!(
        h.driver.create_clone(&source, &mut again, None).await,
        Err(Error::VolumeExists { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn test_read_only_clone() {
    let h = harness().await;

    let plain = created(&h, "plain", "anf-plain", "100Gi").await;
    let mut ro = VolumeConfig::new("ro", "anf-ro");
    ro.read_only_clone = true;
    ro.clone_source_volume_internal = Some("anf-plain".into());
    assert_matches!(
        h.driver.create_clone(&plain, &mut ro, None).await,
        Err(Error::Validation(_))
    );
    assert_eq!(h.client.snapshot_create_calls(), 0);

    let mut source = VolumeConfig::new("src", "anf-src").with_size("100Gi");
    source.snapshot_dir = Some("true".into());
    h.driver.create(&mut source, POOL).await.unwrap();
    h.driver
        .create_snapshot(&SnapshotConfig::new("snap1", &source), &source)
        .await
        .unwrap();
    let creates = h.client.create_calls();

    let mut ro = VolumeConfig::new("ro", "anf-ro");
    ro.read_only_clone = true;
    ro.clone_source_volume_internal = Some("anf-src".into());
    ro.clone_source_snapshot_internal = Some("snap1".into());
    h.driver.create_clone(&source, &mut ro, None).await.unwrap();
    assert_eq!(h.client.create_calls(), creates);

    h.driver.create_followup(&mut ro).await.unwrap();
    assert_eq!(ro.access_info.nfs_path, "/anf-src/.snapshot/snap1");

    let info = h.driver.publish(&mut ro).await.unwrap();
    assert_eq!(info.nfs_path, "/anf-src/.snapshot/snap1");
    assert_eq!(info.mount_options, "nfsvers=3");
}

// =============================================================================
// Import
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_import_managed() {
    let h = harness().await;
    let existing = h
        .client
        .insert_volume(imported("legacy", &[PROTOCOL_NFSV3], "pool1"));

    let mut volume = VolumeConfig::new("legacy-pv", "");
    volume.unix_permissions = Some("0700".into());
    volume.snapshot_dir = Some("true".into());
    h.driver.import(&mut volume, "legacy").await.unwrap();

    assert_eq!(volume.size, (200 * GIB).to_string());
    assert_eq!(volume.internal_name, "legacy");
    assert_eq!(volume.internal_id.as_deref(), Some(existing.id.as_str()));
    assert_eq!(h.client.modify_calls(), 1);

    let backend = backend_volume(&h, "legacy").await;
    assert_eq!(backend.unix_permissions, "0700");
    assert!(backend.snapshot_directory);
    assert!(backend.labels.contains_key(TELEMETRY_LABEL_TAG));
}

#[tokio::test]
async fn test_import_not_managed_leaves_volume_alone() {
    let h = harness().await;
    h.client
        .insert_volume(imported("legacy", &[PROTOCOL_NFSV3], "pool1"));

    let mut volume = VolumeConfig::new("legacy-pv", "");
    volume.import_not_managed = true;
    h.driver.import(&mut volume, "legacy").await.unwrap();

    assert_eq!(volume.internal_name, "legacy");
    assert_eq!(h.client.modify_calls(), 0);
    assert!(!backend_volume(&h, "legacy").await.labels.contains_key(TELEMETRY_LABEL_TAG));
}

#[tokio::test]
async fn test_import_rejections() {
    let h = harness().await;
    h.client
        .insert_volume(imported("dual", &[PROTOCOL_NFSV3, PROTOCOL_CIFS], "pool1"));
    h.client
        .insert_volume(imported("elsewhere", &[PROTOCOL_NFSV3], "pool2"));
    h.client
        .insert_volume(imported("share", &[PROTOCOL_CIFS], "pool1"));
    let mut secure = imported("secure", &[PROTOCOL_NFSV41], "pool1");
    secure.kerberos_enabled = true;
    h.client.insert_volume(secure);

    for token in ["dual", "elsewhere", "share", "secure"] {
        let mut volume = VolumeConfig::new("pv", "").with_size("1Gi");
        assert_matches!(
            h.driver.import(&mut volume, token).await,
            Err(Error::ImportRejected { .. }),
            "{} should be rejected",
            token
        );
        if token == "dual" {
            assert_eq!(volume.size, "1Gi");
        }
    }

    let mut volume = VolumeConfig::new("pv", "");
    assert_matches!(
        h.driver.import(&mut volume, "missing").await,
        Err(Error::NotFound { .. })
    );
    assert_eq!(h.client.modify_calls(), 0);
}

// =============================================================================
// Resize and Destroy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_resize() {
    let h = harness().await;
    let mut volume = created(&h, "grow", "anf-grow", "100Gi").await;

    h.driver.resize(&mut volume, 200 * GIB).await.unwrap();
    assert_eq!(volume.size, (200 * GIB).to_string());
    assert_eq!(backend_volume(&h, "anf-grow").await.quota_in_bytes, 200 * GIB);

    h.driver.resize(&mut volume, 200 * GIB).await.unwrap();
    assert_eq!(h.client.resize_calls(), 1);

    let err = h.driver.resize(&mut volume, 150 * GIB).await.unwrap_err();
    assert_matches!(err, Error::Validation(ref msg) if msg.contains("less than existing volume size"));
    assert_eq!(h.client.resize_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resize_requires_available_volume() {
    let h = harness().await;
    let mut volume = created(&h, "busy", "anf-busy", "100Gi").await;
    h.client.set_volume_state("anf-busy", ProvisioningState::Moving);

    assert_matches!(
        h.driver.resize(&mut volume, 200 * GIB).await,
        Err(Error::InvalidState { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_idempotent() {
    let h = harness().await;
    let volume = created(&h, "gone", "anf-gone", "100Gi").await;

    h.driver.destroy(&volume).await.unwrap();
    h.driver.destroy(&volume).await.unwrap();

    assert_eq!(h.client.delete_calls(), 1);
    assert_matches!(h.driver.get("anf-gone").await, Err(Error::NotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_waits_out_deleting_volume() {
    let h = harness().await;
    let volume = created(&h, "going", "anf-going", "100Gi").await;
    let backend = backend_volume(&h, "anf-going").await;
    h.client.delete_volume(&backend).await.unwrap();

    h.driver.destroy(&volume).await.unwrap();
    assert_eq!(h.client.delete_calls(), 1);
}

// =============================================================================
// Publish
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_followup_and_publish_nfs() {
    let h = harness().await;
    let mut volume = created(&h, "pub", "anf-pub", "100Gi").await;
    volume.internal_id = None;

    h.driver.create_followup(&mut volume).await.unwrap();
    let backend = backend_volume(&h, "anf-pub").await;
    assert_eq!(volume.access_info.nfs_path, "/anf-pub");
    assert_eq!(volume.access_info.nfs_server_ip, backend.mount_targets[0].ip_address);
    assert_eq!(volume.file_system, Some(NasType::Nfs));
    assert_eq!(volume.internal_id.as_deref(), Some(backend.id.as_str()));

    volume.mount_options = Some("nfsvers=4.1,hard".into());
    let info = h.driver.publish(&mut volume).await.unwrap();
    assert_eq!(info.nfs_path, "/anf-pub");
    assert_eq!(info.nfs_server_ip, backend.mount_targets[0].ip_address);
    assert_eq!(info.mount_options, "nfsvers=4.1,hard");
    assert_eq!(info.filesystem_type, Some(NasType::Nfs));
}

#[tokio::test(start_paused = true)]
async fn test_followup_requires_available() {
    let h = harness().await;
    let mut volume = created(&h, "pub", "anf-pub", "100Gi").await;
    h.client.set_volume_state("anf-pub", ProvisioningState::Error);

    assert_matches!(
        h.driver.create_followup(&mut volume).await,
        Err(Error::InvalidState { .. })
    );
}

// =============================================================================
// Snapshots
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_snapshot_lifecycle() {
    let h = harness().await;
    let volume = created(&h, "data", "anf-data", "100Gi").await;
    let config = SnapshotConfig::new("snap1", &volume);

    let snapshot = h.driver.create_snapshot(&config, &volume).await.unwrap();
    assert_eq!(snapshot.state, SnapshotState::Online);
    assert_eq!(snapshot.size_bytes, 0);
    assert!(NaiveDateTime::parse_from_str(&snapshot.created, TIMESTAMP_FORMAT).is_ok());

    let found = h.driver.get_snapshot(&config, &volume).await.unwrap().unwrap();
    assert_eq!(found.config.internal_name, "snap1");

    let listed = h.driver.get_snapshots(&volume).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].config.volume_internal_name, "anf-data");

    h.driver.restore_snapshot(&config, &volume).await.unwrap();
    assert_eq!(
        backend_volume(&h, "anf-data").await.provisioning_state,
        ProvisioningState::Available
    );

    h.driver.delete_snapshot(&config, &volume).await.unwrap();
    assert!(h.driver.get_snapshot(&config, &volume).await.unwrap().is_none());
    h.driver.delete_snapshot(&config, &volume).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restore_snapshot() {
    let h = harness().await;
    let volume = created(&h, "data", "anf-data", "100Gi").await;
    let config = SnapshotConfig::new("before-upgrade", &volume);
    h.driver.create_snapshot(&config, &volume).await.unwrap();

    h.driver.restore_snapshot(&config, &volume).await.unwrap();
    assert_eq!(
        backend_volume(&h, "anf-data").await.provisioning_state,
        ProvisioningState::Available
    );

    let missing = SnapshotConfig::new("never-taken", &volume);
    assert_matches!(
        h.driver.restore_snapshot(&missing, &volume).await,
        Err(Error::NotFound { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn test_restore_requires_available_snapshot() {
    let h = harness().await;
    let volume = created(&h, "data", "anf-data", "100Gi").await;
    let parent = backend_volume(&h, "anf-data").await;

    // Never polled, so it stays Creating
    h.client.create_snapshot(&parent, "pending").await.unwrap();
    let config = SnapshotConfig::new("pending", &volume);

    assert_matches!(
        h.driver.restore_snapshot(&config, &volume).await,
        Err(Error::InvalidState { kind, .. }) if kind == "snapshot"
    );
    assert_eq!(
        backend_volume(&h, "anf-data").await.provisioning_state,
        ProvisioningState::Available
    );
}

#[tokio::test]
async fn test_restore_with_missing_parent() {
    let h = harness().await;
    let volume = VolumeConfig::new("ghost", "anf-ghost");
    let config = SnapshotConfig::new("snap1", &volume);

    assert_matches!(
        h.driver.restore_snapshot(&config, &volume).await,
        Err(Error::NotFound { kind, .. }) if kind == "volume"
    );
}

#[tokio::test]
async fn test_snapshots_of_missing_volume() {
    let h = harness().await;
    let volume = VolumeConfig::new("ghost", "anf-ghost");
    let config = SnapshotConfig::new("snap1", &volume);

    assert!(h.driver.get_snapshot(&config, &volume).await.unwrap().is_none());
    assert!(h.driver.get_snapshots(&volume).await.unwrap().is_empty());
    h.driver.delete_snapshot(&config, &volume).await.unwrap();
    assert_matches!(
        h.driver.create_snapshot(&config, &volume).await,
        Err(Error::NotFound { .. })
    );
    assert_matches!(
        h.driver.restore_snapshot(&config, &volume).await,
        Err(Error::NotFound { .. })
    );
}

// =============================================================================
// Backend
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_list_strips_storage_prefix() {
    let h = harness_with(
        DriverConfig {
            storage_prefix: Some("team-".into()),
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;
    created(&h, "one", "team-one", "100Gi").await;
    h.client
        .insert_volume(imported("other", &[PROTOCOL_NFSV3], "pool1"));

    assert_eq!(h.driver.list().await.unwrap(), vec!["one".to_string()]);

    let (tx, mut rx) = mpsc::channel(8);
    h.driver.volume_external_wrappers(tx).await;
    let mut names = Vec::new();
    while let Some(wrapper) = rx.recv().await {
        assert!(wrapper.error.is_none());
        names.push(wrapper.volume.unwrap().config.internal_name);
    }
    assert_eq!(names, vec!["team-one".to_string()]);

    let external = h.driver.volume_external("team-one").await.unwrap();
    assert_eq!(external.config.size, (100 * GIB).to_string());
}

#[tokio::test]
async fn test_internal_names() {
    let h = harness().await;
    let csi = "pvc-2ba8b6a8-7d3c-4f0e-9f6e-3b6f1f0b6a01";
    assert_eq!(h.driver.internal_volume_name(csi), csi);

    let mut volume = VolumeConfig::new("plain", "");
    h.driver.create_prepare(&mut volume);
    assert!(volume.internal_name.starts_with("anf-"));
}

#[tokio::test]
async fn test_update_type_and_external_config() {
    let original = harness().await;
    let same = harness().await;
    assert!(same.driver.update_type(&original.driver).is_empty());

    let changed = harness_with(
        DriverConfig {
            storage_prefix: Some("other-".into()),
            client_secret: "hunter2".into(),
            ..config()
        },
        StaticEntitlements::allow_all(),
    )
    .await;
    assert!(changed
        .driver
        .update_type(&original.driver)
        .contains(&UpdateType::PrefixChange));

    let external = changed.driver.external_config();
    assert_eq!(external["clientSecret"], crate::config::REDACTED);
    assert!(!external.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_rename_and_node_access_are_no_ops() {
    let h = harness().await;
    h.driver.rename("a", "b").await.unwrap();
    h.driver.reconcile_node_access(&["node-1".to_string()]).await.unwrap();
    assert!(h.driver.physical_pool_names().is_empty());
}
