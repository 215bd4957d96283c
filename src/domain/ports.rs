//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems: the NetApp Files service client, the entitlement
//! authority and the host orchestrator that drives the storage driver.

use crate::catalog::StoragePool;
use crate::config::UpdateType;
use crate::domain::export::{ExportPolicy, ExportRule};
use crate::domain::state::ProvisioningState;
use crate::domain::volume::{
    Snapshot, SnapshotConfig, VolumeConfig, VolumeExternal, VolumeExternalWrapper,
    VolumePublishInfo,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

// =============================================================================
// Backend Resources
// =============================================================================

/// Network endpoint through which a volume is mounted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountTarget {
    pub mount_target_id: String,
    pub file_system_id: String,
    pub ip_address: String,
    /// Used instead of the IP address for Kerberos volumes and SMB shares
    pub server_fqdn: String,
}

/// A NetApp Files volume as reported by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystem {
    /// Full resource ID
    pub id: String,
    pub resource_group: String,
    pub netapp_account: String,
    pub capacity_pool: String,
    /// Resource (display) name
    pub name: String,
    pub location: String,
    pub provisioning_state: ProvisioningState,
    /// Immutable, unique within the subscription; doubles as the export path
    pub creation_token: String,
    pub service_level: String,
    pub protocol_types: Vec<String>,
    pub quota_in_bytes: u64,
    pub unix_permissions: String,
    pub snapshot_directory: bool,
    pub export_policy: ExportPolicy,
    pub mount_targets: Vec<MountTarget>,
    pub subnet_id: String,
    pub network_features: String,
    pub kerberos_enabled: bool,
    pub labels: BTreeMap<String, String>,
}

/// A snapshot of a NetApp Files volume as reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSnapshot {
    /// Full resource ID
    pub id: String,
    /// Service-assigned UUID, referenced by create-from-snapshot requests
    pub snapshot_id: String,
    pub name: String,
    pub volume_id: String,
    pub location: String,
    pub created: DateTime<Utc>,
    pub provisioning_state: ProvisioningState,
}

/// A capacity pool discovered in the subscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPool {
    pub id: String,
    pub resource_group: String,
    pub netapp_account: String,
    pub name: String,
    pub location: String,
    pub service_level: String,
    pub provisioning_state: String,
    pub qos_type: String,
}

impl CapacityPool {
    /// `resource-group/account/pool`, unique within a subscription
    pub fn full_name(&self) -> String {
        format!("{}/{}/{}", self.resource_group, self.netapp_account, self.name)
    }

    /// `resource-group/account`
    pub fn account_full_name(&self) -> String {
        format!("{}/{}", self.resource_group, self.netapp_account)
    }
}

/// A subnet delegated to NetApp Files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: String,
    pub resource_group: String,
    pub virtual_network: String,
    pub name: String,
    pub location: String,
}

impl Subnet {
    /// `resource-group/vnet/subnet`
    pub fn full_name(&self) -> String {
        format!("{}/{}/{}", self.resource_group, self.virtual_network, self.name)
    }
}

/// Everything the service needs to create a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemCreateRequest {
    pub resource_group: String,
    pub netapp_account: String,
    pub capacity_pool: String,
    pub name: String,
    pub subnet_id: String,
    pub creation_token: String,
    pub labels: BTreeMap<String, String>,
    pub protocol_types: Vec<String>,
    pub quota_in_bytes: u64,
    pub snapshot_directory: bool,
    /// Set when cloning
    pub snapshot_id: Option<String>,
    pub network_features: String,
    pub kerberos_enabled: bool,
    /// NFS only
    pub unix_permissions: Option<String>,
    /// NFS only
    pub export_policy: Option<ExportPolicy>,
}

/// Optional service capabilities that vary by region or preview enrollment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendFeature {
    UnixPermissions,
    NetworkFeatures,
}

/// Build the resource ID of a volume from its coordinates
pub fn create_volume_id(
    subscription_id: &str,
    resource_group: &str,
    netapp_account: &str,
    capacity_pool: &str,
    volume: &str,
) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.NetApp/netAppAccounts/{}/capacityPools/{}/volumes/{}",
        subscription_id, resource_group, netapp_account, capacity_pool, volume
    )
}

// =============================================================================
// NetApp Files Client Port
// =============================================================================

/// Port for the NetApp Files service.
///
/// Lookups that find nothing return `Error::NotFound`; the `*_exists`
/// variants return `None` instead. State queries bypass any resource cache.
#[async_trait]
pub trait AnfClient: Send + Sync {
    /// Discover the subscription's resources once the driver is configured
    async fn init(&self) -> Result<()>;

    /// Refresh the resource cache if it is older than the configured age
    async fn refresh_resources(&self) -> Result<()>;

    /// Capacity pools discovered in the subscription
    async fn capacity_pools(&self) -> Result<Vec<CapacityPool>>;

    /// Subnets delegated to NetApp Files
    async fn subnets(&self) -> Result<Vec<Subnet>>;

    /// Whether an optional service capability is available
    fn has_feature(&self, feature: BackendFeature) -> bool;

    // ===== Volumes =====

    async fn volumes(&self) -> Result<Vec<FileSystem>>;

    /// Find a volume by its resource ID if known, else by creation token
    async fn volume(&self, config: &VolumeConfig) -> Result<FileSystem>;

    async fn volume_exists(&self, config: &VolumeConfig) -> Result<Option<FileSystem>>;

    async fn volume_exists_by_id(&self, id: &str) -> Result<Option<FileSystem>>;

    async fn volume_by_creation_token(&self, token: &str) -> Result<FileSystem>;

    /// Current provisioning state, queried from the service
    async fn volume_state(&self, volume: &FileSystem) -> Result<ProvisioningState>;

    async fn create_volume(&self, request: &FilesystemCreateRequest) -> Result<FileSystem>;

    /// Patch a volume. `None` leaves the corresponding property untouched.
    async fn modify_volume(
        &self,
        volume: &FileSystem,
        labels: BTreeMap<String, String>,
        unix_permissions: Option<&str>,
        snapshot_directory: Option<bool>,
        export_rule: Option<&ExportRule>,
    ) -> Result<()>;

    async fn resize_volume(&self, volume: &FileSystem, new_size_bytes: u64) -> Result<()>;

    async fn delete_volume(&self, volume: &FileSystem) -> Result<()>;

    // ===== Snapshots =====

    async fn snapshots_for_volume(&self, volume: &FileSystem) -> Result<Vec<BackendSnapshot>>;

    async fn snapshot_for_volume(&self, volume: &FileSystem, name: &str) -> Result<BackendSnapshot>;

    /// Current provisioning state, queried from the service
    async fn snapshot_state(
        &self,
        volume: &FileSystem,
        snapshot: &BackendSnapshot,
    ) -> Result<ProvisioningState>;

    async fn create_snapshot(&self, volume: &FileSystem, name: &str) -> Result<BackendSnapshot>;

    async fn delete_snapshot(&self, volume: &FileSystem, snapshot: &BackendSnapshot) -> Result<()>;

    /// Revert a volume in place to a snapshot
    async fn restore_snapshot(&self, volume: &FileSystem, snapshot: &BackendSnapshot) -> Result<()>;
}

// =============================================================================
// Entitlement Port
// =============================================================================

/// Features gated behind an entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitledFeature {
    /// Kerberos in-flight encryption
    InflightEncryption,
}

impl fmt::Display for EntitledFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntitledFeature::InflightEncryption => write!(f, "inflight-encryption"),
        }
    }
}

/// Port for feature entitlement checks
#[async_trait]
pub trait EntitlementChecker: Send + Sync {
    /// `Ok(())` when the feature may be used, `Error::Entitlement` otherwise
    async fn is_feature_enabled(&self, feature: EntitledFeature) -> Result<()>;
}

// =============================================================================
// Storage Driver Port
// =============================================================================

/// Storage protocol family a driver serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    File,
    Block,
}

/// Port the host orchestrator drives.
///
/// Volume descriptors are updated in place with the values the backend
/// accepted, so the host can persist them.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name
    fn name(&self) -> &str;

    /// Backend name, configured or derived from credentials
    fn backend_name(&self) -> String;

    fn initialized(&self) -> bool;

    fn terminate(&self);

    // ===== Volume lifecycle =====

    async fn create(&self, volume: &mut VolumeConfig, pool: &str) -> Result<()>;

    /// Clone `source` into `clone`. `pool` is `None` when the host did not
    /// place the clone.
    async fn create_clone(
        &self,
        source: &VolumeConfig,
        clone: &mut VolumeConfig,
        pool: Option<&str>,
    ) -> Result<()>;

    async fn import(&self, volume: &mut VolumeConfig, original_name: &str) -> Result<()>;

    /// Always succeeds; volumes are never renamed on the service
    async fn rename(&self, name: &str, new_name: &str) -> Result<()>;

    async fn destroy(&self, volume: &VolumeConfig) -> Result<()>;

    async fn resize(&self, volume: &mut VolumeConfig, size_bytes: u64) -> Result<()>;

    async fn get(&self, name: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<String>>;

    async fn publish(&self, volume: &mut VolumeConfig) -> Result<VolumePublishInfo>;

    fn create_prepare(&self, volume: &mut VolumeConfig);

    async fn create_followup(&self, volume: &mut VolumeConfig) -> Result<()>;

    fn internal_volume_name(&self, name: &str) -> String;

    // ===== Snapshots =====

    async fn can_snapshot(&self, snapshot: &SnapshotConfig, volume: &VolumeConfig) -> Result<()>;

    async fn get_snapshot(
        &self,
        snapshot: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Option<Snapshot>>;

    async fn get_snapshots(&self, volume: &VolumeConfig) -> Result<Vec<Snapshot>>;

    async fn create_snapshot(&self, snapshot: &SnapshotConfig, volume: &VolumeConfig)
        -> Result<Snapshot>;

    async fn restore_snapshot(&self, snapshot: &SnapshotConfig, volume: &VolumeConfig)
        -> Result<()>;

    async fn delete_snapshot(&self, snapshot: &SnapshotConfig, volume: &VolumeConfig)
        -> Result<()>;

    // ===== Backend =====

    /// Pools to register with the host
    fn storage_pools(&self) -> Vec<StoragePool>;

    fn physical_pool_names(&self) -> Vec<String>;

    fn protocol(&self) -> Protocol;

    /// Configuration with secrets redacted
    fn external_config(&self) -> serde_json::Value;

    async fn volume_external(&self, name: &str) -> Result<VolumeExternal>;

    /// Stream every managed volume into `sink`, closing it when done
    async fn volume_external_wrappers(&self, sink: mpsc::Sender<VolumeExternalWrapper>);

    /// Which kinds of change separate this driver's config from `original`'s
    fn update_type(&self, original: &dyn StorageDriver) -> BTreeSet<UpdateType>;

    /// Per-backend export policy maintenance; nothing to do for this service
    async fn reconcile_node_access(&self, nodes: &[String]) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type AnfClientRef = Arc<dyn AnfClient>;
pub type EntitlementCheckerRef = Arc<dyn EntitlementChecker>;
pub type StorageDriverRef = Arc<dyn StorageDriver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_id_format() {
        let id = create_volume_id("sub", "rg1", "acct1", "pool1", "clone-1");
        assert_eq!(
            id,
            "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.NetApp/netAppAccounts/acct1/capacityPools/pool1/volumes/clone-1"
        );
    }

    #[test]
    fn test_capacity_pool_names() {
        let pool = CapacityPool {
            resource_group: "rg1".into(),
            netapp_account: "acct1".into(),
            name: "ultra".into(),
            ..Default::default()
        };
        assert_eq!(pool.full_name(), "rg1/acct1/ultra");
        assert_eq!(pool.account_full_name(), "rg1/acct1");
    }
}
