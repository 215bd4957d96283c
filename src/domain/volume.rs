//! Volume and snapshot descriptors exchanged with the host orchestrator

use crate::domain::export::NasType;
use crate::error::Error;
use serde::{Deserialize, Serialize};

// =============================================================================
// Volume Descriptor
// =============================================================================

/// Access details filled in after a volume is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAccessInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nfs_server_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nfs_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smb_server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smb_path: String,
}

/// A volume as the host orchestrator knows it.
///
/// Optional attributes left unset are resolved from the pool, then the
/// backend config, then built-in defaults. The driver writes the values the
/// service accepted back into this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    /// External (display) name, also the backend resource name
    pub name: String,
    /// Creation token; immutable once the volume exists
    #[serde(default)]
    pub internal_name: String,
    /// Backend-assigned resource ID; authoritative once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<String>,
    /// Requested size, e.g. "100Gi" or a byte count; "" or "0" means default
    #[serde(default)]
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source_volume_internal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source_snapshot_internal: Option<String>,
    #[serde(default)]
    pub read_only_clone: bool,
    #[serde(default)]
    pub import_not_managed: bool,
    #[serde(default)]
    pub access_info: VolumeAccessInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<NasType>,
}

impl VolumeConfig {
    pub fn new(name: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_name: internal_name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Name of the snapshot a read-only clone is rooted at
    pub fn clone_snapshot_name(&self) -> Option<&str> {
        self.clone_source_snapshot_internal
            .as_deref()
            .or(self.clone_source_snapshot.as_deref())
    }

    /// Creation token of the clone's source volume
    pub fn clone_source_token(&self) -> Option<&str> {
        self.clone_source_volume_internal
            .as_deref()
            .or(self.clone_source_volume.as_deref())
    }
}

// =============================================================================
// Snapshot Descriptor
// =============================================================================

/// A snapshot as the host orchestrator knows it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    pub name: String,
    pub internal_name: String,
    pub volume_name: String,
    pub volume_internal_name: String,
}

impl SnapshotConfig {
    pub fn new(name: impl Into<String>, volume: &VolumeConfig) -> Self {
        let name = name.into();
        Self {
            internal_name: name.clone(),
            name,
            volume_name: volume.name.clone(),
            volume_internal_name: volume.internal_name.clone(),
        }
    }
}

/// Host-facing snapshot state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Online,
}

/// A snapshot that exists on the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub config: SnapshotConfig,
    /// Creation time, RFC 3339 UTC
    pub created: String,
    pub size_bytes: u64,
    pub state: SnapshotState,
}

// =============================================================================
// Publish / External
// =============================================================================

/// What a node needs to mount a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePublishInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nfs_server_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nfs_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smb_server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smb_path: String,
    pub filesystem_type: Option<NasType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mount_options: String,
}

/// Access mode reported for externally listed volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteMany,
}

/// Summary of a backend volume for host-side reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeExternalConfig {
    pub name: String,
    pub internal_name: String,
    pub size: String,
    pub protocol: String,
    pub snapshot_dir: String,
    pub unix_permissions: String,
    pub access_mode: AccessMode,
    pub service_level: String,
}

/// A backend volume not yet bound to any pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeExternal {
    pub config: VolumeExternalConfig,
    pub pool: String,
}

/// Name of the pool reported for volumes discovered outside a pool
pub const UNSET_POOL: &str = "";

/// One item of the external-volume stream
#[derive(Debug)]
pub struct VolumeExternalWrapper {
    pub volume: Option<VolumeExternal>,
    pub error: Option<Error>,
}
