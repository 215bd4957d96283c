//! Volume naming, mount paths and external views

use crate::catalog::is_csi_name;
use crate::domain::export::NasType;
use crate::domain::ports::{FileSystem, MountTarget};
use crate::domain::volume::{
    AccessMode, VolumeConfig, VolumeExternal, VolumeExternalConfig, UNSET_POOL,
};
use tracing::debug;

/// Creation token for a volume the host calls `name`.
///
/// With a passthrough store the host only remembers names, so the token must
/// map back: it is the storage prefix plus the name. CSI names already carry
/// a UUID and are used verbatim. Anything else gets a fresh UUID, since mount
/// paths on the service are short.
pub fn internal_volume_name(name: &str, storage_prefix: &str, passthrough_store: bool) -> String {
    if passthrough_store {
        format!("{}{}", storage_prefix, name)
    } else if is_csi_name(name) {
        debug!(volume_internal = %name, "Using volume name as internal name");
        name.to_string()
    } else {
        format!("anf-{}", uuid::Uuid::new_v4())
    }
}

/// Export path of a volume.
///
/// Read-only clones have no volume of their own and are reached through the
/// snapshot directory of their source.
pub fn volume_access_path(config: &VolumeConfig, volume: &FileSystem, nas_type: NasType) -> String {
    let snapshot = config.clone_snapshot_name().unwrap_or_default();
    let source = config.clone_source_token().unwrap_or_default();

    match (nas_type, config.read_only_clone) {
        (NasType::Nfs, true) => format!("/{}/.snapshot/{}", source, snapshot),
        (NasType::Nfs, false) => format!("/{}", volume.creation_token),
        (NasType::Smb, true) => format!("\\{}\\~snapshot\\{}", source, snapshot),
        (NasType::Smb, false) => format!("\\{}", volume.creation_token),
    }
}

/// Address a node should mount: the FQDN for Kerberos volumes and SMB
/// shares, the IP otherwise
pub(super) fn server_address(volume: &FileSystem, target: &MountTarget, nas_type: NasType) -> String {
    if volume.kerberos_enabled || nas_type == NasType::Smb {
        target.server_fqdn.clone()
    } else {
        target.ip_address.clone()
    }
}

/// Host view of a backend volume
pub(super) fn volume_external(volume: &FileSystem) -> VolumeExternal {
    VolumeExternal {
        config: VolumeExternalConfig {
            name: volume.name.clone(),
            internal_name: volume.creation_token.clone(),
            size: volume.quota_in_bytes.to_string(),
            protocol: "file".to_string(),
            snapshot_dir: volume.snapshot_directory.to_string(),
            unix_permissions: volume.unix_permissions.clone(),
            access_mode: AccessMode::ReadWriteMany,
            service_level: volume.service_level.clone(),
        },
        pool: UNSET_POOL.to_string(),
    }
}
