//! Volume workflows: create, clone, import, destroy, resize, publish

use super::access::{server_address, volume_access_path};
use super::{NasStorageDriver, SNAPSHOT_NAME_FORMAT};
use crate::catalog::{
    convert_size_to_bytes, nfs_version_from_mount_options, parse_bool, title_case,
    validate_creation_token, validate_export_rule, validate_octal_unix_permissions,
    validate_volume_name, Attribute, AttributeResolver, Defaults, MAX_LABEL_LENGTH, NFS_VERSION_3,
    PROVISIONING_LABEL_TAG, SUPPORTED_NFS_VERSIONS,
};
use crate::config::{MINIMUM_ANF_VOLUME_SIZE_BYTES, MINIMUM_VOLUME_SIZE_BYTES};
use crate::controlplane::workflow::{Phase, Workflow};
use crate::domain::export::{
    ExportPolicy, ExportRule, KerberosMode, NasType, NfsProtocol, PROTOCOL_CIFS, PROTOCOL_NFSV3,
    PROTOCOL_NFSV41,
};
use crate::domain::ports::{
    create_volume_id, BackendFeature, BackendSnapshot, EntitledFeature, FileSystem,
    FilesystemCreateRequest,
};
use crate::domain::state::ProvisioningState;
use crate::domain::volume::{VolumeConfig, VolumePublishInfo};
use crate::error::{CandidateFailures, Error, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

/// Protocol family a backend volume was created with
pub(super) fn nas_type_of(volume: &FileSystem) -> NasType {
    if volume.protocol_types.iter().any(|p| p == PROTOCOL_CIFS) {
        NasType::Smb
    } else {
        NasType::Nfs
    }
}

/// Whether an imported volume's provisioning label may be replaced: it is
/// blank or holds nothing but our own provisioning labels
fn allow_pool_label_overwrite(tag: &str, value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(value) {
        Ok(parsed) => parsed.len() == 1 && parsed.contains_key(tag),
        Err(_) => false,
    }
}

fn volume_state_error(name: &str, state: ProvisioningState) -> Error {
    Error::InvalidState {
        kind: "volume".to_string(),
        name: name.to_string(),
        state: state.to_string(),
        expected: ProvisioningState::Available.to_string(),
    }
}

fn existing_volume_error(name: &str, extant: &FileSystem) -> Error {
    if extant.provisioning_state.is_creating() {
        return Error::VolumeCreating {
            name: name.to_string(),
            message: format!(
                "volume state is still {}, not {}",
                extant.provisioning_state,
                ProvisioningState::Available
            ),
        };
    }
    warn!(
        volume = %name,
        state = %extant.provisioning_state,
        "Volume already exists"
    );
    Error::VolumeExists {
        name: name.to_string(),
    }
}

impl NasStorageDriver {
    // =========================================================================
    // Create
    // =========================================================================

    pub(super) async fn create_volume(&self, volume: &mut VolumeConfig, pool: &str) -> Result<()> {
        let mut workflow = Workflow::start("create", volume.internal_name.clone());
        let result = self.run_create(volume, pool, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_create(
        &self,
        volume: &mut VolumeConfig,
        pool_name: &str,
        workflow: &mut Workflow,
    ) -> Result<()> {
        let name = volume.internal_name.clone();

        validate_volume_name(&volume.name)?;
        validate_creation_token(&name)?;

        let pool = self
            .pool(Some(pool_name))?
            .ok_or_else(|| Error::Validation("pool not specified".to_string()))?;

        let kerberos = pool.kerberos()?;

        // Effective attributes, each from the first layer that sets it
        let defaults = Defaults::with_open_unix_permissions(
            self.client.has_feature(BackendFeature::UnixPermissions),
        );
        let resolver = AttributeResolver::for_volume(volume, pool, &self.config, &defaults);

        let mut size_bytes = convert_size_to_bytes(&volume.size).map_err(|e| {
            Error::Validation(format!("could not convert volume size {}; {}", volume.size, e))
        })?;
        if size_bytes == 0 {
            let pool_default = AttributeResolver::new()
                .layer(pool)
                .layer(&self.config)
                .layer(&defaults)
                .value(Attribute::Size);
            size_bytes = convert_size_to_bytes(&pool_default)?;
        }
        if size_bytes < MINIMUM_VOLUME_SIZE_BYTES {
            return Err(Error::Validation(format!(
                "requested volume size ({} bytes) is too small; the minimum volume size is {} bytes",
                size_bytes, MINIMUM_VOLUME_SIZE_BYTES
            )));
        }
        if size_bytes < MINIMUM_ANF_VOLUME_SIZE_BYTES {
            warn!(
                volume = %name,
                size = size_bytes,
                "Requested size is too small. Setting volume size to the minimum allowable."
            );
            size_bytes = MINIMUM_ANF_VOLUME_SIZE_BYTES;
        }
        self.config.check_volume_size_limit(size_bytes)?;

        let service_level = title_case(&resolver.value(Attribute::ServiceLevel));
        let snapshot_dir = resolver.value(Attribute::SnapshotDir);
        let snapshot_directory = parse_bool(&snapshot_dir)
            .map_err(|e| Error::Validation(format!("invalid value for snapshotDir; {}", e)))?;
        let unix_permissions = resolver.value(Attribute::UnixPermissions);
        let mount_options = resolver.value(Attribute::MountOptions);
        let allowed_clients = resolver.value(Attribute::ExportRule);
        drop(resolver);

        if !unix_permissions.is_empty() {
            validate_octal_unix_permissions(&unix_permissions).map_err(|e| {
                Error::Validation(format!("invalid value for unixPermissions; {}", e))
            })?;
        }
        if !allowed_clients.is_empty() {
            validate_export_rule(&allowed_clients).map_err(|e| {
                Error::Validation(format!("invalid value for exportRule; {}", e))
            })?;
        }

        self.refresh().await?;

        if kerberos.is_some() {
            self.require_entitlement(EntitledFeature::InflightEncryption).await?;
        }

        if let Some(extant) = self.client.volume_exists(volume).await? {
            return Err(existing_volume_error(&name, &extant));
        }

        let nas_type = pool.offers.nas_type;
        let (protocol_types, export_policy) = match nas_type {
            NasType::Smb => (vec![PROTOCOL_CIFS.to_string()], None),
            NasType::Nfs => {
                let version = nfs_version_from_mount_options(
                    &mount_options,
                    NFS_VERSION_3,
                    SUPPORTED_NFS_VERSIONS,
                )?;
                let mut protocol = if version == NFS_VERSION_3 {
                    NfsProtocol::V3
                } else {
                    NfsProtocol::V41
                };

                let mut rule = ExportRule::for_protocol(&allowed_clients, protocol);
                if let Some(mode) = kerberos {
                    rule.apply_kerberos(mode);
                    protocol = NfsProtocol::V41;
                }
                (
                    vec![protocol.protocol_type().to_string()],
                    Some(ExportPolicy { rules: vec![rule] }),
                )
            }
        };

        let mut labels = self.with_telemetry_labels(&BTreeMap::new());
        labels.insert(
            PROVISIONING_LABEL_TAG.to_string(),
            pool.labels_json(PROVISIONING_LABEL_TAG, MAX_LABEL_LENGTH)?,
        );

        volume.size = size_bytes.to_string();
        volume.service_level = (!service_level.is_empty()).then(|| service_level.clone());
        volume.snapshot_dir = Some(snapshot_dir);
        volume.unix_permissions = (!unix_permissions.is_empty()).then(|| unix_permissions.clone());

        let subnets = self.client.subnets().await?;
        let subnet = self
            .selector
            .random_subnet_for_pool(pool, &subnets)
            .ok_or_else(|| Error::NoSubnet {
                pool: pool.name.clone(),
            })?;

        let inventory = self.client.capacity_pools().await?;
        let candidates = self.selector.candidates(pool, &service_level, &inventory);
        if candidates.is_empty() {
            return Err(Error::NoCapacityPools {
                pool: pool.name.clone(),
            });
        }

        workflow.enter(Phase::Placing);
        let mut failures = CandidateFailures::default();

        for cpool in &candidates {
            debug!(
                capacity_pool = %cpool.full_name(),
                creation_token = %name,
                size = size_bytes,
                service_level = %service_level,
                snapshot_dir = snapshot_directory,
                unix_permissions = %unix_permissions,
                protocol_types = ?protocol_types,
                network_features = %pool.attributes.network_features,
                "Creating volume"
            );

            let mut request = FilesystemCreateRequest {
                resource_group: cpool.resource_group.clone(),
                netapp_account: cpool.netapp_account.clone(),
                capacity_pool: cpool.name.clone(),
                name: volume.name.clone(),
                subnet_id: subnet.id.clone(),
                creation_token: name.clone(),
                labels: labels.clone(),
                protocol_types: protocol_types.clone(),
                quota_in_bytes: size_bytes,
                snapshot_directory,
                snapshot_id: None,
                network_features: pool.attributes.network_features.clone(),
                kerberos_enabled: kerberos.is_some(),
                unix_permissions: None,
                export_policy: None,
            };
            if nas_type == NasType::Nfs {
                request.unix_permissions = Some(unix_permissions.clone());
                request.export_policy = export_policy.clone();
            }

            match self.client.create_volume(&request).await {
                Ok(created) => {
                    workflow.enter(Phase::Submitted);
                    volume.internal_id = Some(created.id.clone());
                    info!(
                        volume = %name,
                        capacity_pool = %cpool.full_name(),
                        "Volume create submitted"
                    );
                    return self
                        .waiter
                        .wait_for_volume_create(&created, &self.timeouts, workflow)
                        .await;
                }
                Err(e) => {
                    error!(
                        volume = %name,
                        capacity_pool = %cpool.full_name(),
                        "Error creating volume: {}",
                        e
                    );
                    failures.push(cpool.full_name(), e.to_string());
                }
            }
        }

        Err(Error::PlacementExhausted {
            volume: name,
            failures,
        })
    }

    // =========================================================================
    // Clone
    // =========================================================================

    pub(super) async fn clone_volume(
        &self,
        source: &VolumeConfig,
        clone: &mut VolumeConfig,
        pool: Option<&str>,
    ) -> Result<()> {
        let mut workflow = Workflow::start("create_clone", clone.internal_name.clone());
        let result = self.run_clone(source, clone, pool, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_clone(
        &self,
        source: &VolumeConfig,
        clone: &mut VolumeConfig,
        pool: Option<&str>,
        workflow: &mut Workflow,
    ) -> Result<()> {
        let name = clone.internal_name.clone();

        validate_volume_name(&clone.name)?;
        validate_creation_token(&name)?;

        self.refresh().await?;

        let source_volume = self.client.volume(source).await?;

        if source_volume.kerberos_enabled {
            self.require_entitlement(EntitledFeature::InflightEncryption).await?;
        }

        let clone_id = create_volume_id(
            &self.config.subscription_id,
            &source_volume.resource_group,
            &source_volume.netapp_account,
            &source_volume.capacity_pool,
            &clone.name,
        );
        if let Some(extant) = self.client.volume_exists_by_id(&clone_id).await? {
            return Err(existing_volume_error(&name, &extant));
        }

        if clone.read_only_clone && !source_volume.snapshot_directory {
            return Err(Error::Validation(format!(
                "snapshot directory access is set to {} and readOnly clone is set to {}",
                source_volume.snapshot_directory, clone.read_only_clone
            )));
        }

        let source_snapshot = match clone.clone_snapshot_name().map(str::to_string) {
            Some(snapshot) => {
                let found = self.client.snapshot_for_volume(&source_volume, &snapshot).await?;
                if !found.provisioning_state.is_usable() {
                    return Err(Error::InvalidState {
                        kind: "snapshot".to_string(),
                        name: snapshot,
                        state: found.provisioning_state.to_string(),
                        expected: ProvisioningState::Available.to_string(),
                    });
                }
                debug!(snapshot = %found.name, source = %source_volume.name, "Found source snapshot");
                found
            }
            None => {
                let created = self.create_source_snapshot(&source_volume).await?;
                clone.clone_source_snapshot_internal = Some(created.name.clone());
                created
            }
        };

        if clone.read_only_clone {
            debug!(
                volume = %name,
                source = %source_volume.creation_token,
                snapshot = %source_snapshot.name,
                "Read-only clone needs no backend volume"
            );
            return Ok(());
        }

        let mut labels = self.with_telemetry_labels(&source_volume.labels);
        if pool.map_or(true, str::is_empty) {
            labels.insert(
                PROVISIONING_LABEL_TAG.to_string(),
                self.backend_provisioning_labels()?,
            );
        }

        debug!(
            creation_token = %name,
            source_volume = %source_volume.creation_token,
            source_snapshot = %source_snapshot.name,
            unix_permissions = %source_volume.unix_permissions,
            network_features = %source_volume.network_features,
            "Cloning volume"
        );

        let mut request = FilesystemCreateRequest {
            resource_group: source_volume.resource_group.clone(),
            netapp_account: source_volume.netapp_account.clone(),
            capacity_pool: source_volume.capacity_pool.clone(),
            name: clone.name.clone(),
            subnet_id: source_volume.subnet_id.clone(),
            creation_token: name.clone(),
            labels,
            protocol_types: source_volume.protocol_types.clone(),
            quota_in_bytes: source_volume.quota_in_bytes,
            snapshot_directory: source_volume.snapshot_directory,
            snapshot_id: Some(source_snapshot.snapshot_id.clone()),
            network_features: source_volume.network_features.clone(),
            kerberos_enabled: false,
            unix_permissions: None,
            export_policy: None,
        };
        if nas_type_of(&source_volume) == NasType::Nfs {
            request.export_policy = Some(source_volume.export_policy.clone());
            request.unix_permissions = Some(source_volume.unix_permissions.clone());
            request.kerberos_enabled = source_volume.kerberos_enabled;
        }

        let created = self.client.create_volume(&request).await?;
        workflow.enter(Phase::Submitted);
        clone.internal_id = Some(created.id.clone());

        self.waiter
            .wait_for_volume_create(&created, &self.timeouts, workflow)
            .await
    }

    /// Snapshot a clone source under a timestamp name and wait until usable
    async fn create_source_snapshot(&self, source: &FileSystem) -> Result<BackendSnapshot> {
        let snapshot_name = Utc::now().format(SNAPSHOT_NAME_FORMAT).to_string();
        debug!(snapshot = %snapshot_name, source = %source.name, "Creating source snapshot");

        let created = self.client.create_snapshot(source, &snapshot_name).await?;
        self.waiter
            .wait_for_snapshot_state(
                &created,
                source,
                ProvisioningState::Available,
                &[ProvisioningState::Error],
                self.timeouts.snapshot,
            )
            .await?;

        let snapshot = self.client.snapshot_for_volume(source, &snapshot_name).await?;
        debug!(snapshot = %snapshot.name, source = %source.name, "Created source snapshot");
        Ok(snapshot)
    }

    // =========================================================================
    // Import
    // =========================================================================

    pub(super) async fn import_volume(&self, volume: &mut VolumeConfig, original_name: &str) -> Result<()> {
        let mut workflow = Workflow::start("import", original_name);
        let result = self.run_import(volume, original_name, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_import(
        &self,
        volume: &mut VolumeConfig,
        original_name: &str,
        workflow: &mut Workflow,
    ) -> Result<()> {
        let rejected = |reason: String| Error::ImportRejected {
            name: original_name.to_string(),
            reason,
        };

        self.refresh().await?;

        let existing = self.client.volume_by_creation_token(original_name).await?;

        if existing.protocol_types.len() > 1 {
            return Err(rejected("dual-protocol volumes are not supported".to_string()));
        }

        let inventory = self.client.capacity_pools().await?;
        self.selector
            .ensure_volume_in_valid_capacity_pool(self.catalog.iter(), &inventory, &existing)?;

        volume.size = existing.quota_in_bytes.to_string();

        debug!(
            creation_token = %existing.creation_token,
            managed = !volume.import_not_managed,
            state = %existing.provisioning_state,
            capacity_pool = %existing.capacity_pool,
            size_bytes = existing.quota_in_bytes,
            "Found volume to import"
        );

        if !volume.import_not_managed {
            let snapshot_directory = match volume.snapshot_dir.as_deref() {
                Some(value) if !value.is_empty() => Some(parse_bool(value).map_err(|_| {
                    rejected(format!("snapshot directory access is set to {}", value))
                })?),
                _ => None,
            };

            let kerberos = KerberosMode::parse_optional(&self.config.kerberos)?;
            if kerberos.is_some() {
                self.require_entitlement(EntitledFeature::InflightEncryption).await?;
            }
            match (kerberos.is_some(), existing.kerberos_enabled) {
                (true, false) => {
                    return Err(rejected(
                        "non-kerberos volume cannot be imported on a kerberos enabled backend"
                            .to_string(),
                    ))
                }
                (false, true) => {
                    return Err(rejected(
                        "kerberos volume cannot be imported on a non-kerberos enabled backend"
                            .to_string(),
                    ))
                }
                _ => {}
            }
            let export_rule = kerberos.map(ExportRule::kerberos_only);

            let mut labels = existing.labels.clone();
            let provisioning = labels
                .get(PROVISIONING_LABEL_TAG)
                .map(String::as_str)
                .unwrap_or_default();
            if allow_pool_label_overwrite(PROVISIONING_LABEL_TAG, provisioning) {
                labels.insert(PROVISIONING_LABEL_TAG.to_string(), String::new());
            }
            let labels = self.with_telemetry_labels(&labels);

            let protocol = existing.protocol_types.first().map(String::as_str).unwrap_or_default();
            let unix_permissions = match (self.config.nas_type, protocol) {
                (NasType::Smb, PROTOCOL_CIFS) => None,
                (NasType::Nfs, PROTOCOL_NFSV3 | PROTOCOL_NFSV41) => {
                    let perms = [
                        volume.unix_permissions.as_deref().unwrap_or_default(),
                        self.config.unix_permissions.as_str(),
                        existing.unix_permissions.as_str(),
                    ]
                    .into_iter()
                    .find(|p| !p.is_empty())
                    .unwrap_or_default()
                    .to_string();
                    if !perms.is_empty() {
                        validate_octal_unix_permissions(&perms).map_err(|e| rejected(e.to_string()))?;
                    }
                    Some(perms)
                }
                _ => {
                    return Err(rejected(
                        "backend and volume protocols do not match".to_string(),
                    ))
                }
            };

            self.client
                .modify_volume(
                    &existing,
                    labels,
                    unix_permissions.as_deref().filter(|p| !p.is_empty()),
                    snapshot_directory,
                    export_rule.as_ref(),
                )
                .await
                .map_err(|e| {
                    error!(original_name = %original_name, "Could not import volume, volume modify failed: {}", e);
                    e
                })?;
            workflow.enter(Phase::Submitted);

            info!(
                name = %existing.name,
                creation_token = %existing.creation_token,
                unix_permissions = ?unix_permissions,
                "Volume modified"
            );

            workflow.enter(Phase::Polling);
            self.waiter
                .wait_for_volume_state(
                    &existing,
                    ProvisioningState::Available,
                    &[ProvisioningState::Error],
                    self.timeouts.default,
                )
                .await?;
        }

        volume.internal_name = original_name.to_string();
        volume.internal_id = Some(existing.id);
        Ok(())
    }

    // =========================================================================
    // Destroy
    // =========================================================================

    pub(super) async fn destroy_volume(&self, volume: &VolumeConfig) -> Result<()> {
        let mut workflow = Workflow::start("destroy", volume.internal_name.clone());
        let result = self.run_destroy(volume, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_destroy(&self, volume: &VolumeConfig, workflow: &mut Workflow) -> Result<()> {
        let name = &volume.internal_name;

        self.refresh().await?;

        let Some(extant) = self.client.volume_exists(volume).await? else {
            warn!(volume = %name, "Volume already deleted");
            return Ok(());
        };

        if extant.provisioning_state == ProvisioningState::Deleting {
            // Already going away; wait as long as a create would
            workflow.enter(Phase::Polling);
            self.waiter
                .wait_for_volume_state(
                    &extant,
                    ProvisioningState::Deleted,
                    &[ProvisioningState::Error],
                    self.timeouts.volume_create,
                )
                .await?;
            return Ok(());
        }

        self.client.delete_volume(&extant).await?;
        workflow.enter(Phase::Submitted);
        info!(volume = %extant.name, "Volume deleted");

        workflow.enter(Phase::Polling);
        self.waiter
            .wait_for_volume_state(
                &extant,
                ProvisioningState::Deleted,
                &[ProvisioningState::Error],
                self.timeouts.default,
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // Resize
    // =========================================================================

    pub(super) async fn resize_volume(&self, volume: &mut VolumeConfig, size_bytes: u64) -> Result<()> {
        let mut workflow = Workflow::start("resize", volume.internal_name.clone());
        let result = self.run_resize(volume, size_bytes, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_resize(
        &self,
        volume: &mut VolumeConfig,
        size_bytes: u64,
        workflow: &mut Workflow,
    ) -> Result<()> {
        let name = volume.internal_name.clone();

        self.refresh().await?;

        let existing = self.client.volume(volume).await?;
        if volume.internal_id.is_none() {
            volume.internal_id = Some(existing.id.clone());
        }

        if !existing.provisioning_state.is_usable() {
            return Err(volume_state_error(&name, existing.provisioning_state));
        }

        volume.size = existing.quota_in_bytes.to_string();

        if size_bytes == existing.quota_in_bytes {
            debug!(volume = %name, size_bytes, "Volume already at requested size");
            return Ok(());
        }
        if size_bytes < existing.quota_in_bytes {
            return Err(Error::Validation(format!(
                "requested size {} is less than existing volume size {}",
                size_bytes, existing.quota_in_bytes
            )));
        }

        self.config.check_volume_size_limit(size_bytes)?;

        self.client.resize_volume(&existing, size_bytes).await?;
        workflow.enter(Phase::Submitted);

        volume.size = size_bytes.to_string();
        info!(volume = %name, size_bytes, "Volume resized");
        Ok(())
    }

    // =========================================================================
    // Publish and Followup
    // =========================================================================

    /// The backend volume serving `volume`; a read-only clone is served by
    /// its source
    async fn serving_volume(&self, volume: &mut VolumeConfig) -> Result<FileSystem> {
        if volume.read_only_clone {
            let source = volume.clone_source_token().unwrap_or_default().to_string();
            return self.client.volume_by_creation_token(&source).await;
        }

        let existing = self.client.volume(volume).await?;
        if volume.internal_id.is_none() {
            volume.internal_id = Some(existing.id.clone());
        }
        Ok(existing)
    }

    pub(super) async fn publish_volume(&self, volume: &mut VolumeConfig) -> Result<VolumePublishInfo> {
        trace!(method = "Publish", name = %volume.internal_name, ">>>> Publish");
        self.refresh().await?;

        let existing = self.serving_volume(volume).await?;
        let target = existing.mount_targets.first().ok_or_else(|| {
            Error::backend(
                "Publish",
                format!("volume {} has no mount targets", volume.internal_name),
            )
        })?;

        let mount_options = match volume.mount_options.as_deref() {
            Some(options) if !options.is_empty() => options.to_string(),
            _ => self.config.nfs_mount_options.clone(),
        };

        let nas_type = nas_type_of(&existing);
        let mut info = VolumePublishInfo {
            filesystem_type: Some(nas_type),
            ..Default::default()
        };
        match nas_type {
            NasType::Smb => {
                info.smb_path = volume.access_info.smb_path.clone();
                info.smb_server = target.server_fqdn.clone();
            }
            NasType::Nfs => {
                info.nfs_path = volume.access_info.nfs_path.clone();
                info.nfs_server_ip = server_address(&existing, target, nas_type);
                info.mount_options = mount_options;
            }
        }
        Ok(info)
    }

    pub(super) async fn followup_volume(&self, volume: &mut VolumeConfig) -> Result<()> {
        trace!(method = "CreateFollowup", name = %volume.internal_name, ">>>> CreateFollowup");
        self.refresh().await?;

        let existing = self.serving_volume(volume).await?;
        if !existing.provisioning_state.is_usable() {
            return Err(volume_state_error(&volume.internal_name, existing.provisioning_state));
        }
        let target = existing.mount_targets.first().ok_or_else(|| {
            Error::backend(
                "CreateFollowup",
                format!("volume {} has no mount targets", volume.internal_name),
            )
        })?;

        let nas_type = nas_type_of(&existing);
        let path = volume_access_path(volume, &existing, nas_type);
        let server = server_address(&existing, target, nas_type);
        match nas_type {
            NasType::Smb => {
                volume.access_info.smb_path = path;
                volume.access_info.smb_server = server;
            }
            NasType::Nfs => {
                volume.access_info.nfs_path = path;
                volume.access_info.nfs_server_ip = server;
            }
        }
        volume.file_system = Some(nas_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_label_overwrite() {
        assert!(allow_pool_label_overwrite("provisioning", ""));
        assert!(allow_pool_label_overwrite(
            "provisioning",
            r#"{"provisioning":{"team":"a"}}"#
        ));
        assert!(!allow_pool_label_overwrite("provisioning", r#"{"owner":"ops"}"#));
        assert!(!allow_pool_label_overwrite("provisioning", "handwritten"));
    }

    #[test]
    fn test_nas_type_of() {
        let mut volume = FileSystem {
            protocol_types: vec![PROTOCOL_NFSV41.into()],
            ..Default::default()
        };
        assert_eq!(nas_type_of(&volume), NasType::Nfs);
        volume.protocol_types = vec![PROTOCOL_CIFS.into()];
        assert_eq!(nas_type_of(&volume), NasType::Smb);
    }
}
