//! NetApp Files NAS Storage Driver
//!
//! Implements the host-facing [`StorageDriver`] port on top of an
//! [`AnfClient`]. Volume workflows live in `volume`, snapshot workflows in
//! `snapshot`, and mount path and external view construction in `access`.
//!
//! [`AnfClient`]: crate::domain::ports::AnfClient

mod access;
mod snapshot;
mod volume;

#[cfg(test)]
mod tests;

pub use access::volume_access_path;

use crate::catalog::{
    validate_pool, validate_storage_prefix, PoolCatalog, StoragePool, PROVISIONING_LABEL_TAG,
};
use crate::config::{DriverConfig, DriverContext, PollPolicy, Timeouts, UpdateType, DRIVER_NAME};
use crate::controlplane::capacity::CapacitySelector;
use crate::controlplane::waiter::StateWaiter;
use crate::domain::ports::{
    AnfClientRef, EntitledFeature, EntitlementCheckerRef, Protocol, StorageDriver,
};
use crate::domain::volume::{
    Snapshot, SnapshotConfig, VolumeConfig, VolumeExternal, VolumeExternalWrapper,
    VolumePublishInfo,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Label key under which telemetry is stored on every volume
pub const TELEMETRY_LABEL_TAG: &str = "anf-provisioner";

/// Snapshot names generated for clones, UTC
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Timestamps reported for snapshots, UTC
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// =============================================================================
// Driver Options
// =============================================================================

/// Settings supplied by the host rather than the backend config
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub context: DriverContext,
    /// Identifier the host assigned to this backend
    pub backend_uuid: String,
    /// Host platform reported in telemetry
    pub platform: String,
    pub platform_version: String,
    /// The host persists volumes by name only, so internal names must map
    /// back to external names
    pub passthrough_store: bool,
    pub poll: PollPolicy,
}

impl DriverOptions {
    pub fn for_context(context: DriverContext) -> Self {
        Self {
            context,
            backend_uuid: String::new(),
            platform: "standalone".to_string(),
            platform_version: String::new(),
            passthrough_store: context == DriverContext::Docker,
            poll: PollPolicy::default(),
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::for_context(DriverContext::Csi)
    }
}

/// Stamped onto every volume the driver creates, clones or imports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub version: String,
    #[serde(rename = "backendUUID")]
    pub backend_uuid: String,
    pub platform: String,
    pub platform_version: String,
    pub plugin: String,
}

// =============================================================================
// Driver
// =============================================================================

/// Storage driver for NetApp Files NFS and SMB volumes
pub struct NasStorageDriver {
    config: DriverConfig,
    options: DriverOptions,
    catalog: PoolCatalog,
    selector: CapacitySelector,
    client: AnfClientRef,
    entitlements: EntitlementCheckerRef,
    waiter: StateWaiter,
    telemetry: Telemetry,
    timeouts: Timeouts,
    backend_name: String,
    initialized: AtomicBool,
}

impl NasStorageDriver {
    /// Build a ready driver from a backend config.
    ///
    /// Secrets are injected and defaults populated before the pool catalog
    /// is built. The client is initialized before validation so capacity
    /// pools can be resolved for the backend pool list.
    pub async fn initialize(
        mut config: DriverConfig,
        secrets: &BTreeMap<String, String>,
        options: DriverOptions,
        client: AnfClientRef,
        entitlements: EntitlementCheckerRef,
    ) -> Result<Self> {
        trace!(method = "Initialize", ">>>> Initialize");

        if !secrets.is_empty() {
            config.inject_secrets(secrets).map_err(|e| {
                Error::Configuration(format!("error initializing {} driver; {}", DRIVER_NAME, e))
            })?;
        }
        config.populate_defaults(options.context);

        let backend_name = if config.backend_name.is_empty() {
            default_backend_name(&config.client_id)
        } else {
            config.backend_name.clone()
        };

        let catalog = PoolCatalog::build(&config, DRIVER_NAME, &backend_name);
        let telemetry = Telemetry {
            version: crate::VERSION.to_string(),
            backend_uuid: options.backend_uuid.clone(),
            platform: options.platform.clone(),
            platform_version: options.platform_version.clone(),
            plugin: DRIVER_NAME.to_string(),
        };

        client.init().await.map_err(|e| {
            Error::Configuration(format!("error initializing {} client; {}", DRIVER_NAME, e))
        })?;

        let mut driver = Self {
            selector: CapacitySelector::new(&config.subscription_id, &config.location),
            waiter: StateWaiter::new(client.clone(), options.poll),
            timeouts: Timeouts::for_context(options.context),
            config,
            options,
            catalog,
            client,
            entitlements,
            telemetry,
            backend_name,
            initialized: AtomicBool::new(false),
        };

        driver.validate().await.map_err(|e| {
            Error::Configuration(format!("error validating {} driver; {}", DRIVER_NAME, e))
        })?;

        let inventory = driver.client.capacity_pools().await?;
        let cpools = driver.selector.backend_pools(driver.catalog.iter(), &inventory);
        let described = driver.selector.describe_backend_pools(&cpools);
        driver.config.backend_pools = driver
            .selector
            .encode_backend_pools(&described)
            .map_err(|e| Error::Configuration(format!("failed to encode storage backend pools: {}", e)))?;

        driver.timeouts = Timeouts::from_config(&driver.config, driver.options.context)?;

        info!(
            backend = %driver.backend_name,
            storage_prefix = %driver.config.storage_prefix(),
            size = %driver.config.size,
            service_level = %driver.config.service_level,
            nfs_mount_options = %driver.config.nfs_mount_options,
            limit_volume_size = %driver.config.limit_volume_size,
            export_rule = %driver.config.export_rule,
            volume_create_timeout_secs = driver.timeouts.volume_create.as_secs(),
            pools = driver.catalog.len(),
            "Initialized NetApp Files driver"
        );

        driver.initialized.store(true, Ordering::SeqCst);
        Ok(driver)
    }

    async fn validate(&self) -> Result<()> {
        validate_storage_prefix(self.config.storage_prefix())?;

        for pool in self.catalog.iter() {
            validate_pool(pool)?;

            if !pool.attributes.kerberos.is_empty() {
                if let Err(e) = self
                    .entitlements
                    .is_feature_enabled(EntitledFeature::InflightEncryption)
                    .await
                {
                    warn!(
                        pool = %pool.name,
                        attribute = "kerberos",
                        value = %pool.attributes.kerberos,
                        "Pool attribute requires an entitlement; workflows using this option may fail: {}",
                        e
                    );
                }
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn catalog(&self) -> &PoolCatalog {
        &self.catalog
    }

    /// Encoded backend pools reported to the host
    pub fn backend_pools(&self) -> &[String] {
        &self.config.backend_pools
    }

    /// Pool a volume may be created in; `None` when the host did not place it
    fn pool(&self, name: Option<&str>) -> Result<Option<&StoragePool>> {
        match name {
            None | Some("") => Ok(None),
            Some(name) => self.catalog.get(name).map(Some),
        }
    }

    async fn refresh(&self) -> Result<()> {
        self.client.refresh_resources().await.map_err(|e| {
            Error::backend("RefreshResources", format!("could not update resource cache; {}", e))
        })
    }

    async fn require_entitlement(&self, feature: EntitledFeature) -> Result<()> {
        self.entitlements.is_feature_enabled(feature).await.map_err(|e| {
            warn!(feature = %feature, "Feature is not entitled: {}", e);
            e
        })
    }

    /// `{"anf-provisioner":{...}}` with all whitespace removed
    fn telemetry_labels(&self) -> String {
        let wrapped = BTreeMap::from([(TELEMETRY_LABEL_TAG, &self.telemetry)]);
        match serde_json::to_string(&wrapped) {
            Ok(json) => json.replace(' ', ""),
            Err(e) => {
                warn!("Failed to serialize telemetry: {}", e);
                String::new()
            }
        }
    }

    /// `labels` with the telemetry label replaced
    fn with_telemetry_labels(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut labels = labels.clone();
        labels.insert(TELEMETRY_LABEL_TAG.to_string(), self.telemetry_labels());
        labels
    }

    /// Provisioning labels for volumes created outside any pool
    fn backend_provisioning_labels(&self) -> Result<String> {
        crate::catalog::labels_json(
            &self.config.labels,
            PROVISIONING_LABEL_TAG,
            crate::catalog::MAX_LABEL_LENGTH,
        )
    }
}

/// `azurenetappfiles_<first 5 characters of client ID>`, or a random suffix
/// when the client ID is too short
fn default_backend_name(client_id: &str) -> String {
    let id: String = match client_id.get(0..5) {
        Some(prefix) if client_id.len() > 5 => prefix.to_string(),
        _ => rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect(),
    };
    format!("{}_{}", DRIVER_NAME.replace('-', ""), id)
}

// =============================================================================
// StorageDriver Implementation
// =============================================================================

#[async_trait]
impl StorageDriver for NasStorageDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn backend_name(&self) -> String {
        self.backend_name.clone()
    }

    fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        trace!(method = "Terminate", ">>>> Terminate");
        self.initialized.store(false, Ordering::SeqCst);
    }

    async fn create(&self, volume: &mut VolumeConfig, pool: &str) -> Result<()> {
        self.create_volume(volume, pool).await
    }

    async fn create_clone(
        &self,
        source: &VolumeConfig,
        clone: &mut VolumeConfig,
        pool: Option<&str>,
    ) -> Result<()> {
        self.clone_volume(source, clone, pool).await
    }

    async fn import(&self, volume: &mut VolumeConfig, original_name: &str) -> Result<()> {
        self.import_volume(volume, original_name).await
    }

    async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        trace!(method = "Rename", name, new_name, ">>>> Rename");
        Ok(())
    }

    async fn destroy(&self, volume: &VolumeConfig) -> Result<()> {
        self.destroy_volume(volume).await
    }

    async fn resize(&self, volume: &mut VolumeConfig, size_bytes: u64) -> Result<()> {
        self.resize_volume(volume, size_bytes).await
    }

    async fn get(&self, name: &str) -> Result<()> {
        trace!(method = "Get", name, ">>>> Get");
        self.refresh().await?;
        self.client
            .volume_by_creation_token(name)
            .await
            .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<String>> {
        trace!(method = "List", ">>>> List");
        self.refresh().await?;
        let prefix = self.config.storage_prefix();

        Ok(self
            .client
            .volumes()
            .await?
            .into_iter()
            .filter(|volume| !volume.provisioning_state.is_gone())
            .filter_map(|volume| {
                volume
                    .creation_token
                    .strip_prefix(prefix)
                    .map(str::to_string)
            })
            .collect())
    }

    async fn publish(&self, volume: &mut VolumeConfig) -> Result<VolumePublishInfo> {
        self.publish_volume(volume).await
    }

    fn create_prepare(&self, volume: &mut VolumeConfig) {
        volume.internal_name = self.internal_volume_name(&volume.name);
    }

    async fn create_followup(&self, volume: &mut VolumeConfig) -> Result<()> {
        self.followup_volume(volume).await
    }

    fn internal_volume_name(&self, name: &str) -> String {
        access::internal_volume_name(
            name,
            self.config.storage_prefix(),
            self.options.passthrough_store,
        )
    }

    async fn can_snapshot(&self, _snapshot: &SnapshotConfig, _volume: &VolumeConfig) -> Result<()> {
        Ok(())
    }

    async fn get_snapshot(
        &self,
        snapshot: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Option<Snapshot>> {
        self.find_snapshot(snapshot, volume).await
    }

    async fn get_snapshots(&self, volume: &VolumeConfig) -> Result<Vec<Snapshot>> {
        self.list_snapshots(volume).await
    }

    async fn create_snapshot(
        &self,
        snapshot: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Snapshot> {
        self.snapshot_volume(snapshot, volume).await
    }

    async fn restore_snapshot(&self, snapshot: &SnapshotConfig, volume: &VolumeConfig) -> Result<()> {
        self.revert_to_snapshot(snapshot, volume).await
    }

    async fn delete_snapshot(&self, snapshot: &SnapshotConfig, volume: &VolumeConfig) -> Result<()> {
        self.remove_snapshot(snapshot, volume).await
    }

    fn storage_pools(&self) -> Vec<StoragePool> {
        self.catalog.iter().cloned().collect()
    }

    fn physical_pool_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn protocol(&self) -> Protocol {
        Protocol::File
    }

    fn external_config(&self) -> serde_json::Value {
        match serde_json::to_value(self.config.redacted()) {
            Ok(value) => value,
            Err(e) => {
                warn!(backend = %self.backend_name, "Could not serialize driver config: {}", e);
                serde_json::Value::Null
            }
        }
    }

    async fn volume_external(&self, name: &str) -> Result<VolumeExternal> {
        self.refresh().await?;
        let volume = self.client.volume_by_creation_token(name).await?;
        Ok(access::volume_external(&volume))
    }

    async fn volume_external_wrappers(&self, sink: mpsc::Sender<VolumeExternalWrapper>) {
        let volumes = match self.refresh().await {
            Ok(()) => self.client.volumes().await,
            Err(e) => Err(e),
        };

        let volumes = match volumes {
            Ok(volumes) => volumes,
            Err(e) => {
                let _ = sink
                    .send(VolumeExternalWrapper {
                        volume: None,
                        error: Some(e),
                    })
                    .await;
                return;
            }
        };

        let prefix = self.config.storage_prefix();
        for volume in volumes
            .iter()
            .filter(|v| !v.provisioning_state.is_gone())
            .filter(|v| v.creation_token.starts_with(prefix))
        {
            let wrapper = VolumeExternalWrapper {
                volume: Some(access::volume_external(volume)),
                error: None,
            };
            if sink.send(wrapper).await.is_err() {
                debug!("External volume receiver closed");
                return;
            }
        }
    }

    fn update_type(&self, original: &dyn StorageDriver) -> BTreeSet<UpdateType> {
        match original.as_any().downcast_ref::<NasStorageDriver>() {
            Some(original) => self.config.update_type(&original.config),
            None => BTreeSet::from([UpdateType::InvalidUpdate]),
        }
    }

    async fn reconcile_node_access(&self, _nodes: &[String]) -> Result<()> {
        trace!(method = "ReconcileNodeAccess", ">>>> ReconcileNodeAccess");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
