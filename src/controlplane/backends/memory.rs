//! In-Memory NetApp Files Client
//!
//! Simulates the service for standalone runs and scenario tests. Volumes and
//! snapshots advance through their provisioning states as they are polled,
//! following a per-volume script. Creates can be made to fail per capacity
//! pool, and every mutating call is counted.

use crate::config::DriverConfig;
use crate::domain::export::{ExportPolicy, ExportRule};
use crate::domain::ports::{
    create_volume_id, AnfClient, BackendFeature, BackendSnapshot, CapacityPool, FileSystem,
    FilesystemCreateRequest, MountTarget, Subnet,
};
use crate::domain::state::ProvisioningState;
use crate::domain::volume::VolumeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

pub const DEFAULT_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const DEFAULT_LOCATION: &str = "eastus";

// =============================================================================
// Inventory
// =============================================================================

/// Resources the simulated subscription starts with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryInventory {
    pub capacity_pools: Vec<CapacityPool>,
    pub subnets: Vec<Subnet>,
}

impl MemoryInventory {
    /// Load an inventory file, JSON or YAML by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
            _ => Ok(serde_json::from_str(&contents)?),
        }
    }

    /// Synthesize an inventory matching what a backend config asks for.
    ///
    /// Each configured capacity pool becomes one pool; names without a
    /// resource group and account get them from the first configured ones.
    pub fn from_config(config: &DriverConfig) -> Self {
        let location = if config.location.is_empty() {
            DEFAULT_LOCATION.to_string()
        } else {
            config.location.clone()
        };
        let resource_group = config
            .resource_groups
            .first()
            .cloned()
            .unwrap_or_else(|| "anf-rg".to_string());
        let account = config
            .netapp_accounts
            .first()
            .map(|a| a.rsplit('/').next().unwrap_or(a).to_string())
            .unwrap_or_else(|| "anf-account".to_string());
        let service_level = if config.service_level.is_empty() {
            "Premium".to_string()
        } else {
            crate::catalog::title_case(&config.service_level)
        };

        let mut names: Vec<String> = config.capacity_pools.clone();
        for vpool in &config.storage {
            names.extend(vpool.capacity_pools.clone().unwrap_or_default());
        }
        if names.is_empty() {
            names.push("pool1".to_string());
        }

        let mut capacity_pools = Vec::new();
        for name in names {
            let parts: Vec<&str> = name.split('/').collect();
            let (rg, acct, pool) = match parts.as_slice() {
                [rg, acct, pool] => (rg.to_string(), acct.to_string(), pool.to_string()),
                _ => (resource_group.clone(), account.clone(), name.clone()),
            };
            if capacity_pools
                .iter()
                .any(|c: &CapacityPool| c.resource_group == rg && c.netapp_account == acct && c.name == pool)
            {
                continue;
            }
            capacity_pools.push(CapacityPool {
                id: format!(
                    "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.NetApp/netAppAccounts/{}/capacityPools/{}",
                    config.subscription_id, rg, acct, pool
                ),
                resource_group: rg,
                netapp_account: acct,
                name: pool,
                location: location.clone(),
                service_level: service_level.clone(),
                provisioning_state: "Succeeded".to_string(),
                qos_type: "Auto".to_string(),
            });
        }

        let (vnet_rg, vnet) = match config.virtual_network.split_once('/') {
            Some((rg, vnet)) => (rg.to_string(), vnet.to_string()),
            None if !config.virtual_network.is_empty() => {
                (resource_group.clone(), config.virtual_network.clone())
            }
            None => (resource_group.clone(), "anf-vnet".to_string()),
        };
        let subnet_name = match config.subnet.rsplit('/').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "anf-subnet".to_string(),
        };
        let subnets = vec![Subnet {
            id: format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
                config.subscription_id, vnet_rg, vnet, subnet_name
            ),
            resource_group: vnet_rg,
            virtual_network: vnet,
            name: subnet_name,
            location,
        }];

        Self {
            capacity_pools,
            subnets,
        }
    }

    /// Three capacity pools (Premium, Standard, Ultra) and one subnet
    pub fn sample() -> Self {
        let cpool = |name: &str, level: &str| CapacityPool {
            id: format!("rg1/acct1/{}", name),
            resource_group: "rg1".into(),
            netapp_account: "acct1".into(),
            name: name.into(),
            location: DEFAULT_LOCATION.into(),
            service_level: level.into(),
            provisioning_state: "Succeeded".into(),
            qos_type: "Auto".into(),
        };
        Self {
            capacity_pools: vec![
                cpool("pool1", "Premium"),
                cpool("pool2", "Standard"),
                cpool("pool3", "Ultra"),
            ],
            subnets: vec![Subnet {
                id: "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/anf".into(),
                resource_group: "rg1".into(),
                virtual_network: "vnet1".into(),
                name: "anf".into(),
                location: DEFAULT_LOCATION.into(),
            }],
        }
    }
}

// =============================================================================
// Scripted Behavior
// =============================================================================

/// How a newly created volume progresses when polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateBehavior {
    /// Becomes Available after `polls` further state queries
    Settle { polls: u32 },
    /// Stays Creating forever
    Stuck,
    /// Moves to Error on the first state query
    Fail,
    #[default]
    Immediate,
}

#[derive(Debug, Clone)]
struct VolumeRecord {
    volume: FileSystem,
    /// Next state and how many polls remain before reaching it
    pending: Option<(ProvisioningState, u32)>,
}

impl VolumeRecord {
    fn advance(&mut self) {
        if let Some((target, remaining)) = self.pending {
            if remaining == 0 {
                self.volume.provisioning_state = target;
                self.pending = None;
            } else {
                self.pending = Some((target, remaining - 1));
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SnapshotRecord {
    snapshot: BackendSnapshot,
    pending: Option<ProvisioningState>,
}

// =============================================================================
// Memory Client
// =============================================================================

/// NetApp Files simulated in memory
pub struct MemoryAnfClient {
    subscription_id: String,
    inventory: RwLock<MemoryInventory>,
    features: RwLock<BTreeSet<BackendFeature>>,
    /// Volumes keyed by resource ID
    volumes: DashMap<String, VolumeRecord>,
    /// Snapshots keyed by resource ID
    snapshots: DashMap<String, SnapshotRecord>,
    behaviors: DashMap<String, CreateBehavior>,
    /// Create failures keyed by capacity pool full name
    pool_faults: DashMap<String, String>,
    fail_deletes: RwLock<bool>,
    state_query_faults: AtomicUsize,
    create_attempts: Mutex<Vec<String>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    modify_calls: AtomicUsize,
    resize_calls: AtomicUsize,
    snapshot_create_calls: AtomicUsize,
    refreshes: AtomicUsize,
    next_address: AtomicU64,
}

impl MemoryAnfClient {
    pub fn new(subscription_id: impl Into<String>, inventory: MemoryInventory) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            inventory: RwLock::new(inventory),
            features: RwLock::new(BTreeSet::from([
                BackendFeature::UnixPermissions,
                BackendFeature::NetworkFeatures,
            ])),
            volumes: DashMap::new(),
            snapshots: DashMap::new(),
            behaviors: DashMap::new(),
            pool_faults: DashMap::new(),
            fail_deletes: RwLock::new(false),
            state_query_faults: AtomicUsize::new(0),
            create_attempts: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            modify_calls: AtomicUsize::new(0),
            resize_calls: AtomicUsize::new(0),
            snapshot_create_calls: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            next_address: AtomicU64::new(4),
        }
    }

    pub fn with_default_inventory() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_ID, MemoryInventory::sample())
    }

    // ===== Scripting =====

    /// Script how the volume with creation token `token` settles once created
    pub fn set_create_behavior(&self, token: &str, behavior: CreateBehavior) {
        self.behaviors.insert(token.to_string(), behavior);
    }

    /// Make creates in `capacity_pool` (full name) fail with `reason`
    pub fn fail_capacity_pool(&self, capacity_pool: &str, reason: &str) {
        self.pool_faults
            .insert(capacity_pool.to_string(), reason.to_string());
    }

    pub fn fail_deletes(&self, fail: bool) {
        *self.fail_deletes.write() = fail;
    }

    /// Fail the next `count` state queries with a transient error
    pub fn fail_state_queries(&self, count: usize) {
        self.state_query_faults.store(count, Ordering::SeqCst);
    }

    pub fn set_feature(&self, feature: BackendFeature, enabled: bool) {
        let mut features = self.features.write();
        if enabled {
            features.insert(feature);
        } else {
            features.remove(&feature);
        }
    }

    /// Add an existing volume, as if created outside the driver
    pub fn insert_volume(&self, mut volume: FileSystem) -> FileSystem {
        if volume.id.is_empty() {
            volume.id = create_volume_id(
                &self.subscription_id,
                &volume.resource_group,
                &volume.netapp_account,
                &volume.capacity_pool,
                &volume.name,
            );
        }
        if volume.mount_targets.is_empty() {
            volume.mount_targets = vec![self.mount_target(&volume.id)];
        }
        self.volumes.insert(
            volume.id.clone(),
            VolumeRecord {
                volume: volume.clone(),
                pending: None,
            },
        );
        volume
    }

    /// Force the provisioning state of the volume with `token`
    pub fn set_volume_state(&self, token: &str, state: ProvisioningState) {
        if let Some(mut record) = self
            .volumes
            .iter_mut()
            .find(|r| r.volume.creation_token == token)
        {
            record.volume.provisioning_state = state;
            record.pending = None;
        }
    }

    // ===== Call log =====

    /// Capacity pools create was attempted in, in order
    pub fn create_attempts(&self) -> Vec<String> {
        self.create_attempts.lock().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn modify_calls(&self) -> usize {
        self.modify_calls.load(Ordering::SeqCst)
    }

    pub fn resize_calls(&self) -> usize {
        self.resize_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_create_calls(&self) -> usize {
        self.snapshot_create_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Names of the snapshots of the volume with `token`
    pub fn snapshot_names(&self, token: &str) -> Vec<String> {
        let Some(volume_id) = self.find_id_by_token(token) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .snapshots
            .iter()
            .filter(|s| s.snapshot.volume_id == volume_id)
            .map(|s| s.snapshot.name.clone())
            .collect();
        names.sort();
        names
    }

    // ===== Internals =====

    fn mount_target(&self, volume_id: &str) -> MountTarget {
        let n = self.next_address.fetch_add(1, Ordering::SeqCst);
        MountTarget {
            mount_target_id: uuid::Uuid::new_v4().to_string(),
            file_system_id: volume_id.to_string(),
            ip_address: format!("10.0.{}.{}", n / 250, n % 250 + 4),
            server_fqdn: format!("anf-{:04x}.anf.internal", n),
        }
    }

    fn find_id_by_token(&self, token: &str) -> Option<String> {
        self.volumes
            .iter()
            .find(|r| r.volume.creation_token == token)
            .map(|r| r.key().clone())
    }

    fn resolve_id(&self, volume: &FileSystem) -> Result<String> {
        if !volume.id.is_empty() && self.volumes.contains_key(&volume.id) {
            return Ok(volume.id.clone());
        }
        self.find_id_by_token(&volume.creation_token)
            .ok_or_else(|| Error::not_found("volume", &volume.creation_token))
    }

    fn inject_state_fault(&self, operation: &str) -> Result<()> {
        let remaining = self.state_query_faults.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state_query_faults.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::backend(operation, "simulated transient failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl AnfClient for MemoryAnfClient {
    async fn init(&self) -> Result<()> {
        let inventory = self.inventory.read();
        info!(
            capacity_pools = inventory.capacity_pools.len(),
            subnets = inventory.subnets.len(),
            "Discovered NetApp Files resources"
        );
        Ok(())
    }

    async fn refresh_resources(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn capacity_pools(&self) -> Result<Vec<CapacityPool>> {
        Ok(self.inventory.read().capacity_pools.clone())
    }

    async fn subnets(&self) -> Result<Vec<Subnet>> {
        Ok(self.inventory.read().subnets.clone())
    }

    fn has_feature(&self, feature: BackendFeature) -> bool {
        self.features.read().contains(&feature)
    }

    async fn volumes(&self) -> Result<Vec<FileSystem>> {
        let mut volumes: Vec<FileSystem> = self.volumes.iter().map(|r| r.volume.clone()).collect();
        volumes.sort_by(|a, b| a.creation_token.cmp(&b.creation_token));
        Ok(volumes)
    }

    async fn volume(&self, config: &VolumeConfig) -> Result<FileSystem> {
        self.volume_exists(config)
            .await?
            .ok_or_else(|| Error::not_found("volume", &config.internal_name))
    }

    async fn volume_exists(&self, config: &VolumeConfig) -> Result<Option<FileSystem>> {
        if let Some(id) = config.internal_id.as_deref().filter(|id| !id.is_empty()) {
            return self.volume_exists_by_id(id).await;
        }
        Ok(self
            .volumes
            .iter()
            .find(|r| r.volume.creation_token == config.internal_name)
            .map(|r| r.volume.clone()))
    }

    async fn volume_exists_by_id(&self, id: &str) -> Result<Option<FileSystem>> {
        Ok(self.volumes.get(id).map(|r| r.volume.clone()))
    }

    async fn volume_by_creation_token(&self, token: &str) -> Result<FileSystem> {
        self.volumes
            .iter()
            .find(|r| r.volume.creation_token == token)
            .map(|r| r.volume.clone())
            .ok_or_else(|| Error::not_found("volume", token))
    }

    async fn volume_state(&self, volume: &FileSystem) -> Result<ProvisioningState> {
        self.inject_state_fault("GetVolume")?;
        let id = self.resolve_id(volume)?;

        let state = {
            let mut record = self
                .volumes
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("volume", &volume.creation_token))?;
            record.advance();
            record.volume.provisioning_state
        };

        if state == ProvisioningState::Deleted {
            self.volumes.remove(&id);
            self.snapshots.retain(|_, s| s.snapshot.volume_id != id);
        }
        Ok(state)
    }

    async fn create_volume(&self, request: &FilesystemCreateRequest) -> Result<FileSystem> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let full_name = format!(
            "{}/{}/{}",
            request.resource_group, request.netapp_account, request.capacity_pool
        );
        self.create_attempts.lock().push(full_name.clone());

        if let Some(reason) = self.pool_faults.get(&full_name) {
            return Err(Error::backend("CreateVolume", reason.value()));
        }

        let cpool = self
            .inventory
            .read()
            .capacity_pools
            .iter()
            .find(|c| c.full_name() == full_name)
            .cloned()
            .ok_or_else(|| {
                Error::backend("CreateVolume", format!("capacity pool {} not found", full_name))
            })?;

        if self.find_id_by_token(&request.creation_token).is_some() {
            return Err(Error::backend(
                "CreateVolume",
                format!("creation token {} is already in use", request.creation_token),
            ));
        }

        if let Some(snapshot_id) = &request.snapshot_id {
            if !self.snapshots.iter().any(|s| s.snapshot.snapshot_id == *snapshot_id) {
                return Err(Error::backend(
                    "CreateVolume",
                    format!("snapshot {} not found", snapshot_id),
                ));
            }
        }

        let id = create_volume_id(
            &self.subscription_id,
            &request.resource_group,
            &request.netapp_account,
            &request.capacity_pool,
            &request.name,
        );

        let volume = FileSystem {
            id: id.clone(),
            resource_group: request.resource_group.clone(),
            netapp_account: request.netapp_account.clone(),
            capacity_pool: request.capacity_pool.clone(),
            name: request.name.clone(),
            location: cpool.location.clone(),
            provisioning_state: ProvisioningState::Creating,
            creation_token: request.creation_token.clone(),
            service_level: cpool.service_level.clone(),
            protocol_types: request.protocol_types.clone(),
            quota_in_bytes: request.quota_in_bytes,
            unix_permissions: request.unix_permissions.clone().unwrap_or_default(),
            snapshot_directory: request.snapshot_directory,
            export_policy: request.export_policy.clone().unwrap_or_default(),
            mount_targets: vec![self.mount_target(&id)],
            subnet_id: request.subnet_id.clone(),
            network_features: request.network_features.clone(),
            kerberos_enabled: request.kerberos_enabled,
            labels: request.labels.clone(),
        };

        let behavior = self
            .behaviors
            .get(&request.creation_token)
            .map(|b| *b)
            .unwrap_or_default();
        let pending = match behavior {
            CreateBehavior::Immediate => Some((ProvisioningState::Available, 0)),
            CreateBehavior::Settle { polls } => Some((ProvisioningState::Available, polls)),
            CreateBehavior::Fail => Some((ProvisioningState::Error, 0)),
            CreateBehavior::Stuck => None,
        };

        debug!(
            volume = %request.creation_token,
            capacity_pool = %full_name,
            "Simulated volume create"
        );
        self.volumes.insert(
            id,
            VolumeRecord {
                volume: volume.clone(),
                pending,
            },
        );
        Ok(volume)
    }

    async fn modify_volume(
        &self,
        volume: &FileSystem,
        labels: BTreeMap<String, String>,
        unix_permissions: Option<&str>,
        snapshot_directory: Option<bool>,
        export_rule: Option<&ExportRule>,
    ) -> Result<()> {
        self.modify_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.resolve_id(volume)?;
        let mut record = self
            .volumes
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("volume", &volume.creation_token))?;

        let target = &mut record.volume;
        target.labels = labels;
        if let Some(perms) = unix_permissions {
            target.unix_permissions = perms.to_string();
        }
        if let Some(dir) = snapshot_directory {
            target.snapshot_directory = dir;
        }
        if let Some(rule) = export_rule {
            let mut merged = target.export_policy.rules.first().cloned().unwrap_or_default();
            merged.nfsv3 = rule.nfsv3;
            merged.nfsv41 = rule.nfsv41;
            merged.kerberos5_read_write = rule.kerberos5_read_write;
            merged.kerberos5i_read_write = rule.kerberos5i_read_write;
            merged.kerberos5p_read_write = rule.kerberos5p_read_write;
            if rule.has_kerberos() {
                merged.unix_read_write = false;
                merged.unix_read_only = false;
            }
            if !rule.allowed_clients.is_empty() {
                merged.allowed_clients = rule.allowed_clients.clone();
            }
            target.export_policy = ExportPolicy {
                rules: vec![merged],
            };
        }
        Ok(())
    }

    async fn resize_volume(&self, volume: &FileSystem, new_size_bytes: u64) -> Result<()> {
        self.resize_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.resolve_id(volume)?;
        if let Some(mut record) = self.volumes.get_mut(&id) {
            record.volume.quota_in_bytes = new_size_bytes;
        }
        Ok(())
    }

    async fn delete_volume(&self, volume: &FileSystem) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_deletes.read() {
            return Err(Error::backend("DeleteVolume", "simulated delete failure"));
        }
        let id = self.resolve_id(volume)?;
        if let Some(mut record) = self.volumes.get_mut(&id) {
            record.volume.provisioning_state = ProvisioningState::Deleting;
            record.pending = Some((ProvisioningState::Deleted, 0));
        }
        Ok(())
    }

    async fn snapshots_for_volume(&self, volume: &FileSystem) -> Result<Vec<BackendSnapshot>> {
        let id = self.resolve_id(volume)?;
        let mut snapshots: Vec<BackendSnapshot> = self
            .snapshots
            .iter()
            .filter(|s| s.snapshot.volume_id == id)
            .map(|s| s.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| a.created.cmp(&b.created).then(a.name.cmp(&b.name)));
        Ok(snapshots)
    }

    async fn snapshot_for_volume(&self, volume: &FileSystem, name: &str) -> Result<BackendSnapshot> {
        let id = self.resolve_id(volume)?;
        self.snapshots
            .iter()
            .find(|s| s.snapshot.volume_id == id && s.snapshot.name == name)
            .map(|s| s.snapshot.clone())
            .ok_or_else(|| Error::not_found("snapshot", name))
    }

    async fn snapshot_state(
        &self,
        _volume: &FileSystem,
        snapshot: &BackendSnapshot,
    ) -> Result<ProvisioningState> {
        self.inject_state_fault("GetSnapshot")?;
        let state = {
            let mut record = self
                .snapshots
                .get_mut(&snapshot.id)
                .ok_or_else(|| Error::not_found("snapshot", &snapshot.name))?;
            if let Some(next) = record.pending.take() {
                record.snapshot.provisioning_state = next;
            }
            record.snapshot.provisioning_state
        };
        if state == ProvisioningState::Deleted {
            self.snapshots.remove(&snapshot.id);
        }
        Ok(state)
    }

    async fn create_snapshot(&self, volume: &FileSystem, name: &str) -> Result<BackendSnapshot> {
        self.snapshot_create_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.resolve_id(volume)?;
        if self
            .snapshots
            .iter()
            .any(|s| s.snapshot.volume_id == id && s.snapshot.name == name)
        {
            return Err(Error::backend(
                "CreateSnapshot",
                format!("snapshot {} already exists", name),
            ));
        }

        let snapshot = BackendSnapshot {
            id: format!("{}/snapshots/{}", id, name),
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            volume_id: id,
            location: volume.location.clone(),
            created: Utc::now(),
            provisioning_state: ProvisioningState::Creating,
        };
        self.snapshots.insert(
            snapshot.id.clone(),
            SnapshotRecord {
                snapshot: snapshot.clone(),
                pending: Some(ProvisioningState::Available),
            },
        );
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, _volume: &FileSystem, snapshot: &BackendSnapshot) -> Result<()> {
        let mut record = self
            .snapshots
            .get_mut(&snapshot.id)
            .ok_or_else(|| Error::not_found("snapshot", &snapshot.name))?;
        record.snapshot.provisioning_state = ProvisioningState::Deleting;
        record.pending = Some(ProvisioningState::Deleted);
        Ok(())
    }

    async fn restore_snapshot(&self, volume: &FileSystem, snapshot: &BackendSnapshot) -> Result<()> {
        if !self.snapshots.contains_key(&snapshot.id) {
            return Err(Error::not_found("snapshot", &snapshot.name));
        }
        let id = self.resolve_id(volume)?;
        if let Some(mut record) = self.volumes.get_mut(&id) {
            record.volume.provisioning_state = ProvisioningState::Reverting;
            record.pending = Some((ProvisioningState::Available, 0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(pool: &str, token: &str) -> FilesystemCreateRequest {
        FilesystemCreateRequest {
            resource_group: "rg1".into(),
            netapp_account: "acct1".into(),
            capacity_pool: pool.into(),
            name: token.into(),
            creation_token: token.into(),
            quota_in_bytes: 100 << 30,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_volume_settles_after_polls() {
        let client = MemoryAnfClient::with_default_inventory();
        client.set_create_behavior("vol", CreateBehavior::Settle { polls: 1 });
        let volume = client.create_volume(&request("pool1", "vol")).await.unwrap();
        assert_eq!(volume.provisioning_state, ProvisioningState::Creating);
        assert_eq!(volume.location, "eastus");
        assert_eq!(volume.mount_targets.len(), 1);

        assert_eq!(client.volume_state(&volume).await.unwrap(), ProvisioningState::Creating);
        assert_eq!(client.volume_state(&volume).await.unwrap(), ProvisioningState::Available);
    }

    #[tokio::test]
    async fn test_pool_faults_and_attempt_log() {
        let client = MemoryAnfClient::with_default_inventory();
        client.fail_capacity_pool("rg1/acct1/pool1", "quota exceeded");

        let err = client.create_volume(&request("pool1", "vol")).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(client.create_volume(&request("pool2", "vol")).await.is_ok());
        assert_matches!(
            client.create_volume(&request("missing", "vol2")).await,
            Err(Error::Backend { .. })
        );

        assert_eq!(
            client.create_attempts(),
            vec!["rg1/acct1/pool1", "rg1/acct1/pool2", "rg1/acct1/missing"]
        );
    }

    #[tokio::test]
    async fn test_delete_removes_after_poll() {
        let client = MemoryAnfClient::with_default_inventory();
        let volume = client.create_volume(&request("pool1", "vol")).await.unwrap();
        client.delete_volume(&volume).await.unwrap();

        assert_eq!(client.volume_state(&volume).await.unwrap(), ProvisioningState::Deleted);
        assert!(client.volume_state(&volume).await.unwrap_err().is_not_found());
        assert!(client.volume_by_creation_token("vol").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let client = MemoryAnfClient::with_default_inventory();
        let volume = client.create_volume(&request("pool1", "vol")).await.unwrap();
        let snapshot = client.create_snapshot(&volume, "snap-1").await.unwrap();
        assert_eq!(snapshot.provisioning_state, ProvisioningState::Creating);

        assert_eq!(
            client.snapshot_state(&volume, &snapshot).await.unwrap(),
            ProvisioningState::Available
        );
        assert_eq!(client.snapshot_names("vol"), vec!["snap-1"]);

        client.delete_snapshot(&volume, &snapshot).await.unwrap();
        assert_eq!(
            client.snapshot_state(&volume, &snapshot).await.unwrap(),
            ProvisioningState::Deleted
        );
        assert!(client.snapshot_names("vol").is_empty());
    }

    #[test]
    fn test_inventory_from_config() {
        let config = DriverConfig {
            subscription_id: "sub".into(),
            location: "westus2".into(),
            service_level: "ultra".into(),
            resource_groups: vec!["rg9".into()],
            capacity_pools: vec!["pool-a".into(), "rgx/acctx/pool-b".into()],
            virtual_network: "rgn/vnet9".into(),
            ..Default::default()
        };
        let inventory = MemoryInventory::from_config(&config);

        let names: Vec<String> = inventory.capacity_pools.iter().map(|c| c.full_name()).collect();
        assert_eq!(names, vec!["rg9/anf-account/pool-a", "rgx/acctx/pool-b"]);
        assert!(inventory.capacity_pools.iter().all(|c| c.service_level == "Ultra"));
        assert_eq!(inventory.subnets[0].full_name(), "rgn/vnet9/anf-subnet");
        assert_eq!(inventory.subnets[0].location, "westus2");
    }
}
