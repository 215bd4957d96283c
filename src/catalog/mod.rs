//! Pool Catalog
//!
//! Storage pools advertised to the host, each with its capability offers and
//! the internal attributes used as per-pool defaults. Built once when the
//! driver initializes and read-only afterwards.

pub mod resolve;
pub mod validate;

pub use resolve::*;
pub use validate::*;

use crate::config::{DriverConfig, VirtualPoolConfig};
use crate::domain::export::{KerberosMode, NasType};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Label key wrapping a pool's labels on every volume it provisions
pub const PROVISIONING_LABEL_TAG: &str = "provisioning";

/// Longest label value the service accepts
pub const MAX_LABEL_LENGTH: usize = 255;

// =============================================================================
// Pool Types
// =============================================================================

/// Capabilities a pool advertises to the host scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOffers {
    pub backend_type: String,
    pub snapshots: bool,
    pub clones: bool,
    pub encryption: bool,
    pub replication: bool,
    pub labels: BTreeMap<String, String>,
    pub nas_type: NasType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// Per-pool defaults and placement inputs, already merged with the backend
/// config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAttributes {
    pub size: String,
    pub unix_permissions: String,
    /// Title-cased, or blank for any service level
    pub service_level: String,
    pub snapshot_dir: String,
    pub export_rule: String,
    pub virtual_network: String,
    pub network_features: String,
    pub subnet: String,
    pub resource_groups: Vec<String>,
    pub netapp_accounts: Vec<String>,
    pub capacity_pools: Vec<String>,
    pub kerberos: String,
}

/// A pool registered with the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePool {
    pub name: String,
    pub offers: PoolOffers,
    pub attributes: PoolAttributes,
    pub supported_topologies: Vec<BTreeMap<String, String>>,
}

impl StoragePool {
    /// Pool labels as compact JSON under `tag`, or blank if there are none
    pub fn labels_json(&self, tag: &str, max_length: usize) -> Result<String> {
        labels_json(&self.offers.labels, tag, max_length)
    }

    pub fn kerberos(&self) -> Result<Option<KerberosMode>> {
        KerberosMode::parse_optional(&self.attributes.kerberos)
    }
}

/// Serialize `labels` as `{"<tag>":{...}}`, rejecting results over `max_length`
pub fn labels_json(
    labels: &BTreeMap<String, String>,
    tag: &str,
    max_length: usize,
) -> Result<String> {
    if labels.is_empty() {
        return Ok(String::new());
    }

    let mut wrapped = BTreeMap::new();
    wrapped.insert(tag, labels);
    let json = serde_json::to_string(&wrapped)?;

    if max_length != 0 && json.len() > max_length {
        return Err(Error::Validation(format!(
            "label length {} exceeds the character limit of {} characters",
            json.len(),
            max_length
        )));
    }
    Ok(json)
}

// =============================================================================
// Catalog
// =============================================================================

/// All pools of one backend, keyed by pool name
#[derive(Debug, Clone, Default)]
pub struct PoolCatalog {
    pools: BTreeMap<String, StoragePool>,
}

impl PoolCatalog {
    /// Build the catalog from a config whose defaults are already populated.
    ///
    /// Without virtual pools the whole backend is reported as a single pool.
    pub fn build(config: &DriverConfig, driver_name: &str, backend_name: &str) -> Self {
        let mut pools = BTreeMap::new();

        if config.storage.is_empty() {
            debug!("No virtual pools defined, reporting single pool");
            let pool = Self::pool_from(
                config,
                &VirtualPoolConfig::default(),
                driver_name,
                pool_name(backend_name, "pool"),
            );
            pools.insert(pool.name.clone(), pool);
        } else {
            debug!("{} virtual pools defined", config.storage.len());
            for (index, vpool) in config.storage.iter().enumerate() {
                let name = pool_name(backend_name, &format!("pool_{}", index));
                let pool = Self::pool_from(config, vpool, driver_name, name);
                pools.insert(pool.name.clone(), pool);
            }
        }

        Self { pools }
    }

    fn pool_from(
        config: &DriverConfig,
        vpool: &VirtualPoolConfig,
        driver_name: &str,
        name: String,
    ) -> StoragePool {
        fn pick(pool: &str, backend: &str) -> String {
            let value = if pool.is_empty() { backend } else { pool };
            value.to_string()
        }
        fn pick_list(pool: &Option<Vec<String>>, backend: &[String]) -> Vec<String> {
            pool.clone().unwrap_or_else(|| backend.to_vec())
        }

        let mut labels = config.labels.clone();
        labels.extend(vpool.labels.clone());

        let region = pick(&vpool.region, &config.region);
        let zone = pick(&vpool.zone, &config.zone);

        let offers = PoolOffers {
            backend_type: driver_name.to_string(),
            snapshots: true,
            clones: true,
            encryption: false,
            replication: false,
            labels,
            nas_type: vpool.nas_type.unwrap_or(config.nas_type),
            region: (!region.is_empty()).then_some(region),
            zone: (!zone.is_empty()).then_some(zone),
        };

        let attributes = PoolAttributes {
            size: pick(&vpool.size, &config.size),
            unix_permissions: pick(&vpool.unix_permissions, &config.unix_permissions),
            service_level: title_case(&pick(&vpool.service_level, &config.service_level)),
            snapshot_dir: pick(&vpool.snapshot_dir, &config.snapshot_dir),
            export_rule: pick(&vpool.export_rule, &config.export_rule),
            virtual_network: pick(&vpool.virtual_network, &config.virtual_network),
            network_features: pick(&vpool.network_features, &config.network_features),
            subnet: pick(&vpool.subnet, &config.subnet),
            resource_groups: pick_list(&vpool.resource_groups, &config.resource_groups),
            netapp_accounts: pick_list(&vpool.netapp_accounts, &config.netapp_accounts),
            capacity_pools: pick_list(&vpool.capacity_pools, &config.capacity_pools),
            kerberos: pick(&vpool.kerberos, &config.kerberos),
        };

        StoragePool {
            name,
            offers,
            attributes,
            supported_topologies: vpool
                .supported_topologies
                .clone()
                .unwrap_or_else(|| config.supported_topologies.clone()),
        }
    }

    pub fn get(&self, name: &str) -> Result<&StoragePool> {
        self.pools
            .get(name)
            .ok_or_else(|| Error::Validation(format!("pool {} does not exist", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoragePool> {
        self.pools.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// `<backend>_<name>` with hyphens removed from `name`
pub fn pool_name(backend_name: &str, name: &str) -> String {
    format!("{}_{}", backend_name, name.replace('-', ""))
}
