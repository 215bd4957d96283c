//! Capacity Selector
//!
//! Maps a storage pool onto the discrete capacity pools (and subnets) of the
//! subscription that may host its volumes. A capacity pool is identified by
//! resource group, NetApp account and pool name; the selector never reports
//! the same one twice.

use crate::catalog::StoragePool;
use crate::domain::ports::{CapacityPool, FileSystem, Subnet};
use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A physical pool of this backend, as reported to the host
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPool {
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    pub resource_group: String,
    pub netapp_account: String,
    pub location: String,
    pub capacity_pool: String,
}

/// Select capacity pools and subnets for storage pools
#[derive(Debug, Clone, Default)]
pub struct CapacitySelector {
    subscription_id: String,
    /// Region every candidate must be in; blank allows any
    location: String,
}

impl CapacitySelector {
    pub fn new(subscription_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            location: location.into(),
        }
    }

    /// Capacity pools that may host volumes of `pool` at `service_level`.
    ///
    /// When the pool lists capacity pools explicitly, candidates come back in
    /// that order; otherwise in inventory order.
    pub fn candidates(
        &self,
        pool: &StoragePool,
        service_level: &str,
        inventory: &[CapacityPool],
    ) -> Vec<CapacityPool> {
        let attrs = &pool.attributes;

        let mut matches: Vec<(usize, &CapacityPool)> = inventory
            .iter()
            .filter(|cpool| self.location.is_empty() || cpool.location == self.location)
            .filter(|cpool| {
                attrs.resource_groups.is_empty()
                    || attrs.resource_groups.iter().any(|rg| *rg == cpool.resource_group)
            })
            .filter(|cpool| {
                attrs.netapp_accounts.is_empty()
                    || attrs.netapp_accounts.iter().any(|account| {
                        *account == cpool.netapp_account || *account == cpool.account_full_name()
                    })
            })
            .filter(|cpool| {
                service_level.is_empty() || cpool.service_level.eq_ignore_ascii_case(service_level)
            })
            .filter_map(|cpool| {
                if attrs.capacity_pools.is_empty() {
                    return Some((0, cpool));
                }
                attrs
                    .capacity_pools
                    .iter()
                    .position(|name| *name == cpool.name || *name == cpool.full_name())
                    .map(|rank| (rank, cpool))
            })
            .collect();

        // Stable, so ties keep inventory order
        matches.sort_by_key(|(rank, _)| *rank);

        let candidates: Vec<CapacityPool> =
            matches.into_iter().map(|(_, cpool)| cpool.clone()).collect();

        debug!(
            storage_pool = %pool.name,
            service_level = %service_level,
            count = candidates.len(),
            "Resolved capacity pool candidates"
        );
        candidates
    }

    /// Every capacity pool any storage pool could use, each listed once
    pub fn backend_pools<'a>(
        &self,
        pools: impl IntoIterator<Item = &'a StoragePool>,
        inventory: &[CapacityPool],
    ) -> Vec<CapacityPool> {
        let mut union = BTreeMap::new();
        for pool in pools {
            for cpool in self.candidates(pool, &pool.attributes.service_level, inventory) {
                union.entry(cpool.full_name()).or_insert(cpool);
            }
        }
        union.into_values().collect()
    }

    /// Backend pool descriptors for the host, one per discrete capacity pool
    pub fn describe_backend_pools(&self, cpools: &[CapacityPool]) -> Vec<BackendPool> {
        cpools
            .iter()
            .map(|cpool| BackendPool {
                subscription_id: self.subscription_id.clone(),
                resource_group: cpool.resource_group.clone(),
                netapp_account: cpool.netapp_account.clone(),
                location: cpool.location.clone(),
                capacity_pool: cpool.name.clone(),
            })
            .collect()
    }

    /// Serialize backend pools the way the host stores them
    pub fn encode_backend_pools(&self, pools: &[BackendPool]) -> Result<Vec<String>> {
        pools
            .iter()
            .map(|pool| serde_json::to_string(pool).map_err(Error::from))
            .collect()
    }

    /// Subnets a volume of `pool` may be attached to
    pub fn subnets_for_pool<'a>(&self, pool: &StoragePool, subnets: &'a [Subnet]) -> Vec<&'a Subnet> {
        let attrs = &pool.attributes;
        subnets
            .iter()
            .filter(|subnet| self.location.is_empty() || subnet.location == self.location)
            .filter(|subnet| {
                attrs.virtual_network.is_empty()
                    || attrs.virtual_network == subnet.virtual_network
                    || attrs.virtual_network
                        == format!("{}/{}", subnet.resource_group, subnet.virtual_network)
            })
            .filter(|subnet| {
                attrs.subnet.is_empty()
                    || attrs.subnet == subnet.name
                    || attrs.subnet == subnet.full_name()
            })
            .collect()
    }

    /// One matching subnet, chosen at random to spread volumes
    pub fn random_subnet_for_pool(&self, pool: &StoragePool, subnets: &[Subnet]) -> Option<Subnet> {
        self.subnets_for_pool(pool, subnets)
            .choose(&mut rand::thread_rng())
            .map(|subnet| (*subnet).clone())
    }

    /// Fail unless `volume` lives in a capacity pool this backend manages
    pub fn ensure_volume_in_valid_capacity_pool<'a>(
        &self,
        pools: impl IntoIterator<Item = &'a StoragePool>,
        inventory: &[CapacityPool],
        volume: &FileSystem,
    ) -> Result<()> {
        let volume_pool = format!(
            "{}/{}/{}",
            volume.resource_group, volume.netapp_account, volume.capacity_pool
        );
        if self
            .backend_pools(pools, inventory)
            .iter()
            .any(|cpool| cpool.full_name() == volume_pool)
        {
            return Ok(());
        }
        Err(Error::ImportRejected {
            name: volume.creation_token.clone(),
            reason: format!(
                "volume is in capacity pool {}, which is not referenced by this backend",
                volume_pool
            ),
        })
    }
}
