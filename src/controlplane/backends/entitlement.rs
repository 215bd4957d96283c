//! Static entitlement checker
//!
//! Grants a fixed set of features, configured at startup.

use crate::domain::ports::{EntitledFeature, EntitlementChecker};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Entitlements decided up front rather than by a licensing service
#[derive(Debug, Default)]
pub struct StaticEntitlements {
    granted: RwLock<HashSet<EntitledFeature>>,
}

impl StaticEntitlements {
    pub fn allow_all() -> Self {
        Self {
            granted: RwLock::new(HashSet::from([EntitledFeature::InflightEncryption])),
        }
    }

    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn set(&self, feature: EntitledFeature, granted: bool) {
        let mut features = self.granted.write();
        if granted {
            features.insert(feature);
        } else {
            features.remove(&feature);
        }
    }
}

#[async_trait]
impl EntitlementChecker for StaticEntitlements {
    async fn is_feature_enabled(&self, feature: EntitledFeature) -> Result<()> {
        if self.granted.read().contains(&feature) {
            Ok(())
        } else {
            Err(Error::Entitlement {
                feature: feature.to_string(),
                reason: "not granted for this deployment".to_string(),
            })
        }
    }
}
