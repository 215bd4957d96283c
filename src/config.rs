//! Driver configuration
//!
//! The backend config is parsed once (JSON or YAML), has secrets injected
//! and defaults filled in, and is then passed explicitly to everything that
//! needs it.

use crate::catalog::convert_size_to_bytes;
use crate::domain::export::NasType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Name this driver registers under
pub const DRIVER_NAME: &str = "azure-netapp-files";

pub const DEFAULT_VOLUME_SIZE: &str = "107374182400";
pub const DEFAULT_UNIX_PERMISSIONS: &str = "";
/// Used when the service supports setting permissions and nothing else is set
pub const OPEN_UNIX_PERMISSIONS: &str = "0777";
pub const DEFAULT_NFS_MOUNT_OPTIONS: &str = "nfsvers=3";
pub const DEFAULT_KERBEROS_NFS_MOUNT_OPTIONS: &str = "nfsvers=4.1";
pub const DEFAULT_SNAPSHOT_DIR: &str = "false";
pub const DEFAULT_EXPORT_RULE: &str = "0.0.0.0/0";
pub const DEFAULT_NETWORK_FEATURES: &str = "";

/// Smallest volume the driver will request, in bytes
pub const MINIMUM_VOLUME_SIZE_BYTES: u64 = 1_000_000_000;
/// Smallest volume the service will create; smaller requests are raised
pub const MINIMUM_ANF_VOLUME_SIZE_BYTES: u64 = 107_374_182_400;

pub const REDACTED: &str = "<REDACTED>";

// =============================================================================
// Driver Context
// =============================================================================

/// Who drives the storage driver. Docker cannot retry, so it gets longer
/// timeouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverContext {
    #[default]
    Csi,
    Docker,
}

impl DriverContext {
    /// Storage prefix used when the config sets none
    pub fn default_storage_prefix(&self) -> &'static str {
        match self {
            DriverContext::Csi => "",
            DriverContext::Docker => "netappdvp-",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Overrides for one virtual pool. Blank strings and missing lists inherit
/// from the backend config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualPoolConfig {
    pub labels: BTreeMap<String, String>,
    pub region: String,
    pub zone: String,
    pub supported_topologies: Option<Vec<BTreeMap<String, String>>>,
    pub size: String,
    pub unix_permissions: String,
    pub service_level: String,
    pub snapshot_dir: String,
    pub export_rule: String,
    pub virtual_network: String,
    pub subnet: String,
    pub network_features: String,
    pub resource_groups: Option<Vec<String>>,
    pub netapp_accounts: Option<Vec<String>>,
    pub capacity_pools: Option<Vec<String>>,
    pub kerberos: String,
    pub nas_type: Option<NasType>,
}

/// Backend configuration for the NetApp Files driver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    // ===== Common =====
    pub version: u32,
    pub storage_driver_name: String,
    pub backend_name: String,
    /// `None` until defaults are populated
    pub storage_prefix: Option<String>,
    pub limit_volume_size: String,
    pub labels: BTreeMap<String, String>,
    pub credentials: BTreeMap<String, String>,
    pub debug_trace_flags: BTreeMap<String, bool>,

    // ===== Service =====
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    pub location: String,
    pub nas_type: NasType,
    pub nfs_mount_options: String,
    /// Seconds
    pub volume_create_timeout: String,
    /// Seconds
    pub sdk_timeout: String,
    /// Seconds
    pub max_cache_age: String,
    pub kerberos: String,

    // ===== Pool defaults =====
    pub region: String,
    pub zone: String,
    pub supported_topologies: Vec<BTreeMap<String, String>>,
    pub virtual_network: String,
    pub subnet: String,
    pub network_features: String,
    pub resource_groups: Vec<String>,
    pub netapp_accounts: Vec<String>,
    pub capacity_pools: Vec<String>,
    pub size: String,
    pub unix_permissions: String,
    pub service_level: String,
    pub snapshot_dir: String,
    pub export_rule: String,
    pub storage: Vec<VirtualPoolConfig>,

    /// Encoded physical pools, filled in at initialization
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backend_pools: Vec<String>,
}

impl DriverConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("could not decode JSON configuration; {}", e)))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a config file, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    /// Copy credentials out of a backend secret. Secret keys are matched
    /// case-insensitively.
    pub fn inject_secrets(&mut self, secrets: &BTreeMap<String, String>) -> Result<()> {
        let lookup = |key: &str| {
            secrets
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    Error::Configuration(format!("{} field missing from backend secrets", key))
                })
        };

        self.client_id = lookup("clientID")?;
        self.client_secret = lookup("clientSecret")?;
        Ok(())
    }

    /// Fill in every setting the config left blank
    pub fn populate_defaults(&mut self, context: DriverContext) {
        if self.storage_prefix.is_none() {
            self.storage_prefix = Some(context.default_storage_prefix().replace('_', "-"));
        }
        if self.size.is_empty() {
            self.size = DEFAULT_VOLUME_SIZE.to_string();
        }
        if self.unix_permissions.is_empty() {
            self.unix_permissions = DEFAULT_UNIX_PERMISSIONS.to_string();
        }
        if self.nfs_mount_options.is_empty() {
            self.nfs_mount_options = if self.kerberos.is_empty() {
                DEFAULT_NFS_MOUNT_OPTIONS
            } else {
                DEFAULT_KERBEROS_NFS_MOUNT_OPTIONS
            }
            .to_string();
        }
        if self.snapshot_dir.is_empty() {
            self.snapshot_dir = DEFAULT_SNAPSHOT_DIR.to_string();
        }
        if self.export_rule.is_empty() {
            self.export_rule = DEFAULT_EXPORT_RULE.to_string();
        }
        if self.network_features.is_empty() {
            self.network_features = DEFAULT_NETWORK_FEATURES.to_string();
        }

        debug!(
            storage_prefix = %self.storage_prefix(),
            size = %self.size,
            unix_permissions = %self.unix_permissions,
            service_level = %self.service_level,
            nfs_mount_options = %self.nfs_mount_options,
            snapshot_dir = %self.snapshot_dir,
            limit_volume_size = %self.limit_volume_size,
            export_rule = %self.export_rule,
            "Configuration defaults"
        );
    }

    pub fn storage_prefix(&self) -> &str {
        self.storage_prefix.as_deref().unwrap_or_default()
    }

    /// Copy safe to show outside the driver
    pub fn redacted(&self) -> Self {
        let mut clone = self.clone();
        clone.client_secret = REDACTED.to_string();
        clone.credentials = BTreeMap::from([
            ("name".to_string(), REDACTED.to_string()),
            ("type".to_string(), REDACTED.to_string()),
        ]);
        clone
    }

    /// Fail if `size_bytes` is above `limitVolumeSize`
    pub fn check_volume_size_limit(&self, size_bytes: u64) -> Result<()> {
        if self.limit_volume_size.is_empty() {
            return Ok(());
        }
        let limit = convert_size_to_bytes(&self.limit_volume_size).map_err(|e| {
            Error::Configuration(format!(
                "invalid value for limitVolumeSize '{}'; {}",
                self.limit_volume_size, e
            ))
        })?;
        if limit != 0 && size_bytes > limit {
            return Err(Error::SizeLimit {
                requested: size_bytes,
                limit,
            });
        }
        Ok(())
    }

    /// Compare against the config a running driver was built from
    pub fn update_type(&self, original: &DriverConfig) -> BTreeSet<UpdateType> {
        let mut updates = BTreeSet::new();
        if self.storage_prefix != original.storage_prefix {
            updates.insert(UpdateType::PrefixChange);
        }
        if self.credentials != original.credentials {
            updates.insert(UpdateType::CredentialsChange);
        }
        updates
    }
}

/// Kinds of backend update the host must handle specially
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpdateType {
    InvalidUpdate,
    PrefixChange,
    CredentialsChange,
}

// =============================================================================
// Timeouts
// =============================================================================

/// Upper bounds for the state waits of each workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Volume create and the Deleting retry of destroy
    pub volume_create: Duration,
    /// Most other waits
    pub default: Duration,
    pub snapshot: Duration,
    /// Single service call; also bounds the restore wait
    pub sdk: Duration,
    pub max_cache_age: Duration,
}

impl Timeouts {
    pub const VOLUME_CREATE: Duration = Duration::from_secs(10);
    pub const DOCKER_CREATE: Duration = Duration::from_secs(115);
    pub const DEFAULT: Duration = Duration::from_secs(120);
    pub const DOCKER_DEFAULT: Duration = Duration::from_secs(55);
    pub const SNAPSHOT: Duration = Duration::from_secs(240);
    pub const SDK: Duration = Duration::from_secs(30);
    pub const MAX_CACHE_AGE: Duration = Duration::from_secs(600);

    pub fn for_context(context: DriverContext) -> Self {
        let (volume_create, default) = match context {
            DriverContext::Csi => (Self::VOLUME_CREATE, Self::DEFAULT),
            DriverContext::Docker => (Self::DOCKER_CREATE, Self::DOCKER_DEFAULT),
        };
        Self {
            volume_create,
            default,
            snapshot: Self::SNAPSHOT,
            sdk: Self::SDK,
            max_cache_age: Self::MAX_CACHE_AGE,
        }
    }

    /// Context defaults with the config's overrides applied
    pub fn from_config(config: &DriverConfig, context: DriverContext) -> Result<Self> {
        let mut timeouts = Self::for_context(context);
        if let Some(secs) = parse_seconds("volumeCreateTimeout", &config.volume_create_timeout)? {
            timeouts.volume_create = secs;
        }
        if let Some(secs) = parse_seconds("sdkTimeout", &config.sdk_timeout)? {
            timeouts.sdk = secs;
        }
        if let Some(secs) = parse_seconds("maxCacheAge", &config.max_cache_age)? {
            timeouts.max_cache_age = secs;
        }
        Ok(timeouts)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::for_context(DriverContext::Csi)
    }
}

fn parse_seconds(field: &str, value: &str) -> Result<Option<Duration>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|e| Error::Configuration(format!("invalid value for {} '{}': {}", field, value, e)))
}

// =============================================================================
// Poll Policy
// =============================================================================

/// How often state waits poll the service
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl PollPolicy {
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..backoff::ExponentialBackoff::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const CONFIG_JSON: &str = r#"{
        "version": 1,
        "storageDriverName": "azure-netapp-files",
        "subscriptionID": "9f87c765-4774-fake-ae98-a721add45451",
        "tenantID": "68e4f836-edc1-fake-bff9-b2d865ee56cf",
        "clientID": "dd043f63-bf8e-fake-8076-8de91e5713aa",
        "clientSecret": "SECRET",
        "location": "eastus",
        "serviceLevel": "Premium",
        "capacityPools": ["rg1/acct1/pool1"],
        "storage": [{"serviceLevel": "Ultra", "labels": {"tier": "gold"}}]
    }"#;

    #[test]
    fn test_from_json() {
        let config = DriverConfig::from_json(CONFIG_JSON).unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.client_id, "dd043f63-bf8e-fake-8076-8de91e5713aa");
        assert_eq!(config.capacity_pools, vec!["rg1/acct1/pool1".to_string()]);
        assert_eq!(config.storage.len(), 1);
        assert_eq!(config.storage[0].service_level, "Ultra");
        assert!(config.storage[0].capacity_pools.is_none());
        assert_eq!(config.nas_type, NasType::Nfs);
    }

    #[test]
    fn test_from_json_invalid() {
        assert_matches!(DriverConfig::from_json("{"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "location: westus2\nnasType: smb\nkerberos: sec=krb5").unwrap();

        let config = DriverConfig::from_file(file.path()).unwrap();
        assert_eq!(config.location, "westus2");
        assert_eq!(config.nas_type, NasType::Smb);
        assert_eq!(config.kerberos, "sec=krb5");
    }

    #[test]
    fn test_populate_defaults() {
        let mut config = DriverConfig::default();
        config.populate_defaults(DriverContext::Csi);

        assert_eq!(config.storage_prefix(), "");
        assert_eq!(config.size, DEFAULT_VOLUME_SIZE);
        assert_eq!(config.unix_permissions, "");
        assert_eq!(config.nfs_mount_options, "nfsvers=3");
        assert_eq!(config.snapshot_dir, "false");
        assert_eq!(config.export_rule, "0.0.0.0/0");

        let mut docker = DriverConfig {
            kerberos: "sec=krb5p".into(),
            ..Default::default()
        };
        docker.populate_defaults(DriverContext::Docker);
        assert_eq!(docker.storage_prefix(), "netappdvp-");
        assert_eq!(docker.nfs_mount_options, "nfsvers=4.1");
    }

    #[test]
    fn test_populate_defaults_keeps_explicit_values() {
        let mut config = DriverConfig {
            storage_prefix: Some("".into()),
            size: "500Gi".into(),
            nfs_mount_options: "nfsvers=4.1,hard".into(),
            ..Default::default()
        };
        config.populate_defaults(DriverContext::Docker);
        assert_eq!(config.storage_prefix(), "");
        assert_eq!(config.size, "500Gi");
        assert_eq!(config.nfs_mount_options, "nfsvers=4.1,hard");
    }

    #[test]
    fn test_inject_secrets() {
        let mut config = DriverConfig::default();
        let secrets = BTreeMap::from([
            ("clientid".to_string(), "id".to_string()),
            ("clientsecret".to_string(), "secret".to_string()),
        ]);
        config.inject_secrets(&secrets).unwrap();
        assert_eq!(config.client_id, "id");
        assert_eq!(config.client_secret, "secret");

        let partial = BTreeMap::from([("clientID".to_string(), "id".to_string())]);
        assert_matches!(config.inject_secrets(&partial), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_redacted() {
        let config = DriverConfig::from_json(CONFIG_JSON).unwrap();
        let redacted = config.redacted();
        assert_eq!(redacted.client_secret, REDACTED);
        assert_eq!(redacted.credentials.get("name").map(String::as_str), Some(REDACTED));
        assert_eq!(config.client_secret, "SECRET");
    }

    #[test]
    fn test_volume_size_limit() {
        let mut config = DriverConfig::default();
        assert!(config.check_volume_size_limit(u64::MAX).is_ok());

        config.limit_volume_size = "200Gi".into();
        assert!(config.check_volume_size_limit(100 << 30).is_ok());
        assert_matches!(
            config.check_volume_size_limit(300 << 30),
            Err(Error::SizeLimit { limit, .. }) if limit == 200 << 30
        );
    }

    #[test]
    fn test_timeouts() {
        let csi = Timeouts::for_context(DriverContext::Csi);
        assert_eq!(csi.volume_create, Duration::from_secs(10));
        assert_eq!(csi.default, Duration::from_secs(120));

        let docker = Timeouts::for_context(DriverContext::Docker);
        assert_eq!(docker.volume_create, Duration::from_secs(115));
        assert_eq!(docker.default, Duration::from_secs(55));

        let config = DriverConfig {
            volume_create_timeout: "300".into(),
            ..Default::default()
        };
        let timeouts = Timeouts::from_config(&config, DriverContext::Csi).unwrap();
        assert_eq!(timeouts.volume_create, Duration::from_secs(300));
        assert_eq!(timeouts.snapshot, Duration::from_secs(240));

        let bad = DriverConfig {
            volume_create_timeout: "ten".into(),
            ..Default::default()
        };
        assert_matches!(
            Timeouts::from_config(&bad, DriverContext::Csi),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_update_type() {
        let original = DriverConfig {
            storage_prefix: Some("a-".into()),
            ..Default::default()
        };
        let mut updated = original.clone();
        assert!(updated.update_type(&original).is_empty());

        updated.storage_prefix = Some("b-".into());
        updated.credentials.insert("name".into(), "secret-2".into());
        let updates = updated.update_type(&original);
        assert!(updates.contains(&UpdateType::PrefixChange));
        assert!(updates.contains(&UpdateType::CredentialsChange));
    }
}
