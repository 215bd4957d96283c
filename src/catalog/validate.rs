//! Syntactic and semantic validation of names, sizes and pool attributes

use crate::catalog::{StoragePool, MAX_LABEL_LENGTH, PROVISIONING_LABEL_TAG};
use crate::domain::export::KerberosMode;
use crate::error::{Error, Result};
use ipnetwork::IpNetwork;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

static STORAGE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^$|^[a-zA-Z][a-zA-Z-]*$").expect("valid regex"));
static VOLUME_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z\d\-_]{0,63}$").expect("valid regex"));
static CREATION_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z\d-]{0,79}$").expect("valid regex"));
static CSI_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^pvc-[\da-fA-F]{8}-[\da-fA-F]{4}-[\da-fA-F]{4}-[\da-fA-F]{4}-[\da-fA-F]{12}$",
    )
    .expect("valid regex")
});
static OCTAL_PERMISSIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-7]{4}$").expect("valid regex"));

/// Service levels a capacity pool may offer
pub const SERVICE_LEVEL_STANDARD: &str = "Standard";
pub const SERVICE_LEVEL_PREMIUM: &str = "Premium";
pub const SERVICE_LEVEL_ULTRA: &str = "Ultra";

pub const NETWORK_FEATURES_BASIC: &str = "Basic";
pub const NETWORK_FEATURES_STANDARD: &str = "Standard";

pub const NFS_VERSION_3: &str = "3";
pub const NFS_VERSION_4: &str = "4";
pub const NFS_VERSION_41: &str = "4.1";
pub const SUPPORTED_NFS_VERSIONS: &[&str] = &[NFS_VERSION_3, NFS_VERSION_4, NFS_VERSION_41];

// =============================================================================
// Names
// =============================================================================

pub fn validate_volume_name(name: &str) -> Result<()> {
    if !VOLUME_NAME_RE.is_match(name) {
        return Err(Error::Validation(format!(
            "volume name '{}' is not allowed; it must be 1-64 characters long, begin with a \
             letter, and contain only letters, digits, hyphens, and underscores",
            name
        )));
    }
    Ok(())
}

pub fn validate_creation_token(token: &str) -> Result<()> {
    if !CREATION_TOKEN_RE.is_match(token) {
        return Err(Error::Validation(format!(
            "volume internal name '{}' is not allowed; it must be 1-80 characters long, begin \
             with a letter, and contain only letters, digits, and hyphens",
            token
        )));
    }
    Ok(())
}

pub fn validate_storage_prefix(prefix: &str) -> Result<()> {
    if !STORAGE_PREFIX_RE.is_match(prefix) {
        return Err(Error::Validation(
            "storage prefix may only contain letters and hyphens and must begin with a letter"
                .into(),
        ));
    }
    Ok(())
}

/// Names handed out by a CSI provisioner (`pvc-<uuid>`)
pub fn is_csi_name(name: &str) -> bool {
    CSI_NAME_RE.is_match(name)
}

// =============================================================================
// Sizes
// =============================================================================

/// Convert a size such as `100Gi`, `50GiB`, `1T` or `1073741824` to bytes.
///
/// Suffixes with an `i` are binary, the rest decimal. A blank size is zero.
pub fn convert_size_to_bytes(size: &str) -> Result<u64> {
    let s = size.trim();
    if s.is_empty() {
        return Ok(0);
    }

    // Find where the number ends and unit begins
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let multiplier: u64 = match unit_str {
        "" | "B" => 1,
        "k" | "K" | "KB" => 1000,
        "M" | "MB" => 1000u64.pow(2),
        "G" | "GB" => 1000u64.pow(3),
        "T" | "TB" => 1000u64.pow(4),
        "P" | "PB" => 1000u64.pow(5),
        "E" | "EB" => 1000u64.pow(6),
        "Ki" | "KiB" => 1 << 10,
        "Mi" | "MiB" => 1 << 20,
        "Gi" | "GiB" => 1 << 30,
        "Ti" | "TiB" => 1 << 40,
        "Pi" | "PiB" => 1 << 50,
        "Ei" | "EiB" => 1 << 60,
        other => {
            return Err(Error::Validation(format!(
                "invalid size '{}': unknown unit {}",
                size, other
            )))
        }
    };

    if let Ok(whole) = num_str.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(|| {
            Error::Validation(format!("invalid size '{}': value out of range", size))
        });
    }

    let fractional: f64 = num_str
        .parse()
        .map_err(|_| Error::Validation(format!("invalid size '{}': not a number", size)))?;
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(Error::Validation(format!("invalid size '{}': value out of range", size)));
    }
    Ok(bytes as u64)
}

// =============================================================================
// Attribute Values
// =============================================================================

/// Parse a boolean the way the host writes them (`true`, `False`, `1`, `t`, ...)
pub fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(Error::Validation(format!("invalid boolean value '{}'", other))),
    }
}

/// Unix permissions must be exactly four octal digits, e.g. `0755`
pub fn validate_octal_unix_permissions(perms: &str) -> Result<()> {
    if !OCTAL_PERMISSIONS_RE.is_match(perms) {
        return Err(Error::Validation(format!(
            "permissions '{}' must be a 4-digit octal value",
            perms
        )));
    }
    Ok(())
}

/// A comma-separated list of IP addresses and CIDR blocks
pub fn validate_export_rule(rule: &str) -> Result<()> {
    for entry in rule.split(',') {
        let entry = entry.trim();
        if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNetwork>().is_err() {
            return Err(Error::Validation(format!("invalid address/CIDR '{}'", entry)));
        }
    }
    Ok(())
}

/// Normalize a service level to the service's casing (`premium` -> `Premium`)
pub fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Extract the NFS version from mount options such as `nfsvers=4.1,hard`.
///
/// Returns `default` when no version is given.
pub fn nfs_version_from_mount_options(
    mount_options: &str,
    default: &str,
    supported: &[&str],
) -> Result<String> {
    let mut found: Option<&str> = None;

    for option in mount_options
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|o| !o.is_empty())
    {
        let version = option
            .strip_prefix("nfsvers=")
            .or_else(|| option.strip_prefix("vers="));
        if let Some(version) = version {
            if found.is_some() {
                return Err(Error::Validation(format!(
                    "multiple NFS versions found in mount options '{}'",
                    mount_options
                )));
            }
            found = Some(version);
        }
    }

    let version = found.unwrap_or(default);
    if !supported.contains(&version) {
        return Err(Error::Validation(format!(
            "unsupported NFS version: {}",
            version
        )));
    }
    Ok(version.to_string())
}

// =============================================================================
// Pool Validation
// =============================================================================

/// Check every internal attribute of a pool. Kerberos entitlement is checked
/// separately since it only warns.
pub fn validate_pool(pool: &StoragePool) -> Result<()> {
    let name = &pool.name;
    let attrs = &pool.attributes;

    match attrs.service_level.as_str() {
        SERVICE_LEVEL_STANDARD | SERVICE_LEVEL_PREMIUM | SERVICE_LEVEL_ULTRA | "" => {}
        other => {
            return Err(Error::Configuration(format!(
                "invalid service level in pool {}: {}",
                name, other
            )))
        }
    }

    validate_export_rule(&attrs.export_rule).map_err(|e| {
        Error::Configuration(format!("invalid exportRule in pool {}: {}", name, e))
    })?;

    if !attrs.snapshot_dir.is_empty() {
        parse_bool(&attrs.snapshot_dir).map_err(|e| {
            Error::Configuration(format!("invalid value for snapshotDir in pool {}; {}", name, e))
        })?;
    }

    if !attrs.unix_permissions.is_empty() {
        validate_octal_unix_permissions(&attrs.unix_permissions).map_err(|e| {
            Error::Configuration(format!(
                "invalid value for unixPermissions in pool {}; {}",
                name, e
            ))
        })?;
    }

    convert_size_to_bytes(&attrs.size).map_err(|e| {
        Error::Configuration(format!(
            "invalid value for default volume size in pool {}; {}",
            name, e
        ))
    })?;

    pool.labels_json(PROVISIONING_LABEL_TAG, MAX_LABEL_LENGTH).map_err(|e| {
        Error::Configuration(format!("invalid value for label in pool {}; {}", name, e))
    })?;

    match attrs.network_features.as_str() {
        "" | NETWORK_FEATURES_BASIC | NETWORK_FEATURES_STANDARD => {}
        _ => {
            return Err(Error::Configuration(format!(
                "invalid value for networkFeatures in pool {}",
                name
            )))
        }
    }

    KerberosMode::parse_optional(&attrs.kerberos).map_err(|e| {
        Error::Configuration(format!("invalid value for kerberos in pool {}; {}", name, e))
    })?;

    Ok(())
}
