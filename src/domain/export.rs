//! Export rules, protocol types and Kerberos security flavors

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol type strings understood by the service
pub const PROTOCOL_NFSV3: &str = "NFSv3";
pub const PROTOCOL_NFSV41: &str = "NFSv4.1";
pub const PROTOCOL_CIFS: &str = "CIFS";

// =============================================================================
// NAS Type
// =============================================================================

/// File-sharing protocol family a backend serves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NasType {
    #[default]
    Nfs,
    Smb,
}

impl fmt::Display for NasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NasType::Nfs => write!(f, "nfs"),
            NasType::Smb => write!(f, "smb"),
        }
    }
}

// =============================================================================
// Kerberos
// =============================================================================

/// Kerberos security flavor configured on a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KerberosMode {
    #[serde(rename = "sec=krb5")]
    Krb5,
    #[serde(rename = "sec=krb5i")]
    Krb5i,
    #[serde(rename = "sec=krb5p")]
    Krb5p,
}

impl KerberosMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            KerberosMode::Krb5 => "sec=krb5",
            KerberosMode::Krb5i => "sec=krb5i",
            KerberosMode::Krb5p => "sec=krb5p",
        }
    }

    /// Parse an optional pool attribute; blank means Kerberos is off
    pub fn parse_optional(value: &str) -> Result<Option<Self>> {
        if value.is_empty() {
            Ok(None)
        } else {
            value.parse().map(Some)
        }
    }
}

impl fmt::Display for KerberosMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KerberosMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sec=krb5" => Ok(KerberosMode::Krb5),
            "sec=krb5i" => Ok(KerberosMode::Krb5i),
            "sec=krb5p" => Ok(KerberosMode::Krb5p),
            other => Err(Error::Validation(format!("unsupported kerberos type: {}", other))),
        }
    }
}

// =============================================================================
// Export Rules
// =============================================================================

/// A single client-access rule on an NFS volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRule {
    pub allowed_clients: String,
    pub cifs: bool,
    pub nfsv3: bool,
    pub nfsv41: bool,
    pub rule_index: u32,
    pub unix_read_only: bool,
    pub unix_read_write: bool,
    pub kerberos5_read_only: bool,
    pub kerberos5_read_write: bool,
    pub kerberos5i_read_only: bool,
    pub kerberos5i_read_write: bool,
    pub kerberos5p_read_only: bool,
    pub kerberos5p_read_write: bool,
}

impl ExportRule {
    /// Rule for a freshly created volume speaking `protocol`
    pub fn for_protocol(allowed_clients: &str, protocol: NfsProtocol) -> Self {
        Self {
            allowed_clients: allowed_clients.to_string(),
            nfsv3: protocol == NfsProtocol::V3,
            nfsv41: protocol == NfsProtocol::V41,
            rule_index: 1,
            unix_read_write: true,
            ..Default::default()
        }
    }

    /// Switch the rule to Kerberos: NFSv4.1 only, generic unix access off, and
    /// exactly the read-write flag of `mode` set.
    pub fn apply_kerberos(&mut self, mode: KerberosMode) {
        self.nfsv3 = false;
        self.nfsv41 = true;
        self.unix_read_only = false;
        self.unix_read_write = false;
        self.kerberos5_read_write = mode == KerberosMode::Krb5;
        self.kerberos5i_read_write = mode == KerberosMode::Krb5i;
        self.kerberos5p_read_write = mode == KerberosMode::Krb5p;
    }

    /// Partial rule sent when bringing an imported volume under management
    pub fn kerberos_only(mode: KerberosMode) -> Self {
        let mut rule = Self {
            nfsv41: true,
            ..Default::default()
        };
        match mode {
            KerberosMode::Krb5 => rule.kerberos5_read_write = true,
            KerberosMode::Krb5i => rule.kerberos5i_read_write = true,
            KerberosMode::Krb5p => rule.kerberos5p_read_write = true,
        }
        rule
    }

    pub fn has_kerberos(&self) -> bool {
        self.kerberos5_read_write
            || self.kerberos5i_read_write
            || self.kerberos5p_read_write
            || self.kerberos5_read_only
            || self.kerberos5i_read_only
            || self.kerberos5p_read_only
    }
}

/// Export policy of an NFS volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPolicy {
    pub rules: Vec<ExportRule>,
}

// =============================================================================
// Protocols
// =============================================================================

/// NFS protocol generations a volume can be created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NfsProtocol {
    V3,
    V41,
}

impl NfsProtocol {
    pub fn protocol_type(&self) -> &'static str {
        match self {
            NfsProtocol::V3 => PROTOCOL_NFSV3,
            NfsProtocol::V41 => PROTOCOL_NFSV41,
        }
    }
}
