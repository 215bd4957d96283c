//! Attribute precedence resolution
//!
//! Effective volume attributes come from the first layer that sets them:
//! the volume itself, then its pool, then the backend config, then the
//! built-in defaults. Each attribute is resolved independently.

use crate::catalog::StoragePool;
use crate::config::{
    DriverConfig, DEFAULT_EXPORT_RULE, DEFAULT_NFS_MOUNT_OPTIONS, DEFAULT_SNAPSHOT_DIR,
    DEFAULT_VOLUME_SIZE, OPEN_UNIX_PERMISSIONS,
};
use crate::domain::volume::VolumeConfig;
use serde::Serialize;
use std::fmt;

/// Volume attributes subject to defaulting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Attribute {
    Size,
    ServiceLevel,
    SnapshotDir,
    UnixPermissions,
    ExportRule,
    MountOptions,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attribute::Size => "size",
            Attribute::ServiceLevel => "serviceLevel",
            Attribute::SnapshotDir => "snapshotDir",
            Attribute::UnixPermissions => "unixPermissions",
            Attribute::ExportRule => "exportRule",
            Attribute::MountOptions => "mountOptions",
        };
        f.write_str(name)
    }
}

/// Which layer supplied a resolved value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Volume,
    Pool,
    Backend,
    Default,
}

/// One layer of attribute values. Layers are shared with async driver
/// workflows, so they must be `Sync`.
pub trait AttributeSource: Sync {
    fn source(&self) -> Source;

    /// The layer's value, or `None` if it leaves the attribute unset
    fn attribute(&self, attribute: Attribute) -> Option<&str>;
}

fn non_blank(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

impl AttributeSource for VolumeConfig {
    fn source(&self) -> Source {
        Source::Volume
    }

    fn attribute(&self, attribute: Attribute) -> Option<&str> {
        let value = match attribute {
            Attribute::Size => Some(self.size.as_str()),
            Attribute::ServiceLevel => self.service_level.as_deref(),
            Attribute::SnapshotDir => self.snapshot_dir.as_deref(),
            Attribute::UnixPermissions => self.unix_permissions.as_deref(),
            Attribute::ExportRule => self.export_rule.as_deref(),
            Attribute::MountOptions => self.mount_options.as_deref(),
        };
        value.and_then(non_blank)
    }
}

impl AttributeSource for StoragePool {
    fn source(&self) -> Source {
        Source::Pool
    }

    fn attribute(&self, attribute: Attribute) -> Option<&str> {
        let attrs = &self.attributes;
        match attribute {
            Attribute::Size => non_blank(&attrs.size),
            Attribute::ServiceLevel => non_blank(&attrs.service_level),
            Attribute::SnapshotDir => non_blank(&attrs.snapshot_dir),
            Attribute::UnixPermissions => non_blank(&attrs.unix_permissions),
            Attribute::ExportRule => non_blank(&attrs.export_rule),
            Attribute::MountOptions => None,
        }
    }
}

impl AttributeSource for DriverConfig {
    fn source(&self) -> Source {
        Source::Backend
    }

    fn attribute(&self, attribute: Attribute) -> Option<&str> {
        match attribute {
            Attribute::Size => non_blank(&self.size),
            Attribute::ServiceLevel => non_blank(&self.service_level),
            Attribute::SnapshotDir => non_blank(&self.snapshot_dir),
            Attribute::UnixPermissions => non_blank(&self.unix_permissions),
            Attribute::ExportRule => non_blank(&self.export_rule),
            Attribute::MountOptions => non_blank(&self.nfs_mount_options),
        }
    }
}

/// Built-in defaults, the last layer
#[derive(Debug, Clone, Copy, Default)]
pub struct Defaults {
    /// Fall back to open permissions; only when the service accepts them
    pub open_unix_permissions: bool,
}

impl Defaults {
    pub fn with_open_unix_permissions(open_unix_permissions: bool) -> Self {
        Self {
            open_unix_permissions,
        }
    }
}

impl AttributeSource for Defaults {
    fn source(&self) -> Source {
        Source::Default
    }

    fn attribute(&self, attribute: Attribute) -> Option<&str> {
        match attribute {
            Attribute::Size => Some(DEFAULT_VOLUME_SIZE),
            Attribute::ServiceLevel => None,
            Attribute::SnapshotDir => Some(DEFAULT_SNAPSHOT_DIR),
            Attribute::UnixPermissions => {
                self.open_unix_permissions.then_some(OPEN_UNIX_PERMISSIONS)
            }
            Attribute::ExportRule => Some(DEFAULT_EXPORT_RULE),
            Attribute::MountOptions => Some(DEFAULT_NFS_MOUNT_OPTIONS),
        }
    }
}

/// A value together with the layer it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub source: Source,
}

/// Resolves attributes across an ordered stack of layers, highest
/// precedence first
pub struct AttributeResolver<'a> {
    layers: Vec<&'a dyn AttributeSource>,
}

impl<'a> AttributeResolver<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn layer(mut self, source: &'a dyn AttributeSource) -> Self {
        self.layers.push(source);
        self
    }

    /// The standard stack for a volume placed in `pool`
    pub fn for_volume(
        volume: &'a VolumeConfig,
        pool: &'a StoragePool,
        config: &'a DriverConfig,
        defaults: &'a Defaults,
    ) -> Self {
        Self::new().layer(volume).layer(pool).layer(config).layer(defaults)
    }

    pub fn resolve(&self, attribute: Attribute) -> Option<Resolved> {
        self.layers.iter().find_map(|layer| {
            layer.attribute(attribute).map(|value| Resolved {
                value: value.to_string(),
                source: layer.source(),
            })
        })
    }

    /// Resolved value, blank when no layer sets it
    pub fn value(&self, attribute: Attribute) -> String {
        self.resolve(attribute).map(|r| r.value).unwrap_or_default()
    }
}

impl Default for AttributeResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}
