//! NetApp Files Provisioner
//!
//! A storage driver that provisions NFS and SMB volumes out of NetApp Files
//! capacity pools for a host container orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                Host orchestrator / REST API                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                     NasStorageDriver                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │ Pool catalog │  │  Capacity    │  │ Workflows + state │   │
//! │  │ + validation │  │  selector    │  │ waiter            │   │
//! │  └──────────────┘  └──────────────┘  └───────────────────┘   │
//! ├──────────────────────────────────────────────────────────────┤
//! │            AnfClient / EntitlementChecker ports              │
//! │  ┌──────────────────────┐  ┌─────────────────────────────┐   │
//! │  │  Memory client       │  │  Static entitlements        │   │
//! │  └──────────────────────┘  └─────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`catalog`]: Storage pool catalog, attribute resolution and validation
//! - [`config`]: Backend configuration and timeouts
//! - [`controlplane`]: The driver, its collaborators and the REST API
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod catalog;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use catalog::{PoolCatalog, StoragePool};

pub use config::{DriverConfig, DriverContext, Timeouts};

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendFactory, BackendOptions, CapacitySelector, DriverMetrics,
    DriverOptions, MemoryAnfClient, NasStorageDriver, StaticEntitlements,
};

pub use domain::ports::{
    AnfClient, AnfClientRef, EntitlementChecker, StorageDriver, StorageDriverRef,
};

pub use domain::volume::{Snapshot, SnapshotConfig, VolumeConfig, VolumePublishInfo};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
