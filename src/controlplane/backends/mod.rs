//! Service Backend Adapters
//!
//! Provides adapters for the ports the driver depends on:
//! - Memory: NetApp Files simulated in process
//! - Entitlement: statically granted features

pub mod entitlement;
pub mod memory;

pub use entitlement::*;
pub use memory::*;

use crate::config::DriverConfig;
use crate::domain::ports::AnfClientRef;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Factory for creating NetApp Files clients
pub struct BackendFactory;

impl BackendFactory {
    /// Create a client by name
    pub fn create(name: &str, config: &DriverConfig, options: BackendOptions) -> Result<AnfClientRef> {
        match name.to_lowercase().as_str() {
            "memory" | "simulated" => {
                let inventory = match &options.inventory {
                    Some(path) => MemoryInventory::from_file(path)?,
                    None => MemoryInventory::from_config(config),
                };
                let subscription = if config.subscription_id.is_empty() {
                    DEFAULT_SUBSCRIPTION_ID
                } else {
                    &config.subscription_id
                };
                Ok(Arc::new(MemoryAnfClient::new(subscription, inventory)))
            }
            _ => Err(Error::Configuration(format!("unknown backend client {}", name))),
        }
    }
}

/// Options for backend client construction
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Inventory file for the memory client; derived from the config if unset
    pub inventory: Option<PathBuf>,
}
