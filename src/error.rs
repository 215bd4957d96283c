//! Error types for the NetApp Files provisioner
//!
//! Provides structured error types for validation, the provisioning
//! workflows, the backend client and the host-facing API.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("{0}")]
    Validation(String),

    #[error("requested size {requested} bytes exceeds the size limit of {limit} bytes")]
    SizeLimit { requested: u64, limit: u64 },

    // =========================================================================
    // Volume Lifecycle Errors
    // =========================================================================
    #[error("volume {name} already exists")]
    VolumeExists { name: String },

    /// The volume exists but is still being provisioned. Callers retry the
    /// whole operation later rather than provisioning again.
    #[error("volume {name} is still creating: {message}")]
    VolumeCreating { name: String, message: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} state is {state}, not {expected}")]
    InvalidState {
        kind: String,
        name: String,
        state: String,
        expected: String,
    },

    #[error("timed out after {waited:?} waiting for {kind} {name} to reach {desired}; last state was {observed}")]
    StateTimeout {
        kind: String,
        name: String,
        desired: String,
        observed: String,
        waited: Duration,
    },

    #[error("{kind} {name} reached state {state} while waiting for {desired}")]
    AbortState {
        kind: String,
        name: String,
        state: String,
        desired: String,
    },

    #[error("could not import volume {name}: {reason}")]
    ImportRejected { name: String, reason: String },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("no subnets found for storage pool {pool}")]
    NoSubnet { pool: String },

    #[error("no capacity pools found for storage pool {pool}")]
    NoCapacityPools { pool: String },

    #[error("could not create volume {volume} in any capacity pool: {failures}")]
    PlacementExhausted {
        volume: String,
        failures: CandidateFailures,
    },

    // =========================================================================
    // Entitlement Errors
    // =========================================================================
    #[error("feature {feature} is not entitled: {reason}")]
    Entitlement { feature: String, reason: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("backend operation {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single capacity pool's rejection of a create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Capacity pool full name (resource group/account/pool)
    pub capacity_pool: String,
    /// Reason reported by the backend
    pub reason: String,
}

/// Every capacity pool failure collected during placement, in attempt order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFailures(pub Vec<CandidateFailure>);

impl CandidateFailures {
    pub fn push(&mut self, capacity_pool: impl Into<String>, reason: impl Into<String>) {
        self.0.push(CandidateFailure {
            capacity_pool: capacity_pool.into(),
            reason: reason.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateFailure> {
        self.0.iter()
    }
}

impl fmt::Display for CandidateFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "capacity pool {}: {}", failure.capacity_pool, failure.reason)?;
        }
        Ok(())
    }
}

/// Action to take on error when the host retries an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RequeueWithBackoff,
    /// Retry after specific duration
    RequeueAfter(Duration),
    /// Don't retry, wait for changes
    NoRequeue,
}

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn backend(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Backend hiccups - retry with backoff
            Error::Backend { .. } | Error::StateTimeout { .. } => ErrorAction::RequeueWithBackoff,

            // Provisioning still in flight - check back shortly
            Error::VolumeCreating { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Capacity may free up
            Error::PlacementExhausted { .. }
            | Error::NoCapacityPools { .. }
            | Error::NoSubnet { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Caller or operator has to change something first
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::SizeLimit { .. }
            | Error::VolumeExists { .. }
            | Error::ImportRejected { .. }
            | Error::Entitlement { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorAction::NoRequeue,

            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::VolumeCreating { .. } | Error::StateTimeout { .. } | Error::Backend { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_volume_creating(&self) -> bool {
        matches!(self, Error::VolumeCreating { .. })
    }
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;
