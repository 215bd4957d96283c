//! Provisioning states reported by NetApp Files for volumes and snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend lifecycle status of a volume or snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    Accepted,
    Creating,
    Available,
    Error,
    Deleting,
    Deleted,
    Moving,
    Reverting,
    /// Anything the service reports that we do not know about
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::Accepted => "Accepted",
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Available => "Available",
            ProvisioningState::Error => "Error",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Deleted => "Deleted",
            ProvisioningState::Moving => "Moving",
            ProvisioningState::Reverting => "Reverting",
            ProvisioningState::Unknown => "Unknown",
        }
    }

    /// Accepted or Creating: the service is still working on it
    pub fn is_creating(&self) -> bool {
        matches!(self, ProvisioningState::Accepted | ProvisioningState::Creating)
    }

    /// Only Available objects may be published, cloned or restored from
    pub fn is_usable(&self) -> bool {
        matches!(self, ProvisioningState::Available)
    }

    /// Volumes in these states are not reported to the host
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Deleting | ProvisioningState::Deleted | ProvisioningState::Error
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "accepted" => ProvisioningState::Accepted,
            "creating" => ProvisioningState::Creating,
            "available" | "succeeded" => ProvisioningState::Available,
            "error" | "failed" => ProvisioningState::Error,
            "deleting" => ProvisioningState::Deleting,
            "deleted" => ProvisioningState::Deleted,
            "moving" => ProvisioningState::Moving,
            "reverting" => ProvisioningState::Reverting,
            _ => ProvisioningState::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(ProvisioningState::Accepted.is_creating());
        assert!(ProvisioningState::Creating.is_creating());
        assert!(!ProvisioningState::Available.is_creating());
        assert!(ProvisioningState::Available.is_usable());
        assert!(!ProvisioningState::Reverting.is_usable());
        assert!(ProvisioningState::Error.is_gone());
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("Succeeded".parse::<ProvisioningState>().unwrap(), ProvisioningState::Available);
        assert_eq!("creating".parse::<ProvisioningState>().unwrap(), ProvisioningState::Creating);
        assert_eq!("Patching".parse::<ProvisioningState>().unwrap(), ProvisioningState::Unknown);
    }

    #[test]
    fn test_unknown_state_deserializes() {
        let state: ProvisioningState = serde_json::from_str("\"Updating\"").unwrap();
        assert_eq!(state, ProvisioningState::Unknown);
    }
}
