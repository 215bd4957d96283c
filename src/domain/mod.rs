//! Domain layer - Core types and port definitions
//!
//! This module defines the descriptors exchanged with the host, the
//! service's resource model and the traits (ports) that adapters implement.

pub mod export;
pub mod ports;
pub mod state;
pub mod volume;

pub use export::*;
pub use ports::*;
pub use state::*;
pub use volume::*;
