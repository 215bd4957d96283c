//! Control Plane Module
//!
//! The NAS storage driver and everything it coordinates: capacity pool
//! placement, provisioning workflows, state polling, the service client
//! adapters and the REST API in front of it.

pub mod api;
pub mod backends;
pub mod capacity;
pub mod driver;
pub mod metrics;
pub mod waiter;
pub mod workflow;

pub use api::*;
pub use backends::*;
pub use capacity::{BackendPool, CapacitySelector};
pub use driver::{DriverOptions, NasStorageDriver, Telemetry};
pub use metrics::DriverMetrics;
pub use waiter::StateWaiter;
pub use workflow::{Phase, Workflow};
