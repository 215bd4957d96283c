//! API Module
//!
//! REST API exposing the storage driver's volume and snapshot operations.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
