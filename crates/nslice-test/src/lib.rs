//! Integration test infrastructure for the network slice reconciler
//!
//! Provides:
//! - Service spec fixtures for VPLS, VPRN and ePipe
//! - A simulated router fabric wired to a running `SliceMgr`
//! - Device and status verification helpers

pub mod fabric;
pub mod fixtures;
mod verification;

pub use fabric::{TestFabric, ROUTERS};
pub use fixtures::*;
pub use verification::*;
