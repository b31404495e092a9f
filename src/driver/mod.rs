//! Layer-store driver.
//!
//! This module provides:
//! - The `LayerDriver` capability trait expected by a hosting layer store
//! - The engine-backed `Driver` combining lifecycle and diff handling

mod backend;
mod interface;

pub use backend::Driver;
pub use interface::{DriverError, DriverResult, LayerDriver};
