//! Copy-on-write container layer driver for a kernel snapshot engine.

pub mod config;
pub mod diff;
pub mod driver;
pub mod engine;
pub mod layer;

pub use config::Config;
pub use driver::{Driver, DriverError, DriverResult, LayerDriver};
