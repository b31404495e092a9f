//! Layer lifecycle management.
//!
//! This module provides:
//! - Layer records and their lifecycle states
//! - Per-layer advisory locks around transitions
//! - The lifecycle manager (create, clone, mount, unmount, remove, stat, cleanup)

mod locks;
mod manager;
mod record;

pub use locks::LayerLocks;
pub use manager::{LayerError, LayerManager, LayerResult};
pub use record::{LayerRecord, LayerState, is_bookkeeping};
