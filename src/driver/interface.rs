// Capability surface offered to the hosting layer store

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;

use thiserror::Error;

use crate::diff::{ChangeRecord, DiffError, DiffStream};
use crate::engine::ChannelError;
use crate::layer::LayerError;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to prepare layer root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Snapshot engine is not serving {path}: {source}")]
    EngineUnavailable {
        path: PathBuf,
        #[source]
        source: ChannelError,
    },

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Diff(#[from] DiffError),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Operations a pluggable layer-store driver provides.
///
/// `parent` is empty for base layers.
pub trait LayerDriver: Send + Sync {
    /// Driver name as shown by the host.
    fn name(&self) -> &str;

    /// Ordered (label, value) pairs describing the driver.
    fn status(&self) -> Vec<(String, String)>;

    fn get_metadata(&self, id: &str) -> DriverResult<HashMap<String, String>>;

    fn create(&self, id: &str, parent: &str) -> DriverResult<()>;

    fn create_read_write(&self, id: &str, parent: &str) -> DriverResult<()>;

    fn remove(&self, id: &str) -> DriverResult<()>;

    /// Mount `id` and return the directory it is visible under.
    fn get(&self, id: &str, mount_label: &str) -> DriverResult<PathBuf>;

    /// Unmount `id`.
    fn put(&self, id: &str) -> DriverResult<()>;

    fn exists(&self, id: &str) -> bool;

    fn cleanup(&self) -> DriverResult<()>;

    fn diff(&self, id: &str, parent: &str) -> DriverResult<DiffStream>;

    fn changes(&self, id: &str, parent: &str) -> DriverResult<Vec<ChangeRecord>>;

    fn diff_size(&self, id: &str, parent: &str) -> DriverResult<u64>;

    fn apply_diff(&self, id: &str, parent: &str, archive: Box<dyn Read + Send>)
    -> DriverResult<u64>;
}
