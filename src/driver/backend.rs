// Driver backed by the snapshot engine
//
// Combines the lifecycle manager and the diff orchestrator behind the
// LayerDriver surface.

use std::collections::HashMap;
use std::fs::DirBuilder;
use std::io::Read;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::interface::{DriverError, DriverResult, LayerDriver};
use crate::config::Config;
use crate::diff::{ChangeRecord, DiffOrchestrator, DiffStream, NaiveDiff};
use crate::engine::{
    CONTROL_PROTOCOL_VERSION, CommandTable, ControlChannel, ControlOp, IoctlChannel, LayerMetadata,
    ROOT_ATTRIBUTE, XattrMetadata, read_u64,
};
use crate::layer::LayerManager;

/// Permissions of a freshly created layer root.
const ROOT_MODE: u32 = 0o700;

pub struct Driver {
    name: String,
    command_table: CommandTable,
    layers: LayerManager,
    diffs: DiffOrchestrator,
}

impl Driver {
    /// Initialise a driver on the configured root.
    ///
    /// Creates the root if needed, checks that the engine is serving it and
    /// reads the swap-mode flag, which stays fixed for the driver's lifetime.
    pub fn init(
        config: &Config,
        channel: Arc<dyn ControlChannel>,
        metadata: Arc<dyn LayerMetadata>,
        naive: Arc<dyn NaiveDiff>,
    ) -> DriverResult<Self> {
        config.validate().map_err(|e| DriverError::Config(e.to_string()))?;

        let root = config.driver.root.clone();
        DirBuilder::new()
            .recursive(true)
            .mode(ROOT_MODE)
            .create(&root)
            .map_err(|source| DriverError::Root { path: root.clone(), source })?;

        channel
            .send(ControlOp::Stat, "", ROOT_ATTRIBUTE)
            .map_err(|source| DriverError::EngineUnavailable { path: root.clone(), source })?;

        let swap_layers = match read_u64(metadata.as_ref(), ROOT_ATTRIBUTE) {
            Ok(flag) => flag != 0,
            Err(errno) => {
                debug!(error = %errno, "Swap mode flag unavailable, assuming off");
                false
            }
        };

        info!(
            root = %root.display(),
            command_table = config.driver.command_table.name(),
            swap_layers,
            "Driver initialised"
        );

        Ok(Self {
            name: config.driver.name.clone(),
            command_table: config.driver.command_table,
            layers: LayerManager::new(&root, channel, config.driver.bookkeeping_suffix.clone()),
            diffs: DiffOrchestrator::new(root, metadata, naive, config.diff.clone(), swap_layers),
        })
    }

    /// Initialise against the kernel engine mounted at the configured root.
    pub fn with_engine(config: &Config, naive: Arc<dyn NaiveDiff>) -> DriverResult<Self> {
        let root = &config.driver.root;
        let channel = Arc::new(IoctlChannel::new(root, config.driver.command_table));
        let metadata = Arc::new(XattrMetadata::new(root));
        Self::init(config, channel, metadata, naive)
    }

    pub fn root(&self) -> &Path {
        self.layers.root()
    }

    pub fn swap_layers(&self) -> bool {
        self.diffs.swap_layers()
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn diffs(&self) -> &DiffOrchestrator {
        &self.diffs
    }
}

impl LayerDriver for Driver {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> Vec<(String, String)> {
        vec![
            ("Build Version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ("Library Version".to_string(), CONTROL_PROTOCOL_VERSION.to_string()),
            ("Command Table".to_string(), self.command_table.name().to_string()),
            ("Swap Layers".to_string(), self.swap_layers().to_string()),
        ]
    }

    fn get_metadata(&self, _id: &str) -> DriverResult<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    fn create(&self, id: &str, parent: &str) -> DriverResult<()> {
        Ok(self.layers.create(id, parent)?)
    }

    fn create_read_write(&self, id: &str, parent: &str) -> DriverResult<()> {
        Ok(self.layers.create_read_write(id, parent)?)
    }

    fn remove(&self, id: &str) -> DriverResult<()> {
        Ok(self.layers.remove(id)?)
    }

    fn get(&self, id: &str, mount_label: &str) -> DriverResult<PathBuf> {
        if !mount_label.is_empty() {
            debug!(layer_id = %id, mount_label = %mount_label, "Ignoring mount label");
        }
        Ok(self.layers.mount(id)?)
    }

    fn put(&self, id: &str) -> DriverResult<()> {
        Ok(self.layers.unmount(id)?)
    }

    fn exists(&self, id: &str) -> bool {
        self.layers.exists(id)
    }

    fn cleanup(&self) -> DriverResult<()> {
        Ok(self.layers.cleanup()?)
    }

    fn diff(&self, id: &str, parent: &str) -> DriverResult<DiffStream> {
        Ok(self.diffs.diff(id, parent)?)
    }

    fn changes(&self, id: &str, parent: &str) -> DriverResult<Vec<ChangeRecord>> {
        Ok(self.diffs.changes(id, parent)?)
    }

    fn diff_size(&self, id: &str, parent: &str) -> DriverResult<u64> {
        Ok(self.diffs.diff_size(id, parent)?)
    }

    fn apply_diff(
        &self,
        id: &str,
        parent: &str,
        archive: Box<dyn Read + Send>,
    ) -> DriverResult<u64> {
        Ok(self.diffs.apply_diff(id, parent, archive)?)
    }
}
