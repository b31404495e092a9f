//! Layer manager module.
//!
//! Sequences layer lifecycle operations through the control channel and keeps
//! the local view of each layer's state. The engine stays authoritative: a
//! layer this instance has never seen may still be mounted or removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::locks::LayerLocks;
use super::record::{LayerRecord, LayerState, is_bookkeeping};
use crate::engine::{ChannelError, ControlChannel, ControlOp};

/// Errors that can occur during layer lifecycle operations.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Layer already exists: {0}")]
    AlreadyExists(String),

    #[error("Layer has been removed: {0}")]
    Removed(String),

    #[error("Layer is still mounted: {0}")]
    StillMounted(String),

    #[error("Failed to release engine resources: {0}")]
    Release(#[source] ChannelError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Result type for layer lifecycle operations.
pub type LayerResult<T> = Result<T, LayerError>;

/// Lifecycle manager for layers under a single root.
pub struct LayerManager {
    root: PathBuf,
    channel: Arc<dyn ControlChannel>,
    bookkeeping_suffix: String,
    records: Mutex<HashMap<String, LayerRecord>>,
    locks: LayerLocks,
    closed: AtomicBool,
}

impl LayerManager {
    pub fn new(
        root: impl Into<PathBuf>,
        channel: Arc<dyn ControlChannel>,
        bookkeeping_suffix: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            channel,
            bookkeeping_suffix: bookkeeping_suffix.into(),
            records: Mutex::new(HashMap::new()),
            locks: LayerLocks::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory where the layer is visible once mounted.
    pub fn layer_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, LayerRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the local record for `id`.
    pub fn record(&self, id: &str) -> Option<LayerRecord> {
        self.records().get(id).cloned()
    }

    pub fn state(&self, id: &str) -> LayerState {
        self.records().get(id).map_or(LayerState::Unknown, |r| r.state)
    }

    fn set_state(&self, id: &str, state: LayerState) {
        self.records()
            .entry(id.to_string())
            .or_insert_with(|| LayerRecord::untracked(id))
            .state = state;
    }

    /// Create a read-only layer.
    pub fn create(&self, id: &str, parent: &str) -> LayerResult<()> {
        self.create_layer(id, parent, false)
    }

    /// Create a writable layer for use as a container filesystem.
    pub fn create_read_write(&self, id: &str, parent: &str) -> LayerResult<()> {
        self.create_layer(id, parent, true)
    }

    fn create_layer(&self, id: &str, parent: &str, writable: bool) -> LayerResult<()> {
        self.locks.with_lock(id, || {
            if !self.state(id).can_create() {
                return Err(LayerError::AlreadyExists(id.to_string()));
            }

            let op = if writable { ControlOp::CloneCreate } else { ControlOp::Create };
            debug!(layer_id = %id, parent = %parent, writable, "Creating layer");
            self.channel.send(op, parent, id)?;

            self.records().insert(id.to_string(), LayerRecord::new(id, parent, writable));
            info!(layer_id = %id, parent = %parent, writable, "Layer created");
            Ok(())
        })
    }

    /// Mount a layer and return the directory it is visible under.
    ///
    /// Mounting an already-mounted layer succeeds; the engine reference-counts
    /// mounts, so the request is forwarded again.
    pub fn mount(&self, id: &str) -> LayerResult<PathBuf> {
        self.locks.with_lock(id, || {
            if !self.state(id).can_mount() {
                return Err(LayerError::Removed(id.to_string()));
            }

            self.channel.send(ControlOp::Mount, "", id)?;
            self.set_state(id, LayerState::Mounted);

            let dir = self.layer_path(id);
            debug!(layer_id = %id, dir = %dir.display(), "Layer mounted");
            Ok(dir)
        })
    }

    /// Unmount a layer. Unmounting an unmounted layer is left to the engine.
    pub fn unmount(&self, id: &str) -> LayerResult<()> {
        self.locks.with_lock(id, || {
            if !self.state(id).can_unmount() {
                return Err(LayerError::Removed(id.to_string()));
            }

            self.channel.send(ControlOp::Unmount, "", id)?;
            self.set_state(id, LayerState::Created);
            debug!(layer_id = %id, "Layer unmounted");
            Ok(())
        })
    }

    /// Remove a layer.
    ///
    /// Bookkeeping layers are never removed from the engine; the call only
    /// updates local state.
    pub fn remove(&self, id: &str) -> LayerResult<()> {
        self.locks.with_lock(id, || {
            let state = self.state(id);

            if is_bookkeeping(id, &self.bookkeeping_suffix) {
                if state == LayerState::Mounted {
                    debug!(layer_id = %id, "Bookkeeping layer still mounted, leaving state");
                } else {
                    self.set_state(id, LayerState::Removed);
                }
                debug!(layer_id = %id, "Skipping removal of bookkeeping layer");
                return Ok(());
            }

            if !state.can_remove() {
                return Err(LayerError::StillMounted(id.to_string()));
            }

            self.channel.send(ControlOp::Remove, "", id)?;
            self.set_state(id, LayerState::Removed);
            info!(layer_id = %id, "Layer removed");
            Ok(())
        })
    }

    /// Ask the engine whether the layer exists.
    ///
    /// Any failure reads as absent; only failures other than a missing layer
    /// are worth a warning.
    pub fn exists(&self, id: &str) -> bool {
        match self.channel.send(ControlOp::Stat, "", id) {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                debug!(layer_id = %id, "Layer not known to the engine");
                false
            }
            Err(e) => {
                warn!(layer_id = %id, error = %e, "Layer stat failed");
                false
            }
        }
    }

    /// Release every engine-side mount. Only the first call reaches the
    /// engine; the manager counts as closed even if that call fails.
    pub fn cleanup(&self) -> LayerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Layer manager already closed");
            return Ok(());
        }

        if let Err(e) = self.channel.send(ControlOp::UnmountAll, "", "") {
            warn!(error = %e, "Failed to unmount all layers");
            return Err(LayerError::Release(e));
        }

        for record in self.records().values_mut() {
            if record.state == LayerState::Mounted {
                record.state = LayerState::Created;
            }
        }

        info!(root = %self.root.display(), "All layers unmounted");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
