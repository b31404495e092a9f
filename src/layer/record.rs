//! Per-layer lifecycle state.

use serde::Serialize;

/// Lifecycle state of a layer as seen by this driver instance.
///
/// ```text
/// Unknown ──create──▶ Created ◀──unmount── Mounted
///                        │  ──mount──▶        │
///                        └──remove──▶ Removed ◀┘ (not while mounted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerState {
    /// Not seen by this instance. The engine may still hold the layer from an
    /// earlier run.
    Unknown,
    Created,
    Mounted,
    Removed,
}

impl LayerState {
    pub fn can_create(self) -> bool {
        matches!(self, LayerState::Unknown | LayerState::Removed)
    }

    pub fn can_mount(self) -> bool {
        !matches!(self, LayerState::Removed)
    }

    pub fn can_unmount(self) -> bool {
        !matches!(self, LayerState::Removed)
    }

    pub fn can_remove(self) -> bool {
        !matches!(self, LayerState::Mounted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerRecord {
    pub id: String,
    /// Parent snapshot, `None` for base layers and for layers first seen
    /// through mount/unmount.
    pub parent: Option<String>,
    /// Set for layers created through clone-create.
    pub writable: bool,
    pub state: LayerState,
}

impl LayerRecord {
    pub fn new(id: &str, parent: &str, writable: bool) -> Self {
        Self {
            id: id.to_string(),
            parent: (!parent.is_empty()).then(|| parent.to_string()),
            writable,
            state: LayerState::Created,
        }
    }

    /// Placeholder for an id this instance has not created itself.
    pub fn untracked(id: &str) -> Self {
        Self { id: id.to_string(), parent: None, writable: false, state: LayerState::Unknown }
    }
}

/// Whether `id` names a transient bookkeeping layer.
pub fn is_bookkeeping(id: &str, suffix: &str) -> bool {
    !suffix.is_empty() && id.ends_with(suffix)
}
