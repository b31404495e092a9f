//! Change records and the engine's change-code vocabulary.

use serde::{Deserialize, Serialize};

/// Kind of difference between a layer and its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
}

impl ChangeKind {
    /// Code used by the layer-store plugin protocol.
    #[cfg(test)]
    fn wire_code(self) -> u8 {
        match self {
            ChangeKind::Modified => 0,
            ChangeKind::Added => 1,
            ChangeKind::Deleted => 2,
        }
    }
}

/// One path-level difference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self { path: path.into(), kind }
    }
}

/// Classification of a raw engine change code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineChange {
    Change(ChangeKind),
    /// Consumed but never reported.
    Ignore,
    /// Not part of the engine vocabulary.
    Unknown(u8),
}

pub const CODE_MODIFIED: u8 = 0;
pub const CODE_ADDED: u8 = 1;
pub const CODE_DELETED: u8 = 2;
pub const CODE_IGNORE: u8 = 3;

/// Map an engine change code onto the external vocabulary.
pub fn classify(code: u8) -> EngineChange {
    match code {
        CODE_MODIFIED => EngineChange::Change(ChangeKind::Modified),
        CODE_ADDED => EngineChange::Change(ChangeKind::Added),
        CODE_DELETED => EngineChange::Change(ChangeKind::Deleted),
        CODE_IGNORE => EngineChange::Ignore,
        other => EngineChange::Unknown(other),
    }
}
