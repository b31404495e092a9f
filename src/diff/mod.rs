//! Layer diffs.
//!
//! This module provides:
//! - Change records and the mapping from engine change codes
//! - The paged change-list decoder
//! - Tar export of a change set
//! - Diff streams with one-second timestamp alignment
//! - The orchestrator choosing between the direct and generic paths,
//!   including swap-mode size reconciliation on apply

mod change;
mod decoder;
mod export;
mod naive;
mod orchestrator;
mod stream;

pub use change::{
    CODE_ADDED, CODE_DELETED, CODE_IGNORE, CODE_MODIFIED, ChangeKind, ChangeRecord, EngineChange,
    classify,
};
pub use decoder::{
    ChangeListDecoder, DEFAULT_PAGE_SIZE, DecodeError, DecodeResult, DecodedPage,
    RECORD_HEADER_LEN, decode_page, encode_records,
};
pub use export::{WHITEOUT_PREFIX, export_changes, whiteout_name};
#[cfg(any(test, feature = "mockall"))]
pub use naive::MockNaiveDiff;
pub use naive::{NaiveDiff, UnconfiguredNaiveDiff};
pub use orchestrator::{DiffError, DiffOrchestrator, DiffResult, DiffStrategy};
pub use stream::{DiffStream, second_boundary_after, wait_until};
