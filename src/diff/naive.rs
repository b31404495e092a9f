//! Generic tree-comparison collaborator.
//!
//! The hosting framework supplies a recursive comparator that works on any
//! pair of mounted directories. The driver uses it for everything it cannot
//! answer from the engine directly.

use std::io::Read;

use anyhow::{Result, bail};
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use super::change::ChangeRecord;

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait NaiveDiff: Send + Sync {
    /// Archive of the differences between `id` and `parent`.
    fn diff(&self, id: &str, parent: &str) -> Result<Box<dyn Read + Send>>;

    fn changes(&self, id: &str, parent: &str) -> Result<Vec<ChangeRecord>>;

    fn diff_size(&self, id: &str, parent: &str) -> Result<u64>;

    /// Extract `archive` into `id`, returning the applied size in bytes.
    fn apply_diff(&self, id: &str, parent: &str, archive: Box<dyn Read + Send>) -> Result<u64>;
}

/// Stand-in used when no comparator has been wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredNaiveDiff;

impl NaiveDiff for UnconfiguredNaiveDiff {
    fn diff(&self, id: &str, _parent: &str) -> Result<Box<dyn Read + Send>> {
        bail!("No generic diff collaborator configured (diff of {id})")
    }

    fn changes(&self, id: &str, _parent: &str) -> Result<Vec<ChangeRecord>> {
        bail!("No generic diff collaborator configured (changes of {id})")
    }

    fn diff_size(&self, id: &str, _parent: &str) -> Result<u64> {
        bail!("No generic diff collaborator configured (diff size of {id})")
    }

    fn apply_diff(&self, id: &str, _parent: &str, _archive: Box<dyn Read + Send>) -> Result<u64> {
        bail!("No generic diff collaborator configured (apply to {id})")
    }
}
