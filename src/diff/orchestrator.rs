//! Diff orchestration.
//!
//! A diff is produced either directly from the engine's change list or by the
//! generic collaborator. The direct path is preferred whenever the layer has a
//! parent; any failure on it silently hands over to the collaborator.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::change::{ChangeKind, ChangeRecord};
use super::decoder::ChangeListDecoder;
use super::export::export_changes;
use super::naive::NaiveDiff;
use super::stream::DiffStream;
use crate::config::DiffConfig;
use crate::engine::{LayerMetadata, read_u64};

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Failed to export change archive: {0}")]
    Export(#[source] io::Error),

    #[error("Generic diff collaborator failed: {0}")]
    Collaborator(#[from] anyhow::Error),
}

pub type DiffResult<T> = Result<T, DiffError>;

/// How a diff will be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffStrategy {
    /// Export `changes` from `source`; `subtree` exports added directories
    /// with their content.
    Direct { source: PathBuf, changes: Vec<ChangeRecord>, subtree: bool },
    /// Hand the whole request to the generic collaborator.
    Naive,
}

pub struct DiffOrchestrator {
    root: PathBuf,
    metadata: Arc<dyn LayerMetadata>,
    naive: Arc<dyn NaiveDiff>,
    settings: DiffConfig,
    swap_layers: bool,
}

impl DiffOrchestrator {
    pub fn new(
        root: impl Into<PathBuf>,
        metadata: Arc<dyn LayerMetadata>,
        naive: Arc<dyn NaiveDiff>,
        settings: DiffConfig,
        swap_layers: bool,
    ) -> Self {
        Self { root: root.into(), metadata, naive, settings, swap_layers }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn swap_layers(&self) -> bool {
        self.swap_layers
    }

    pub fn settings(&self) -> &DiffConfig {
        &self.settings
    }

    /// Decide how the diff between `id` and `parent` is produced.
    pub fn select_strategy(&self, id: &str, parent: &str) -> DiffStrategy {
        if parent.is_empty() {
            debug!(layer_id = %id, "Base layer, using generic diff");
            return DiffStrategy::Naive;
        }

        if self.swap_layers {
            // The engine relinks the committed layer into the parent's slot,
            // so the whole staging subtree is new relative to the parent.
            let staging = self.settings.staging_path(id);
            debug!(layer_id = %id, parent = %parent, staging = %staging, "Swap mode diff");
            return DiffStrategy::Direct {
                source: self.root.join(parent),
                changes: vec![ChangeRecord::new(staging, ChangeKind::Added)],
                subtree: true,
            };
        }

        let decoder = ChangeListDecoder::new(self.metadata.as_ref(), self.settings.page_size);
        match decoder.decode(id) {
            Ok(changes) if !changes.is_empty() => {
                DiffStrategy::Direct { source: self.root.join(id), changes, subtree: false }
            }
            Ok(_) => {
                debug!(layer_id = %id, "Engine reported no changes, using generic diff");
                DiffStrategy::Naive
            }
            Err(e) => {
                warn!(layer_id = %id, error = %e, "Change list unavailable, using generic diff");
                DiffStrategy::Naive
            }
        }
    }

    fn export(&self, strategy: &DiffStrategy) -> DiffResult<Option<File>> {
        match strategy {
            DiffStrategy::Direct { source, changes, subtree } => {
                export_changes(source, changes, *subtree).map(Some).map_err(DiffError::Export)
            }
            DiffStrategy::Naive => Ok(None),
        }
    }

    /// Archive of the differences between `id` and `parent`.
    pub fn diff(&self, id: &str, parent: &str) -> DiffResult<DiffStream> {
        let started = Utc::now();
        let strategy = self.select_strategy(id, parent);

        match self.export(&strategy) {
            Ok(Some(archive)) => {
                debug!(layer_id = %id, parent = %parent, "Direct diff exported");
                return Ok(DiffStream::aligned(Box::new(archive), started));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(layer_id = %id, error = %e, "Direct diff export failed, using generic diff");
            }
        }

        let archive = self.naive.diff(id, parent)?;
        Ok(DiffStream::passthrough(archive))
    }

    pub fn changes(&self, id: &str, parent: &str) -> DiffResult<Vec<ChangeRecord>> {
        Ok(self.naive.changes(id, parent)?)
    }

    pub fn diff_size(&self, id: &str, parent: &str) -> DiffResult<u64> {
        Ok(self.naive.diff_size(id, parent)?)
    }

    /// Apply `archive` to `id` and return the applied size in bytes.
    pub fn apply_diff(
        &self,
        id: &str,
        parent: &str,
        archive: Box<dyn Read + Send>,
    ) -> DiffResult<u64> {
        let size = self.naive.apply_diff(id, parent, archive)?;
        Ok(self.reconcile_applied_size(id, parent, size))
    }

    /// Swap-mode applies only relink content, so a tiny reported size may
    /// stand for a much larger layer. The engine publishes the real size.
    pub fn reconcile_applied_size(&self, id: &str, parent: &str, size: u64) -> u64 {
        if !self.swap_layers || parent.is_empty() || size >= self.settings.metadata_only_threshold {
            return size;
        }

        match read_u64(self.metadata.as_ref(), id) {
            Ok(actual) if actual > size => {
                info!(layer_id = %id, reported = size, actual, "Using engine-reported layer size");
                actual
            }
            Ok(_) => size,
            Err(errno) => {
                debug!(layer_id = %id, error = %errno, "Layer size unavailable");
                size
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::change::{CODE_ADDED, CODE_MODIFIED};
    use crate::diff::decoder::encode_records;
    use crate::diff::naive::MockNaiveDiff;
    use crate::engine::MockLayerMetadata;
    use nix::errno::Errno;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn build(
        root: &Path,
        metadata: MockLayerMetadata,
        naive: MockNaiveDiff,
        swap_layers: bool,
    ) -> DiffOrchestrator {
        DiffOrchestrator::new(
            root,
            Arc::new(metadata),
            Arc::new(naive),
            DiffConfig::default(),
            swap_layers,
        )
    }

    fn naive_archive(bytes: &'static [u8]) -> anyhow::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
    }

    /// Metadata serving one page of records, then an empty read.
    fn one_page(page: Vec<u8>) -> MockLayerMetadata {
        let mut metadata = MockLayerMetadata::new();
        let mut served = false;
        metadata.expect_query().returning(move |_, buf| {
            if served {
                return Ok(0);
            }
            served = true;
            buf[..page.len()].copy_from_slice(&page);
            Ok(page.len())
        });
        metadata
    }

    #[test]
    fn test_base_layer_uses_naive() {
        let metadata = MockLayerMetadata::new();
        let orchestrator = build(Path::new("/r"), metadata, MockNaiveDiff::new(), false);
        assert_eq!(orchestrator.select_strategy("L1", ""), DiffStrategy::Naive);
    }

    #[test]
    fn test_swap_mode_strategy_uses_parent_directory() {
        let orchestrator =
            build(Path::new("/r"), MockLayerMetadata::new(), MockNaiveDiff::new(), true);

        assert_eq!(
            orchestrator.select_strategy("L2", "L1"),
            DiffStrategy::Direct {
                source: PathBuf::from("/r/L1"),
                changes: vec![ChangeRecord::new("/.lcfs-diff-L2", ChangeKind::Added)],
                subtree: true,
            }
        );
    }

    #[test]
    fn test_decoded_changes_use_layer_directory() {
        let page = encode_records([(CODE_MODIFIED, "/etc"), (CODE_ADDED, "hosts")]).unwrap();
        let orchestrator =
            build(Path::new("/r"), one_page(page), MockNaiveDiff::new(), false);

        let DiffStrategy::Direct { source, changes, subtree } =
            orchestrator.select_strategy("L2", "L1")
        else {
            panic!("expected direct strategy");
        };
        assert_eq!(source, PathBuf::from("/r/L2"));
        assert_eq!(changes.len(), 2);
        assert!(!subtree);
    }

    #[test]
    fn test_empty_change_list_uses_naive() {
        let mut metadata = MockLayerMetadata::new();
        metadata.expect_query().times(1).returning(|_, _| Ok(0));

        let orchestrator = build(Path::new("/r"), metadata, MockNaiveDiff::new(), false);
        assert_eq!(orchestrator.select_strategy("L2", "L1"), DiffStrategy::Naive);
    }

    #[test]
    fn test_decode_failure_falls_back_to_naive() {
        let mut metadata = MockLayerMetadata::new();
        metadata.expect_query().returning(|_, _| Err(Errno::EIO));

        let mut naive = MockNaiveDiff::new();
        naive
            .expect_diff()
            .withf(|id, parent| id == "L2" && parent == "L1")
            .times(1)
            .returning(|_, _| naive_archive(b"naive"));

        let orchestrator = build(Path::new("/r"), metadata, naive, false);
        let mut stream = orchestrator.diff("L2", "L1").unwrap();
        assert!(!stream.is_aligned());

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"naive");
    }

    #[test]
    fn test_export_failure_falls_back_to_naive() {
        let dir = TempDir::new().unwrap();
        // Layer directory is a file, so exporting any entry under it fails.
        fs::write(dir.path().join("L2"), b"not a directory").unwrap();

        let page = encode_records([(CODE_ADDED, "/x")]).unwrap();
        let mut naive = MockNaiveDiff::new();
        naive.expect_diff().times(1).returning(|_, _| naive_archive(b"fallback"));

        let orchestrator = build(dir.path(), one_page(page), naive, false);
        let mut out = Vec::new();
        orchestrator.diff("L2", "L1").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"fallback");
    }

    #[test]
    fn test_direct_diff_is_aligned() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("L2")).unwrap();
        fs::write(dir.path().join("L2/x"), b"data").unwrap();

        let page = encode_records([(CODE_ADDED, "/x")]).unwrap();
        let orchestrator = build(dir.path(), one_page(page), MockNaiveDiff::new(), false);

        let started = Utc::now();
        let stream = orchestrator.diff("L2", "L1").unwrap();
        let release_at = stream.release_at().unwrap();
        assert!(release_at > started);

        stream.close();
        assert!(Utc::now() >= release_at);
    }

    #[test]
    fn test_naive_error_surfaces() {
        let mut naive = MockNaiveDiff::new();
        naive.expect_diff().times(1).returning(|_, _| Err(anyhow::anyhow!("tree walk failed")));

        let orchestrator = build(Path::new("/r"), MockLayerMetadata::new(), naive, false);
        let err = orchestrator.diff("L1", "").unwrap_err();
        assert!(matches!(err, DiffError::Collaborator(_)));
    }

    #[test]
    fn test_changes_and_size_delegate() {
        let mut naive = MockNaiveDiff::new();
        naive
            .expect_changes()
            .times(1)
            .returning(|_, _| Ok(vec![ChangeRecord::new("/a", ChangeKind::Added)]));
        naive.expect_diff_size().times(1).returning(|_, _| Ok(42));

        let orchestrator = build(Path::new("/r"), MockLayerMetadata::new(), naive, true);
        assert_eq!(orchestrator.changes("L2", "L1").unwrap().len(), 1);
        assert_eq!(orchestrator.diff_size("L2", "L1").unwrap(), 42);
    }

    #[test]
    fn test_apply_diff_reconciles_in_swap_mode() {
        let mut metadata = MockLayerMetadata::new();
        metadata.expect_query().times(1).returning(|name, buf| {
            assert_eq!(name, "L2");
            buf.copy_from_slice(&4096u64.to_le_bytes());
            Ok(8)
        });

        let mut naive = MockNaiveDiff::new();
        naive.expect_apply_diff().times(1).returning(|_, _, _| Ok(5));

        let orchestrator = build(Path::new("/r"), metadata, naive, true);
        let size = orchestrator.apply_diff("L2", "L1", Box::new(io::empty())).unwrap();
        assert_eq!(size, 4096);
    }

    #[test]
    fn test_reconcile_keeps_larger_reported_size() {
        let mut metadata = MockLayerMetadata::new();
        metadata.expect_query().returning(|_, buf| {
            buf.copy_from_slice(&3u64.to_le_bytes());
            Ok(8)
        });

        let orchestrator = build(Path::new("/r"), metadata, MockNaiveDiff::new(), true);
        assert_eq!(orchestrator.reconcile_applied_size("L2", "L1", 5), 5);
    }

    #[test]
    fn test_reconcile_skipped_outside_conditions() {
        // Any query here would fail the test: the mock has no expectations.
        let orchestrator =
            build(Path::new("/r"), MockLayerMetadata::new(), MockNaiveDiff::new(), true);
        assert_eq!(orchestrator.reconcile_applied_size("L2", "", 5), 5);
        assert_eq!(orchestrator.reconcile_applied_size("L2", "L1", 20), 20);

        let orchestrator =
            build(Path::new("/r"), MockLayerMetadata::new(), MockNaiveDiff::new(), false);
        assert_eq!(orchestrator.reconcile_applied_size("L2", "L1", 5), 5);
    }

    #[test]
    fn test_reconcile_ignores_query_failure() {
        let mut metadata = MockLayerMetadata::new();
        metadata.expect_query().returning(|_, _| Err(Errno::ENODATA));

        let orchestrator = build(Path::new("/r"), metadata, MockNaiveDiff::new(), true);
        assert_eq!(orchestrator.reconcile_applied_size("L2", "L1", 5), 5);
    }

    #[test]
    fn test_apply_diff_error_propagates() {
        let mut naive = MockNaiveDiff::new();
        naive.expect_apply_diff().times(1).returning(|_, _, _| Err(anyhow::anyhow!("bad tar")));

        let orchestrator =
            build(Path::new("/r"), MockLayerMetadata::new(), naive, true);
        assert!(orchestrator.apply_diff("L2", "L1", Box::new(io::empty())).is_err());
    }
}
