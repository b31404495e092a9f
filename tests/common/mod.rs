#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use nix::errno::Errno;
use snaplayer::Driver;
use snaplayer::config::Config;
use snaplayer::diff::{ChangeRecord, NaiveDiff};
use snaplayer::engine::{ChannelError, ChannelResult, ControlChannel, ControlOp, LayerMetadata};

#[derive(Default)]
pub struct EngineState {
    pub calls: Vec<(ControlOp, String, String)>,
    pub layers: HashSet<String>,
    pub mounted: HashSet<String>,
    pub pages: HashMap<String, VecDeque<Vec<u8>>>,
    pub page_errors: HashMap<String, Errno>,
    pub attrs: HashMap<String, u64>,
    pub failures: HashMap<ControlOp, Errno>,
}

/// In-memory snapshot engine serving both control calls and metadata queries.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_swap_layers() -> Self {
        let engine = Self::new();
        engine.set_attr(".", 1);
        engine
    }

    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub fn set_attr(&self, name: &str, value: u64) {
        self.state().attrs.insert(name.to_string(), value);
    }

    pub fn push_page(&self, id: &str, page: Vec<u8>) {
        self.state().pages.entry(id.to_string()).or_default().push_back(page);
    }

    pub fn fail_pages(&self, id: &str, errno: Errno) {
        self.state().page_errors.insert(id.to_string(), errno);
    }

    pub fn fail_op(&self, op: ControlOp, errno: Errno) {
        self.state().failures.insert(op, errno);
    }

    pub fn calls_of(&self, op: ControlOp) -> usize {
        self.state().calls.iter().filter(|(o, _, _)| *o == op).count()
    }

    pub fn is_mounted(&self, id: &str) -> bool {
        self.state().mounted.contains(id)
    }
}

impl ControlChannel for FakeEngine {
    fn send(&self, op: ControlOp, parent: &str, id: &str) -> ChannelResult<()> {
        let mut state = self.state();
        state.calls.push((op, parent.to_string(), id.to_string()));

        if let Some(errno) = state.failures.get(&op) {
            return Err(ChannelError::Os { op, errno: *errno });
        }

        let result = match op {
            ControlOp::Stat if id == "." || state.layers.contains(id) => Ok(()),
            ControlOp::Stat => Err(Errno::ENOENT),
            ControlOp::Create | ControlOp::CloneCreate => {
                if state.layers.insert(id.to_string()) { Ok(()) } else { Err(Errno::EEXIST) }
            }
            ControlOp::Remove => {
                if state.layers.remove(id) { Ok(()) } else { Err(Errno::ENOENT) }
            }
            ControlOp::Mount if state.layers.contains(id) => {
                state.mounted.insert(id.to_string());
                Ok(())
            }
            ControlOp::Mount => Err(Errno::ENOENT),
            ControlOp::Unmount => {
                state.mounted.remove(id);
                Ok(())
            }
            ControlOp::UnmountAll => {
                state.mounted.clear();
                Ok(())
            }
        };

        result.map_err(|errno| ChannelError::Os { op, errno })
    }
}

impl LayerMetadata for FakeEngine {
    fn query(&self, name: &str, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut state = self.state();

        if buf.len() == 8 {
            let value = state.attrs.get(name).copied().ok_or(Errno::ENODATA)?;
            buf.copy_from_slice(&value.to_le_bytes());
            return Ok(8);
        }

        if let Some(errno) = state.page_errors.get(name) {
            return Err(*errno);
        }

        match state.pages.get_mut(name).and_then(|pages| pages.pop_front()) {
            Some(page) => {
                buf[..page.len()].copy_from_slice(&page);
                Ok(page.len())
            }
            None => Ok(0),
        }
    }
}

/// Generic collaborator double that records every request.
#[derive(Default)]
pub struct RecordingNaiveDiff {
    pub archive: Vec<u8>,
    pub changes: Vec<ChangeRecord>,
    pub size: u64,
    pub requests: Mutex<Vec<String>>,
}

impl RecordingNaiveDiff {
    pub fn with_archive(archive: &[u8]) -> Self {
        Self { archive: archive.to_vec(), ..Self::default() }
    }

    fn record(&self, request: String) {
        self.requests.lock().unwrap().push(request);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl NaiveDiff for RecordingNaiveDiff {
    fn diff(&self, id: &str, parent: &str) -> Result<Box<dyn Read + Send>> {
        self.record(format!("diff {id} {parent}"));
        Ok(Box::new(Cursor::new(self.archive.clone())))
    }

    fn changes(&self, id: &str, parent: &str) -> Result<Vec<ChangeRecord>> {
        self.record(format!("changes {id} {parent}"));
        Ok(self.changes.clone())
    }

    fn diff_size(&self, id: &str, parent: &str) -> Result<u64> {
        self.record(format!("diff_size {id} {parent}"));
        Ok(self.size)
    }

    /// Reports the number of archive bytes consumed.
    fn apply_diff(&self, id: &str, parent: &str, mut archive: Box<dyn Read + Send>) -> Result<u64> {
        self.record(format!("apply_diff {id} {parent}"));
        let mut bytes = Vec::new();
        archive.read_to_end(&mut bytes)?;
        Ok(bytes.len() as u64)
    }
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.driver.root = root.to_path_buf();
    config
}

pub fn start_driver(
    root: &Path,
    engine: &FakeEngine,
    naive: Arc<RecordingNaiveDiff>,
) -> Result<Driver> {
    let config = test_config(root);
    let driver = Driver::init(&config, Arc::new(engine.clone()), Arc::new(engine.clone()), naive)?;
    Ok(driver)
}
