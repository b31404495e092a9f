// Control channel to the snapshot engine
//
// Each control call opens the layer root, issues one ioctl and closes the
// descriptor again. No descriptor is shared between calls.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use nix::errno::Errno;
use tracing::{debug, error};

use super::error::{ChannelError, ChannelResult};
use super::operand::{CommandTable, ControlOp, encode};

/// Issues fixed-layout control operations against the snapshot engine.
///
/// Both `parent` and `id` may be empty; when both are, the operation is
/// global (e.g. [`ControlOp::UnmountAll`]).
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait ControlChannel: Send + Sync {
    fn send(&self, op: ControlOp, parent: &str, id: &str) -> ChannelResult<()>;
}

/// Control channel backed by `ioctl(2)` on the layer-root directory.
#[derive(Debug, Clone)]
pub struct IoctlChannel {
    root: PathBuf,
    table: CommandTable,
}

impl IoctlChannel {
    pub fn new(root: impl Into<PathBuf>, table: CommandTable) -> Self {
        Self { root: root.into(), table }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table(&self) -> CommandTable {
        self.table
    }

    fn open_root(&self) -> ChannelResult<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
            .open(&self.root)
            .map_err(|source| ChannelError::Open { path: self.root.clone(), source })
    }
}

impl ControlChannel for IoctlChannel {
    fn send(&self, op: ControlOp, parent: &str, id: &str) -> ChannelResult<()> {
        let encoded = encode(self.table.code(op), parent, id)?;

        debug!(
            op = ?op,
            parent = %parent,
            id = %id,
            operand = format_args!("{:#010x}", encoded.operand),
            "Issuing control call"
        );

        let root = self.open_root()?;
        let arg = encoded.name.as_ref().map_or(std::ptr::null(), |name| name.as_ptr());

        // SAFETY: the descriptor is open for the duration of the call and
        // `arg` is either null or points at `encoded.name`, which outlives it.
        // The engine reads exactly `name_len` bytes as encoded in the operand.
        let ret = unsafe { libc::ioctl(root.as_raw_fd(), encoded.operand as _, arg) };
        // errno must be read before close(2) gets a chance to overwrite it.
        let result = Errno::result(ret);
        drop(root);

        result.map(drop).map_err(|errno| {
            error!(op = ?op, parent = %parent, id = %id, errno = %errno, "Control call failed");
            ChannelError::Os { op, errno }
        })
    }
}
