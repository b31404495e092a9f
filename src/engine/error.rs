use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use super::operand::ControlOp;

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Failure of a single control call.
///
/// Channel errors are always handed back to the caller; the channel never
/// retries on its own.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to open layer root {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Control operation {op:?} failed: {errno}")]
    Os { op: ControlOp, errno: Errno },

    #[error("Parent id too long: {0} bytes (max 255)")]
    ParentTooLong(usize),

    #[error("Layer name too long: {0} bytes (max 16383)")]
    NameTooLong(usize),
}

impl ChannelError {
    /// Underlying OS error code.
    pub fn errno(&self) -> i32 {
        match self {
            ChannelError::Open { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            ChannelError::Os { errno, .. } => *errno as i32,
            ChannelError::ParentTooLong(_) | ChannelError::NameTooLong(_) => libc::ENAMETOOLONG,
        }
    }

    /// True when the engine reported that the layer does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChannelError::Os { errno: Errno::ENOENT, .. })
    }
}
