// Metadata attribute queries against the layer root
//
// The engine publishes per-layer information as extended attributes on the
// layer-root directory, keyed by layer id. The size of the caller's buffer
// selects what is returned: an 8-byte buffer receives a little-endian
// integer, a page-sized buffer receives the next page of change records.

#[cfg(target_os = "linux")]
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use nix::errno::Errno;

/// Attribute name queried on the root for engine-wide settings.
pub const ROOT_ATTRIBUTE: &str = ".";

/// Source of per-layer metadata attributes.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait LayerMetadata: Send + Sync {
    /// Fill `buf` with the attribute `name`, returning the number of bytes
    /// written.
    fn query(&self, name: &str, buf: &mut [u8]) -> Result<usize, Errno>;
}

/// Read an 8-byte little-endian integer attribute.
pub fn read_u64(metadata: &dyn LayerMetadata, name: &str) -> Result<u64, Errno> {
    let mut buf = [0u8; 8];
    metadata.query(name, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Metadata source backed by `getxattr(2)` on the layer root.
#[derive(Debug, Clone)]
pub struct XattrMetadata {
    root: PathBuf,
}

impl XattrMetadata {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LayerMetadata for XattrMetadata {
    #[cfg(target_os = "linux")]
    fn query(&self, name: &str, buf: &mut [u8]) -> Result<usize, Errno> {
        let path = CString::new(self.root.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)?;
        let name = CString::new(name).map_err(|_| Errno::EINVAL)?;

        // SAFETY: both strings are NUL-terminated and live across the call;
        // the kernel writes at most `buf.len()` bytes into `buf`.
        let ret = unsafe {
            libc::getxattr(path.as_ptr(), name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        };

        Errno::result(ret).map(|n| n as usize)
    }

    #[cfg(not(target_os = "linux"))]
    fn query(&self, _name: &str, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::ENOTSUP)
    }
}
