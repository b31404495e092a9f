//! Change-list decoder.
//!
//! The engine hands out a layer's change list one page at a time through the
//! per-layer metadata attribute. Each page holds packed records:
//!
//! ```text
//! +----------------+-------------+---------------------------+
//! | u16 LE length  | u8 code     | path (length - 3 bytes)   |
//! +----------------+-------------+---------------------------+
//! ```
//!
//! The length covers the whole record. A zero length ends the page early.
//! A path starting with `/` names a directory and sets the context that
//! later relative paths are joined to; a bare `/` clears it. The context
//! belongs to the whole list, so a directory's entries may continue on the
//! next page.

use nix::errno::Errno;
use thiserror::Error;
use tracing::{debug, trace};

use super::change::{ChangeRecord, EngineChange, classify};
use crate::engine::LayerMetadata;

/// Size of the length and code fields preceding each path.
pub const RECORD_HEADER_LEN: usize = 3;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Reasons the direct change list is unavailable.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Failed to fetch change page: {0}")]
    Fetch(Errno),

    #[error("Record at offset {offset} is shorter than its header ({len} bytes)")]
    ShortRecord { offset: usize, len: usize },

    #[error("Record at offset {offset} needs {len} bytes, page has {available}")]
    Truncated { offset: usize, len: usize, available: usize },

    #[error("Unknown change code {code} at offset {offset}")]
    UnknownChangeCode { offset: usize, code: u8 },

    #[error("Path at offset {offset} is not valid UTF-8")]
    InvalidPath { offset: usize },

    #[error("Record of {len} bytes does not fit the length field")]
    RecordTooLong { len: usize },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Records decoded from one page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedPage {
    pub records: Vec<ChangeRecord>,
    /// Bytes covered by complete records, terminator excluded.
    pub consumed: usize,
}

/// Decode a single page.
///
/// `dir` is the directory context left by the previous page, empty for the
/// first one. It is updated in place for the next page.
pub fn decode_page(page: &[u8], dir: &mut String) -> DecodeResult<DecodedPage> {
    let mut decoded = DecodedPage::default();
    let mut offset = 0;

    while offset + RECORD_HEADER_LEN <= page.len() {
        let len = usize::from(u16::from_le_bytes([page[offset], page[offset + 1]]));
        if len == 0 {
            break;
        }
        if len < RECORD_HEADER_LEN {
            return Err(DecodeError::ShortRecord { offset, len });
        }

        let end = offset + len;
        if end > page.len() {
            return Err(DecodeError::Truncated { offset, len, available: page.len() - offset });
        }

        let code = page[offset + 2];
        let raw = std::str::from_utf8(&page[offset + RECORD_HEADER_LEN..end])
            .map_err(|_| DecodeError::InvalidPath { offset })?;
        let path = resolve_path(dir, raw);

        match classify(code) {
            EngineChange::Change(kind) => decoded.records.push(ChangeRecord::new(path, kind)),
            EngineChange::Ignore => trace!(path = %path, "Ignoring unchanged entry"),
            EngineChange::Unknown(code) => {
                return Err(DecodeError::UnknownChangeCode { offset, code });
            }
        }

        offset = end;
    }

    decoded.consumed = offset;
    Ok(decoded)
}

/// Apply the directory-context rule to a decoded path.
fn resolve_path(dir: &mut String, raw: &str) -> String {
    if raw.starts_with('/') {
        dir.clear();
        if raw.len() > 1 {
            dir.push_str(raw);
        }
        raw.to_string()
    } else {
        format!("{dir}/{raw}")
    }
}

/// Pages through a layer's change list.
pub struct ChangeListDecoder<'a> {
    metadata: &'a dyn LayerMetadata,
    page_size: usize,
}

impl<'a> ChangeListDecoder<'a> {
    pub fn new(metadata: &'a dyn LayerMetadata, page_size: usize) -> Self {
        Self { metadata, page_size: page_size.max(RECORD_HEADER_LEN) }
    }

    /// Fetch and decode the whole change list of `id`.
    ///
    /// Any failure discards the records of earlier pages as well; the list
    /// can only be restarted from the beginning.
    pub fn decode(&self, id: &str) -> DecodeResult<Vec<ChangeRecord>> {
        let mut buf = vec![0u8; self.page_size];
        let mut changes = Vec::new();
        let mut dir = String::new();
        let mut pages = 0usize;

        loop {
            let fetched = self.metadata.query(id, &mut buf).map_err(DecodeError::Fetch)?;
            if fetched == 0 {
                break;
            }

            let page = decode_page(&buf[..fetched.min(buf.len())], &mut dir)?;
            if page.consumed == 0 {
                break;
            }

            pages += 1;
            changes.extend(page.records);
        }

        debug!(layer_id = %id, pages, changes = changes.len(), "Decoded change list");
        Ok(changes)
    }
}

/// Encode records in the page layout. Used to build fixtures.
pub fn encode_records<'p>(
    records: impl IntoIterator<Item = (u8, &'p str)>,
) -> DecodeResult<Vec<u8>> {
    let mut page = Vec::new();
    for (code, path) in records {
        let len = RECORD_HEADER_LEN + path.len();
        let field = u16::try_from(len).map_err(|_| DecodeError::RecordTooLong { len })?;
        page.extend_from_slice(&field.to_le_bytes());
        page.push(code);
        page.extend_from_slice(path.as_bytes());
    }
    Ok(page)
}
