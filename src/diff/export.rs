//! Archive export of a resolved change set.

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tar::{Builder, EntryType, Header};
use tracing::debug;

use super::change::{ChangeKind, ChangeRecord};

/// Name prefix marking a deleted entry inside a layer archive.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Archive member name for a change path: relative, no leading slash.
fn member_name(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Archive member name recording the deletion of `path`.
pub fn whiteout_name(path: &str) -> PathBuf {
    let relative = Path::new(member_name(path));
    let name = relative.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let marker = format!("{WHITEOUT_PREFIX}{name}");

    match relative.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(marker),
        _ => PathBuf::from(marker),
    }
}

/// Write the changes found under `source` into a tar archive.
///
/// With `subtree` set, added directories carry their whole content; otherwise
/// every directory is exported as its header only. The archive is spooled to
/// an anonymous temporary file and returned rewound.
pub fn export_changes(source: &Path, changes: &[ChangeRecord], subtree: bool) -> io::Result<File> {
    let mut sorted: Vec<&ChangeRecord> = changes.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut builder = Builder::new(tempfile::tempfile()?);
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for change in sorted {
        let name = member_name(&change.path);
        if name.is_empty() {
            continue;
        }

        if change.kind == ChangeKind::Deleted {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(0);
            header.set_mode(0o644);
            header.set_mtime(Utc::now().timestamp().max(0) as u64);
            builder.append_data(&mut header, whiteout_name(&change.path), io::empty())?;
            entries += 1;
            continue;
        }

        let full = source.join(name);
        let metadata = match fs::symlink_metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %change.path, "Changed entry no longer exists, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };

        if subtree && change.kind == ChangeKind::Added && metadata.is_dir() {
            builder.append_dir_all(name, &full)?;
        } else {
            builder.append_path_with_name(&full, name)?;
        }
        entries += 1;
    }

    let mut file = builder.into_inner()?;
    file.seek(SeekFrom::Start(0))?;

    debug!(source = %source.display(), entries, "Exported change archive");
    Ok(file)
}
