//! Directory scanning for mask images written to disk by a segmentation run.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::Error;

const MASK_EXTS: &[&str] = &["png", "webp", "jpg", "jpeg", "gif"];

/// Return `true` if `path` has an extension the loader can decode.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            MASK_EXTS.iter().any(|e| *e == ext)
        })
}

/// Collect mask images directly inside `dir`, sorted by file name so that
/// `mask_0.png, mask_1.png, ...` keep the service's output order.
///
/// # Errors
/// Returns [`Error::Io`] if `dir` is missing or unreadable.
pub fn collect_masks(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && is_supported_image(path) {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}

fn is_hidden(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.'))
}
