//! Directory traversal used to size data before copying it.
//!
//! Sizes are apparent file sizes: reflink (copy-on-write) savings are not
//! taken into account, so the numbers are an upper bound of what a copy needs.

use std::path::Path;
use walkdir::WalkDir;

/// Totals gathered while walking a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    /// Number of non-directory entries (regular files, symlinks, sockets...)
    pub files: usize,

    /// Sum of the entries' sizes in bytes
    pub bytes: u64,
}

/// Walk a directory tree and sum the sizes of every non-directory entry.
///
/// Symbolic links are not followed; a link contributes its own size.
///
/// # Example
/// ```no_run
/// use datakeeper::fs::walker::summarize;
/// use std::path::Path;
///
/// let summary = summarize(Path::new("/var/lib/microshift")).unwrap();
/// println!("{} files, {} bytes", summary.files, summary.bytes);
/// ```
pub fn summarize(root: &Path) -> std::io::Result<TreeSummary> {
    let mut summary = TreeSummary::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        summary.files += 1;
        summary.bytes += entry.metadata()?.len();
    }

    Ok(summary)
}
