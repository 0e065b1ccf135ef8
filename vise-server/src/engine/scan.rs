//! Image collection scan
//!
//! One full filesystem traversal of the configured image directory builds
//! the image list. Entry order equals traversal order, which is not
//! guaranteed stable across runs or platforms; downstream consumers must
//! not rely on it.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// One image known to the engine.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    /// Path relative to the scanned image directory
    pub rel_path: PathBuf,
    /// Size of the source file at scan time, in bytes
    pub original_size: u64,
    /// Size of the transformed copy, filled in by preprocessing
    pub transformed_size: u64,
}

/// Extensions the engine can ingest (compared case-insensitively).
const ACCEPTABLE_IMG_EXT: &[&str] = &["jpg", "jpeg", "png", "pgm", "pnm", "ppm"];

fn is_acceptable_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            ACCEPTABLE_IMG_EXT.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Recursively scan `dir` for image files.
///
/// Keeps regular files with an acceptable extension, skipping dot-prefixed
/// file names and anything else. Unreadable entries are logged and skipped;
/// the scan itself never fails.
pub fn scan_image_dir(dir: &Path) -> Vec<ImageEntry> {
    let mut entries = Vec::new();

    for item in WalkDir::new(dir).follow_links(false) {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warn!("error accessing entry during image scan: {}", e);
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }

        let path = item.path();
        if is_dotfile(path) || !is_acceptable_ext(path) {
            continue;
        }

        let rel_path = match path.strip_prefix(dir) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let original_size = item.metadata().map(|m| m.len()).unwrap_or(0);

        entries.push(ImageEntry {
            rel_path,
            original_size,
            transformed_size: 0,
        });
    }

    entries
}
