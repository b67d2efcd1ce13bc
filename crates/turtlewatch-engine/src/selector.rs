use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Most recently created image in `dir`, or `None` when the directory is
/// missing or holds no eligible files.
pub fn select_latest(dir: &Path) -> Option<PathBuf> {
    latest_image(dir).map(|candidate| candidate.path)
}

pub fn latest_image(dir: &Path) -> Option<ImageCandidate> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), "cannot list image directory: {err}");
            return None;
        }
    };
    let candidates = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !has_image_extension(&path) {
                return None;
            }
            let metadata = fs::metadata(&path).ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(ImageCandidate {
                created: creation_time(&metadata)?,
                path,
            })
        })
        .collect();
    pick_latest(candidates)
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Ties on creation time go to the lexically first path.
fn pick_latest(mut candidates: Vec<ImageCandidate>) -> Option<ImageCandidate> {
    candidates.sort_by(|left, right| left.path.cmp(&right.path));
    let mut best: Option<ImageCandidate> = None;
    for candidate in candidates {
        let newer = best
            .as_ref()
            .map(|current| candidate.created > current.created)
            .unwrap_or(true);
        if newer {
            best = Some(candidate);
        }
    }
    best
}

// Not every filesystem records birth time.
fn creation_time(metadata: &Metadata) -> Option<SystemTime> {
    metadata.created().or_else(|_| metadata.modified()).ok()
}
