// Output layout for motion artifacts
//
// <output_dir>/<camera dir>/<YYYY-MM-DD>/motion_<YYYYmmdd_HHMMSS>.jpg
// <output_dir>/<camera dir>/<YYYY-MM-DD>/clip_<YYYYmmdd_HHMMSS>.mkv

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Container extension for clips
pub const CLIP_EXTENSION: &str = "mkv";

/// Paths for one session's artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub snapshot: PathBuf,
    pub clip: PathBuf,
}

/// Resolves artifact paths for one camera
#[derive(Debug, Clone)]
pub struct ClipStorage {
    camera_root: PathBuf,
}

impl ClipStorage {
    pub fn new(output_dir: &Path, camera_dir: &str) -> Self {
        Self {
            camera_root: output_dir.join(camera_dir),
        }
    }

    /// Create the day directory and pick names that don't overwrite existing files
    pub fn prepare(&self, started_at: &DateTime<Local>) -> std::io::Result<ArtifactPaths> {
        let day_dir = self
            .camera_root
            .join(started_at.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&day_dir)?;

        let stamp = started_at.format("%Y%m%d_%H%M%S").to_string();
        let mut suffix = 0u32;
        loop {
            let stem = if suffix == 0 {
                stamp.clone()
            } else {
                format!("{}_{}", stamp, suffix)
            };
            let paths = ArtifactPaths {
                snapshot: day_dir.join(format!("motion_{}.jpg", stem)),
                clip: day_dir.join(format!("clip_{}.{}", stem, CLIP_EXTENSION)),
            };
            if !paths.snapshot.exists() && !paths.clip.exists() {
                return Ok(paths);
            }
            suffix += 1;
        }
    }
}
