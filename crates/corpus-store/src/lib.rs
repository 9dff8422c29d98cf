//! Labeled image corpus access for QC Vision
//!
//! The corpus is a plain directory tree: `ok/`, `ng/`, and `unlabeled/`
//! roots with date-partitioned subdirectories below them. The engine only
//! ever reads the `ok/` (normal) set, so that is all this crate exposes.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use common::Result;

/// Image file extensions the corpus recognizes
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Read access to the set of normal ("OK") reference samples
///
/// Implemented by the filesystem corpus; injectable so tests can substitute
/// a fixed sample set.
pub trait CorpusAccessor: Send + Sync {
    /// Enumerates the normal samples in a stable (path-sorted) order.
    fn normal_samples(&self) -> Result<Vec<PathBuf>>;

    /// Number of normal samples currently in the corpus.
    fn normal_count(&self) -> Result<usize> {
        Ok(self.normal_samples()?.len())
    }

    /// Number of normal samples added (modified) at or after the cutoff.
    fn added_since(&self, cutoff: SystemTime) -> Result<usize>;
}

/// Filesystem-backed corpus accessor
///
/// Scans the OK directory recursively, so both flat layouts and the
/// date-partitioned layout (`ok/20260805/…`) produced by the capture station
/// are covered.
pub struct FsCorpus {
    ok_dir: PathBuf,
}

impl FsCorpus {
    /// Creates an accessor over the given OK-image directory.
    pub fn new(ok_dir: impl Into<PathBuf>) -> Self {
        Self {
            ok_dir: ok_dir.into(),
        }
    }

    /// The directory this corpus reads from
    pub fn ok_dir(&self) -> &Path {
        &self.ok_dir
    }

    fn scan(&self) -> Vec<PathBuf> {
        if !self.ok_dir.exists() {
            return Vec::new();
        }

        let mut samples: Vec<PathBuf> = WalkDir::new(&self.ok_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| is_image(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        samples.sort();
        samples
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

impl CorpusAccessor for FsCorpus {
    fn normal_samples(&self) -> Result<Vec<PathBuf>> {
        let samples = self.scan();
        debug!(
            "Corpus scan of {} found {} normal samples",
            self.ok_dir.display(),
            samples.len()
        );
        Ok(samples)
    }

    fn added_since(&self, cutoff: SystemTime) -> Result<usize> {
        let mut count = 0;
        for path in self.scan() {
            let modified = std::fs::metadata(&path)?.modified()?;
            if modified >= cutoff {
                count += 1;
            }
        }
        Ok(count)
    }
}
