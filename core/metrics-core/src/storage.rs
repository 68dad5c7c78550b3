//! Per-project storage paths.
//!
//! All path decisions live in [`MetricsPaths`] so tests can point the crate at
//! a temp directory and the metadata directory name stays configurable.
//!
//! ```text
//! <project>/<metadata_dir>/metrics.jsonl          append-only log
//! <project>/<metadata_dir>/.metrics-session.tmp   in-flight checkpoint
//! <project>/<metadata_dir>/.metrics-session.corrupt  last unreadable checkpoint
//! ```

use std::path::{Path, PathBuf};

use fs_err as fs;

/// Default metadata directory inside a project.
pub const DEFAULT_METADATA_DIR: &str = ".spec-workflow";

pub const LOG_FILE_NAME: &str = "metrics.jsonl";
pub const CHECKPOINT_FILE_NAME: &str = ".metrics-session.tmp";
pub const CORRUPT_CHECKPOINT_FILE_NAME: &str = ".metrics-session.corrupt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsPaths {
    metadata_dir: String,
}

impl Default for MetricsPaths {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_DIR)
    }
}

impl MetricsPaths {
    pub fn new(metadata_dir: impl Into<String>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
        }
    }

    /// Path to a project's metadata directory.
    pub fn metadata_dir(&self, project_path: &Path) -> PathBuf {
        project_path.join(&self.metadata_dir)
    }

    /// Path to a project's metric log.
    pub fn log_file(&self, project_path: &Path) -> PathBuf {
        self.metadata_dir(project_path).join(LOG_FILE_NAME)
    }

    /// Path to a project's session checkpoint.
    pub fn checkpoint_file(&self, project_path: &Path) -> PathBuf {
        self.metadata_dir(project_path).join(CHECKPOINT_FILE_NAME)
    }

    /// Where an unreadable checkpoint is moved aside.
    pub fn corrupt_checkpoint_file(&self, project_path: &Path) -> PathBuf {
        self.metadata_dir(project_path)
            .join(CORRUPT_CHECKPOINT_FILE_NAME)
    }

    /// Creates the metadata directory if missing. Idempotent.
    pub fn ensure_metadata_dir(&self, project_path: &Path) -> std::io::Result<()> {
        fs::create_dir_all(self.metadata_dir(project_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_metadata_dir() {
        let paths = MetricsPaths::default();
        assert_eq!(
            paths.metadata_dir(Path::new("/work/app")),
            PathBuf::from("/work/app/.spec-workflow")
        );
    }

    #[test]
    fn test_log_and_checkpoint_paths() {
        let paths = MetricsPaths::new(".meta");
        assert_eq!(
            paths.log_file(Path::new("/work/app")),
            PathBuf::from("/work/app/.meta/metrics.jsonl")
        );
        assert_eq!(
            paths.checkpoint_file(Path::new("/work/app")),
            PathBuf::from("/work/app/.meta/.metrics-session.tmp")
        );
        assert_eq!(
            paths.corrupt_checkpoint_file(Path::new("/work/app")),
            PathBuf::from("/work/app/.meta/.metrics-session.corrupt")
        );
    }

    #[test]
    fn test_ensure_metadata_dir_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let paths = MetricsPaths::default();

        paths.ensure_metadata_dir(temp.path()).unwrap();
        paths.ensure_metadata_dir(temp.path()).unwrap();

        assert!(paths.metadata_dir(temp.path()).is_dir());
    }
}
