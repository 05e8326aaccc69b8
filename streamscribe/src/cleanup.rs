//! Ownership of the temporary files a transcription call creates.
//!
//! Every staged upload and every converted audio file lives in a private directory
//! owned by a [`TempFiles`] registry. Cleanup runs explicitly once the recognition
//! session has finished, and again from `Drop` so early returns and panics are covered.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::Result;

/// Registry of temporary files, removed together when the transcription call ends.
#[derive(Debug)]
pub struct TempFiles {
    dir: PathBuf,
    dir_created: bool,
    files: Vec<PathBuf>,
}

impl TempFiles {
    /// Registry rooted in the system temp directory.
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    /// Registry rooted in `base`. The per-call directory is created on first use.
    ///
    /// The directory name carries the process id and a nanosecond timestamp so
    /// concurrent calls, even within one process, never share it.
    pub fn in_dir(base: impl AsRef<Path>) -> Self {
        let dir = base.as_ref().join(format!(
            "streamscribe-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        Self {
            dir,
            dir_created: false,
            files: Vec::new(),
        }
    }

    /// Reserve a tracked path named `name` inside the private directory.
    /// The file itself is not created.
    pub fn create(&mut self, name: &str) -> Result<PathBuf> {
        if !self.dir_created {
            std::fs::create_dir_all(&self.dir)?;
            self.dir_created = true;
        }
        let path = self.dir.join(format!("{}-{name}", self.files.len()));
        self.files.push(path.clone());
        Ok(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|p| p == path)
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete every tracked file and the private directory.
    ///
    /// Returns the number of files actually removed. Failures are logged and
    /// otherwise ignored; a file that is already gone is not a failure.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to clean up temp file");
                }
            }
        }

        if self.dir_created {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.dir.display(), error = %e, "failed to clean up temp dir");
                }
            }
            self.dir_created = false;
        }

        if removed > 0 {
            debug!(removed, "temp files cleaned up");
        }
        removed
    }
}

impl Default for TempFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_create_is_lazy_and_tracked() {
        let base = tempfile::tempdir().unwrap();
        let mut files = TempFiles::in_dir(base.path());
        assert!(!files.dir().exists());

        let path = files.create("audio.wav").unwrap();
        assert!(files.dir().exists());
        assert!(path.starts_with(files.dir()));
        assert!(files.contains(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_removes_files_and_dir() {
        let base = tempfile::tempdir().unwrap();
        let mut files = TempFiles::in_dir(base.path());
        let a = files.create("a.wav").unwrap();
        let b = files.create("b.wav").unwrap();
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        assert_eq!(files.cleanup(), 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(!files.dir().exists());
        assert!(files.tracked().is_empty());
    }

    #[test]
    fn test_distinct_names_for_same_label() {
        let base = tempfile::tempdir().unwrap();
        let mut files = TempFiles::in_dir(base.path());
        let a = files.create("audio.wav").unwrap();
        let b = files.create("audio.wav").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cleanup_tolerates_missing_files() {
        let base = tempfile::tempdir().unwrap();
        let mut files = TempFiles::in_dir(base.path());
        let never_written = files.create("never-written.wav").unwrap();
        let removed_early = files.create("removed-early.wav").unwrap();
        fs::write(&removed_early, b"x").unwrap();
        fs::remove_file(&removed_early).unwrap();

        assert_eq!(files.cleanup(), 0);
        assert!(!never_written.exists());
        assert!(!files.dir().exists());
    }

    #[test]
    fn test_drop_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let path;
        let dir;
        {
            let mut files = TempFiles::in_dir(base.path());
            path = files.create("x.wav").unwrap();
            fs::write(&path, b"x").unwrap();
            dir = files.dir().to_path_buf();
        }
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_cleanup_twice_is_harmless() {
        let base = tempfile::tempdir().unwrap();
        let mut files = TempFiles::in_dir(base.path());
        let path = files.create("x.wav").unwrap();
        fs::write(&path, b"x").unwrap();
        assert_eq!(files.cleanup(), 1);
        assert_eq!(files.cleanup(), 0);
    }
}
