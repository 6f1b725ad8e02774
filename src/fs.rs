//! File-system collaborator used for export output.

use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

/// Writable, seekable destination handed to format plugins.
pub trait OutputSink: Write + Seek + Send {}

impl<T: Write + Seek + Send> OutputSink for T {}

/// Operations the exporter needs from the file system.
pub trait OutputFileSystem: Send + Sync {
    /// Check if `path` already exists.
    fn exists(&self, path: &Path) -> bool;

    /// Create `path`, truncating it if it exists.
    fn create(&self, path: &Path) -> io::Result<Box<dyn OutputSink>>;

    /// Delete `path`.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Free space in bytes in the directory `dir`, if it can be determined.
    fn available_space(&self, dir: &Path) -> Option<u64> {
        let _ = dir;
        None
    }
}

/// The local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl OutputFileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn OutputSink>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Deletes an in-progress output file unless the export commits it.
pub(crate) struct PartialOutput<'a> {
    fs: &'a dyn OutputFileSystem,
    path: &'a Path,
    committed: bool,
}

impl<'a> PartialOutput<'a> {
    pub(crate) fn new(fs: &'a dyn OutputFileSystem, path: &'a Path) -> Self {
        Self {
            fs,
            path,
            committed: false,
        }
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialOutput<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.fs.remove(self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial export output"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                "Failed to remove partial export output: {e}"
            ),
        }
    }
}
