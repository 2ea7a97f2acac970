//! Per-invocation scratch workspace.
//!
//! pdfium wants a file-system path, and encoded pages are written to disk
//! before upload, so every invocation needs local scratch space. Each
//! invocation gets its own directory (`pdf2tiff-{invocation}-XXXXXX`) under
//! the scratch root, and every file placed in it is recorded. Cleanup removes
//! exactly the recorded files and then the directory; it never scans the
//! scratch root, so concurrent invocations sharing that root cannot touch
//! each other's files.
//!
//! [`Workspace::cleanup`] is the normal release path. If it is never reached
//! (panic, cancelled future) the inner [`TempDir`] removes the directory on
//! drop.

use crate::error::JobError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name used for the staged source document.
const SOURCE_FILE: &str = "source.pdf";

/// Scratch space owned by one invocation.
#[derive(Debug)]
pub struct Workspace {
    invocation: Uuid,
    dir: TempDir,
    files: Arc<Mutex<Vec<PathBuf>>>,
}

/// Cloneable, `Send` handle that allocates files inside a [`Workspace`].
///
/// Handed to the blocking render worker so page files are recorded by the
/// workspace that owns them.
#[derive(Debug, Clone)]
pub struct ScratchAllocator {
    dir: PathBuf,
    files: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScratchAllocator {
    /// Reserve a path for `file_name` and record it for cleanup.
    pub fn allocate(&self, file_name: &str) -> PathBuf {
        let path = self.dir.join(file_name);
        let mut files = match self.files.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !files.contains(&path) {
            files.push(path.clone());
        }
        path
    }

    /// Scratch path for the encoded image of page `index` (1-based).
    pub fn page_file(&self, index: usize) -> PathBuf {
        self.allocate(&format!("page_{index:05}.tiff"))
    }
}

impl Workspace {
    /// Create a private scratch directory for `invocation` under `root`
    /// (the system temp dir when `None`).
    pub fn create(root: Option<&Path>, invocation: Uuid) -> Result<Self, JobError> {
        let root = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root).map_err(|e| JobError::workspace(&root, e))?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("pdf2tiff-{invocation}-"))
            .tempdir_in(&root)
            .map_err(|e| JobError::workspace(&root, e))?;

        debug!(invocation = %invocation, dir = %dir.path().display(), "Workspace created");

        Ok(Self {
            invocation,
            dir,
            files: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The private scratch directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A handle for allocating files from other threads.
    pub fn allocator(&self) -> ScratchAllocator {
        ScratchAllocator {
            dir: self.dir.path().to_path_buf(),
            files: Arc::clone(&self.files),
        }
    }

    /// Files allocated so far, in allocation order.
    pub fn files(&self) -> Vec<PathBuf> {
        match self.files.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Write the downloaded source document to scratch and return its path.
    pub async fn stage_source(&self, data: &[u8]) -> Result<PathBuf, JobError> {
        let path = self.allocator().allocate(SOURCE_FILE);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| JobError::workspace(&path, e))?;
        debug!(path = %path.display(), size = data.len(), "Source staged");
        Ok(path)
    }

    /// Remove every file this invocation created, then its directory.
    ///
    /// Returns the number of files removed. Failures are logged, not
    /// returned: cleanup runs after the outcome of the invocation is already
    /// decided and must not mask it. This is blocking file-system work; async
    /// callers run it through `spawn_blocking`.
    pub fn cleanup(self) -> usize {
        let mut removed = 0;
        for file in self.files() {
            match std::fs::remove_file(&file) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %file.display(), error = %e, "Failed to remove scratch file"),
            }
        }

        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(dir = %dir.display(), error = %e, "Failed to remove scratch directory");
        }

        info!(invocation = %self.invocation, removed, "Workspace cleaned up");
        removed
    }
}
