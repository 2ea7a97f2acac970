//! Error types for the pdf2tiff job.
//!
//! Two error types reflect the two layers of the job:
//!
//! * [`JobError`] — **Fatal**: the invocation cannot complete. Every variant
//!   aborts the remaining pipeline steps; the workspace is cleaned up and the
//!   error is handed back to the invoking platform, whose redelivery policy
//!   governs recovery. Nothing is retried in-process.
//!
//! * [`StorageError`] — a failed call against the blob store. The pipeline
//!   stages wrap it in the [`JobError`] variant that names *which* step
//!   failed (upload, archive copy, source delete), because the same storage
//!   failure has very different consequences depending on where it happens.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by a job invocation.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Staging errors ────────────────────────────────────────────────────
    /// The source object could not be downloaded into the workspace.
    #[error("Failed to stage source '{name}': {source}")]
    StagingError {
        name: String,
        #[source]
        source: StorageError,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The source is not a PDF pdfium can open (corrupt, truncated, encrypted,
    /// or zero pages). No output is published for such a document.
    #[error("Source '{name}' is not a renderable PDF: {detail}")]
    InvalidDocument { name: String, detail: String },

    /// Rendering or encoding one page failed. Pages published before it stay
    /// in the output location.
    #[error("Rendering failed for page {index}: {detail}")]
    PageRenderError { index: usize, detail: String },

    // ── Publishing errors ─────────────────────────────────────────────────
    /// A page image could not be written to the output location.
    #[error("Failed to upload '{object}': {source}")]
    UploadError {
        object: String,
        #[source]
        source: StorageError,
    },

    // ── Relocation errors ─────────────────────────────────────────────────
    /// Copying the source into the archive location failed. The source is
    /// untouched and the delete step was not attempted.
    #[error("Failed to copy '{name}' to the archive location: {source}")]
    ArchiveCopyError {
        name: String,
        #[source]
        source: StorageError,
    },

    /// The archive copy exists but the source could not be deleted from the
    /// input location. The object now exists in both places.
    #[error(
        "Archived '{name}' but could not delete it from the input location: {source}\n\
The object now exists in both the input and archive locations."
    )]
    SourceCleanupError {
        name: String,
        #[source]
        source: StorageError,
    },

    // ── Workspace errors ──────────────────────────────────────────────────
    /// Scratch directory or scratch file could not be created or written.
    #[error("Scratch workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The invocation exceeded its configured time budget.
    #[error("Invocation timed out after {secs}s")]
    Timeout { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or storage settings validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib) to point at an\n\
existing copy, or install pdfium where the system loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, data-free discriminant of [`JobError`], for matching and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Staging,
    InvalidDocument,
    PageRender,
    Upload,
    ArchiveCopy,
    SourceCleanup,
    Workspace,
    Timeout,
    InvalidConfig,
    PdfiumBinding,
    Internal,
}

impl JobError {
    /// The kind of this error.
    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::StagingError { .. } => JobErrorKind::Staging,
            JobError::InvalidDocument { .. } => JobErrorKind::InvalidDocument,
            JobError::PageRenderError { .. } => JobErrorKind::PageRender,
            JobError::UploadError { .. } => JobErrorKind::Upload,
            JobError::ArchiveCopyError { .. } => JobErrorKind::ArchiveCopy,
            JobError::SourceCleanupError { .. } => JobErrorKind::SourceCleanup,
            JobError::Workspace { .. } => JobErrorKind::Workspace,
            JobError::Timeout { .. } => JobErrorKind::Timeout,
            JobError::InvalidConfig(_) => JobErrorKind::InvalidConfig,
            JobError::PdfiumBindingFailed(_) => JobErrorKind::PdfiumBinding,
            JobError::Internal(_) => JobErrorKind::Internal,
        }
    }

    /// Whether the source object is guaranteed to still be in the input
    /// location after this failure.
    ///
    /// Every error except the source delete itself aborts before the delete
    /// step is reached. A delete that failed with `NotFound` means the source
    /// was already gone (a redelivered invocation), and a timeout may
    /// interrupt the delete, so neither guarantees the source.
    pub fn source_preserved(&self) -> bool {
        match self {
            JobError::SourceCleanupError { source, .. } => !source.is_not_found(),
            JobError::Timeout { .. } => false,
            _ => true,
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JobError::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by a [`crate::storage::BlobStorage`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object or container does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected for this operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No store is configured for the requested container.
    #[error("unknown container '{0}'")]
    UnknownContainer(String),

    /// Invalid object path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(#[source] object_store::Error),

    /// Failure raised outside `object_store` (e.g. injected by tests).
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Creates a new not found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Creates a free-form error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True when the object was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            object_store::Error::PermissionDenied { path, .. }
            | object_store::Error::Unauthenticated { path, .. } => Self::PermissionDenied(path),
            object_store::Error::InvalidPath { source } => Self::InvalidPath(source.to_string()),
            other => Self::Backend(other),
        }
    }
}
