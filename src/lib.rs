//! # pdf2tiff
//!
//! Storage-triggered PDF to TIFF conversion.
//!
//! When a PDF lands in the input location, one invocation renders every page
//! at 300 DPI, publishes each page as `{stem}_page_{n}.tiff` to the output
//! location, copies the source into the archive location, deletes it from the
//! input location, and removes its scratch files.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input/{name}.pdf
//!  │
//!  ├─ 1. Stage    download into a private scratch directory
//!  ├─ 2. Convert  rasterise one page at a time via pdfium (spawn_blocking)
//!  ├─ 3. Encode   RGBA → Deflate TIFF tagged 300×300 DPI
//!  ├─ 4. Publish  output/{stem}_page_{n}.tiff, in page order
//!  ├─ 5. Archive  copy to archive/{name}.pdf, confirm, then delete the source
//!  └─ 6. Cleanup  remove this invocation's scratch files, always
//! ```
//!
//! Steps run strictly in order and the first failure aborts the rest. The
//! source is deleted only after every page is published and the archive copy
//! is confirmed, so a failed invocation can simply be redelivered.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2tiff::{run_job, JobConfig, ObjectStoreStorage, PdfiumRasterizer, SourceRef, StorageSettings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JobConfig::default();
//!     let settings = StorageSettings::from_env("PDF2TIFF_STORAGE")?;
//!     let storage = ObjectStoreStorage::azure(&settings, config.locations.containers())?;
//!     let rasterizer = PdfiumRasterizer::new(None)?;
//!
//!     let report = run_job(
//!         Arc::new(storage),
//!         Arc::new(rasterizer),
//!         &config,
//!         SourceRef::new("invoice.pdf"),
//!     )
//!     .await?;
//!     println!("{:?}", report.outputs);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2tiff` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2tiff = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod storage;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{JobConfig, JobConfigBuilder, Location, Locations, StorageSettings};
pub use error::{JobError, JobErrorKind, StorageError};
pub use job::{run_job, JobRunner, JobState};
pub use output::{output_object_name, JobReport, PageImage, SourceRef};
pub use pipeline::render::{PdfiumRasterizer, RasterDocument, RasterError, Rasterizer};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{BlobStorage, ObjectRef, ObjectStoreStorage};
pub use stream::PageStream;
