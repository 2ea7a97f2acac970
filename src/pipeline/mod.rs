//! Pipeline stages for PDF-to-TIFF conversion.
//!
//! Each submodule implements exactly one step of an invocation. Keeping them
//! separate makes each independently testable and keeps pdfium confined to
//! [`render`].
//!
//! ## Data Flow
//!
//! ```text
//! workspace ──▶ render ──▶ encode ──▶ publish ──▶ archive
//! (scratch)    (pdfium)   (tiff)     (output)    (copy + delete)
//! ```
//!
//! 1. [`workspace`] — private scratch directory; stages the source and
//!    records every file for cleanup
//! 2. [`render`]    — rasterise pages at the target DPI; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]    — RGBA → Deflate TIFF with resolution tags
//! 4. [`publish`]   — upload each page as `{stem}_page_{n}.tiff`
//! 5. [`archive`]   — copy the source to the archive location, then delete it
//!    from the input location

pub mod archive;
pub mod encode;
pub mod publish;
pub mod render;
pub mod workspace;
