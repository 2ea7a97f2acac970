//! PDF rasterisation: render pages to RGBA bitmaps and turn them into
//! [`PageImage`]s.
//!
//! ## Scale
//!
//! PDF user space has 72 units per inch. Rendering at `dpi` therefore uses a
//! uniform scale of `dpi / 72` on both axes, and the bitmap for a page of
//! `w × h` points is `round(w·scale) × round(h·scale)` pixels. The target size
//! is computed here and handed to the rasterizer explicitly so the rounding
//! rule does not depend on the backend.
//!
//! ## Why a trait?
//!
//! pdfium is a C library behind a dynamic binding. [`Rasterizer`] keeps the
//! rest of the pipeline independent of it, so the orchestrator can be driven
//! by a scripted rasterizer in tests and by [`PdfiumRasterizer`] in
//! production.
//!
//! ## Threading
//!
//! pdfium is blocking and not safe to initialise concurrently. Rasterizers
//! are only called from a `spawn_blocking` worker (see [`crate::stream`]).
//! [`PdfiumRasterizer`] binds the library once and shares it between
//! invocations; `pdfium-render`'s `thread_safe` feature serialises the
//! individual FFI calls, so one invocation's uploads never hold up another
//! invocation's document.

use crate::error::JobError;
use crate::output::PageImage;
use crate::pipeline::encode;
use crate::pipeline::workspace::ScratchAllocator;
use image::RgbaImage;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// PDF user-space units per inch.
pub const PDF_POINTS_PER_INCH: f64 = 72.0;

/// Failure reported by a [`Rasterizer`] or [`RasterDocument`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RasterError(pub String);

impl RasterError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// An opened document that can render its pages.
///
/// Page indices are 0-based at this level.
pub trait RasterDocument {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Page size in PDF points (width, height).
    fn page_size(&self, index: usize) -> Result<(f64, f64), RasterError>;

    /// Render page `index` to exactly `width × height` RGBA pixels, keeping
    /// transparency where the page has none painted.
    fn render_page(&self, index: usize, width: u32, height: u32)
        -> Result<RgbaImage, RasterError>;
}

/// Opens PDF files for rendering.
pub trait Rasterizer: Send + Sync + 'static {
    /// Open `pdf_path` and pass the document to `visit`.
    ///
    /// The document only lives for the duration of the call. Returns an
    /// error, without calling `visit`, when the file cannot be opened as a
    /// PDF.
    fn with_document(
        &self,
        pdf_path: &Path,
        visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), RasterError>;
}

/// Scale factor from PDF user space to `dpi`.
pub fn scale_for_dpi(dpi: u32) -> f64 {
    f64::from(dpi) / PDF_POINTS_PER_INCH
}

/// Pixel size of a `width_pt × height_pt` page rendered at `scale`.
///
/// Each side is rounded to the nearest pixel and is at least one pixel.
pub fn scaled_dimensions(width_pt: f64, height_pt: f64, scale: f64) -> (u32, u32) {
    let px = |pt: f64| (pt * scale).round().max(1.0) as u32;
    (px(width_pt), px(height_pt))
}

/// Cheap pre-check that `bytes` looks like a PDF: the `%PDF-` marker must
/// appear within the first KiB, which is as much leading garbage as PDF
/// readers tolerate.
pub fn check_pdf_header(bytes: &[u8]) -> Result<(), String> {
    let window = &bytes[..bytes.len().min(1024)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(format!("missing %PDF header (first bytes: {magic:?})"))
}

/// Render page `index` (0-based) of `doc` at `dpi`, encode it as TIFF and
/// write it to scratch.
pub fn convert_page(
    doc: &dyn RasterDocument,
    index: usize,
    dpi: u32,
    scratch: &ScratchAllocator,
) -> Result<PageImage, JobError> {
    let page_no = index + 1;
    let failed = |detail: String| JobError::PageRenderError {
        index: page_no,
        detail,
    };

    let (width_pt, height_pt) = doc.page_size(index).map_err(|e| failed(e.to_string()))?;
    let (width, height) = scaled_dimensions(width_pt, height_pt, scale_for_dpi(dpi));

    let image = doc
        .render_page(index, width, height)
        .map_err(|e| failed(e.to_string()))?;
    if image.dimensions() != (width, height) {
        warn!(
            page = page_no,
            expected = ?(width, height),
            actual = ?image.dimensions(),
            "Rasterizer ignored the requested size"
        );
    }

    let data = encode::encode_tiff(&image, dpi)
        .map_err(|e| failed(format!("TIFF encoding failed: {e}")))?;

    let path = scratch.page_file(page_no);
    std::fs::write(&path, &data).map_err(|e| JobError::workspace(&path, e))?;

    debug!(
        page = page_no,
        width = image.width(),
        height = image.height(),
        bytes = data.len(),
        "Rendered page"
    );

    Ok(PageImage {
        index: page_no,
        width: image.width(),
        height: image.height(),
        dpi,
        bytes: data.len() as u64,
        scratch: path,
    })
}

// ── pdfium backend ───────────────────────────────────────────────────────

/// [`Rasterizer`] backed by pdfium via `pdfium-render`.
///
/// The library is bound once in [`PdfiumRasterizer::new`]; clones share the
/// binding.
#[derive(Clone)]
pub struct PdfiumRasterizer {
    pdfium: Arc<Pdfium>,
    library: Option<PathBuf>,
}

impl fmt::Debug for PdfiumRasterizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfiumRasterizer")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

impl PdfiumRasterizer {
    /// Resolve and bind the pdfium library.
    ///
    /// Lookup order: `library` (a file, or a directory holding the platform
    /// library), then `PDFIUM_LIB_PATH`, then the system loader path.
    pub fn new(library: Option<&Path>) -> Result<Self, JobError> {
        let library = library
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from))
            .map(|p| {
                if p.is_dir() {
                    p.join(Pdfium::pdfium_platform_library_name())
                } else {
                    p
                }
            });

        let bindings = match &library {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| JobError::PdfiumBindingFailed(format!("{e:?}")))?;

        info!(
            library = %library
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<system>".into()),
            "pdfium bound"
        );
        Ok(Self {
            pdfium: Arc::new(Pdfium::new(bindings)),
            library,
        })
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn with_document(
        &self,
        pdf_path: &Path,
        visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), RasterError> {
        let document = self
            .pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| RasterError::new(format!("{e:?}")))?;
        info!("PDF loaded: {} pages", document.pages().len());

        visit(&PdfiumDocument { document });
        Ok(())
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumDocument<'a> {
    fn page(&self, index: usize) -> Result<PdfPage<'a>, RasterError> {
        let index = u16::try_from(index)
            .map_err(|_| RasterError::new(format!("page index {index} exceeds pdfium's range")))?;
        self.document
            .pages()
            .get(index)
            .map_err(|e| RasterError::new(format!("{e:?}")))
    }
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, index: usize) -> Result<(f64, f64), RasterError> {
        let page = self.page(index)?;
        Ok((f64::from(page.width().value), f64::from(page.height().value)))
    }

    fn render_page(
        &self,
        index: usize,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, RasterError> {
        let page = self.page(index)?;
        let to_px = |v: u32| {
            i32::try_from(v).map_err(|_| RasterError::new(format!("{v} px exceeds pdfium's range")))
        };

        let config = PdfRenderConfig::new()
            .set_target_width(to_px(width)?)
            .set_target_height(to_px(height)?)
            .set_clear_color(PdfColor::new(255, 255, 255, 0))
            .render_form_data(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| RasterError::new(format!("{e:?}")))?;

        Ok(bitmap.as_image().to_rgba8())
    }
}
