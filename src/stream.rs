//! Demand-driven page stream.
//!
//! pdfium is blocking, so the document is opened and rendered on a
//! `spawn_blocking` worker. The worker renders one page per request: page
//! *i + 1* is only rendered after the consumer asks for it, which keeps
//! rendering and publishing strictly sequential and bounds memory to a single
//! encoded page. Dropping the [`PageStream`] closes the request channel and
//! the worker stops without rendering further pages.
//!
//! ```text
//! consumer                worker (spawn_blocking)
//!    │  open ───────────────▶ with_document
//!    │ ◀──────────── Ok(page_count) / Err(InvalidDocument)
//!    │  next: demand ───────▶ convert_page(i)
//!    │ ◀──────────── PageImage | PageRenderError
//! ```

use crate::error::JobError;
use crate::output::PageImage;
use crate::pipeline::render::{self, RasterDocument, Rasterizer};
use crate::pipeline::workspace::ScratchAllocator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Lazy, finite, ordered sequence of rendered pages for one document.
#[derive(Debug)]
pub struct PageStream {
    page_count: usize,
    emitted: usize,
    demand: Option<mpsc::Sender<()>>,
    pages: mpsc::Receiver<Result<PageImage, JobError>>,
}

impl PageStream {
    /// Open `pdf_path` on a blocking worker.
    ///
    /// Fails with [`JobError::InvalidDocument`] when the file cannot be
    /// opened or has no pages; no page is rendered in that case.
    pub async fn open(
        rasterizer: Arc<dyn Rasterizer>,
        pdf_path: PathBuf,
        source_name: String,
        dpi: u32,
        scratch: ScratchAllocator,
    ) -> Result<Self, JobError> {
        let (opened_tx, opened_rx) = oneshot::channel::<Result<usize, JobError>>();
        let (demand_tx, mut demand_rx) = mpsc::channel::<()>(1);
        let (pages_tx, pages_rx) = mpsc::channel(1);

        let name = source_name.clone();
        tokio::task::spawn_blocking(move || {
            let mut opened_tx = Some(opened_tx);
            let invalid = |detail: String| JobError::InvalidDocument {
                name: name.clone(),
                detail,
            };

            let result = rasterizer.with_document(&pdf_path, &mut |doc: &dyn RasterDocument| {
                let count = doc.page_count();
                let Some(tx) = opened_tx.take() else { return };
                if count == 0 {
                    let _ = tx.send(Err(invalid("document has no pages".into())));
                    return;
                }
                if tx.send(Ok(count)).is_err() {
                    return;
                }

                for index in 0..count {
                    if demand_rx.blocking_recv().is_none() {
                        debug!(rendered = index, "Page stream dropped; stopping render worker");
                        return;
                    }
                    let page = render::convert_page(doc, index, dpi, &scratch);
                    let failed = page.is_err();
                    if pages_tx.blocking_send(page).is_err() || failed {
                        return;
                    }
                }
            });

            if let Err(e) = result {
                if let Some(tx) = opened_tx.take() {
                    let _ = tx.send(Err(invalid(e.to_string())));
                }
            }
        });

        let page_count = match opened_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(JobError::Internal(
                    "render worker exited before opening the document".into(),
                ))
            }
        };
        info!(source = %source_name, pages = page_count, "Document opened");

        Ok(Self {
            page_count,
            emitted: 0,
            demand: Some(demand_tx),
            pages: pages_rx,
        })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Render and return the next page, or `None` after the last page or
    /// after an error has been returned.
    pub async fn next(&mut self) -> Option<Result<PageImage, JobError>> {
        let demand = self.demand.as_ref()?;
        if self.emitted == self.page_count {
            self.demand = None;
            return None;
        }

        if demand.send(()).await.is_err() {
            self.demand = None;
            return Some(Err(JobError::Internal(
                "render worker stopped before the last page".into(),
            )));
        }

        match self.pages.recv().await {
            Some(Ok(page)) => {
                self.emitted += 1;
                Some(Ok(page))
            }
            Some(Err(e)) => {
                self.demand = None;
                Some(Err(e))
            }
            None => {
                self.demand = None;
                Some(Err(JobError::Internal(
                    "render worker stopped before the last page".into(),
                )))
            }
        }
    }
}
