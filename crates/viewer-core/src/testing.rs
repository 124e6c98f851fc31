//! Shared helpers for unit tests.

use crate::{DocumentHandle, DocumentLoader, PanelEvent, SharedEngine};
use pdf_engine::{
    fixtures, DocumentHandle as RawHandle, LopdfEngine, OpenSource, PageSize, PdfEngine,
    PdfEngineError, RenderRequest, RgbaImage,
};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub(crate) fn shared_engine() -> SharedEngine<LopdfEngine> {
    crate::shared(LopdfEngine::new())
}

pub(crate) fn write_pdf(dir: &Path, name: &str, pages: usize) -> PathBuf {
    fixtures::write_pdf(dir, name, pages).expect("fixture PDF should be written")
}

/// Write a `pages`-page PDF to a temp dir and open it.
pub(crate) async fn open<E: PdfEngine + Send + 'static>(
    engine: SharedEngine<E>,
    pages: usize,
) -> (TempDir, DocumentHandle, DocumentLoader<E>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_pdf(dir.path(), "doc.pdf", pages);
    let mut loader = DocumentLoader::new(engine);
    let handle = loader.open(&path).await.expect("fixture should open");
    (dir, handle, loader)
}

/// Everything currently queued on `rx`.
pub(crate) fn drain(rx: &mut UnboundedReceiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Lopdf engine whose rasterization fails on one page.
#[derive(Debug, Default)]
pub(crate) struct FlakyEngine {
    inner: LopdfEngine,
    fail_page: u32,
}

impl FlakyEngine {
    /// Fail every render of the 1-based `page`.
    pub(crate) fn failing_on(page: u32) -> Self {
        Self { inner: LopdfEngine::new(), fail_page: page }
    }
}

impl PdfEngine for FlakyEngine {
    fn open(&mut self, source: OpenSource) -> Result<RawHandle, PdfEngineError> {
        self.inner.open(source)
    }

    fn page_count(&self, handle: RawHandle) -> Result<u32, PdfEngineError> {
        self.inner.page_count(handle)
    }

    fn page_size(&self, handle: RawHandle, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.inner.page_size(handle, page_index)
    }

    fn render_rows(
        &self,
        handle: RawHandle,
        request: RenderRequest,
        target: &mut RgbaImage,
        rows: Range<u32>,
    ) -> Result<(), PdfEngineError> {
        if request.page_index + 1 == self.fail_page {
            return Err(PdfEngineError::Backend("rasterizer crashed".to_owned()));
        }
        self.inner.render_rows(handle, request, target, rows)
    }

    fn close(&mut self, handle: RawHandle) -> Result<(), PdfEngineError> {
        self.inner.close(handle)
    }
}
