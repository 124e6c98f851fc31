//! Rasterizing single pages.

use crate::surface::SurfaceWrite;
use crate::{lock, DocumentHandle, RenderError, SharedEngine, SurfaceSet};
use pdf_engine::{PdfEngine, PdfEngineError, Viewport};
use twinpage_scheduler::{CancellationToken, Epoch};

/// Identifies one page of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub epoch: Epoch,
    pub page: u32,
}

/// Everything needed to rasterize one page.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub handle: &'a DocumentHandle,
    /// 1-based page index.
    pub page: u32,
    pub scale: f32,
    pub target: &'a SurfaceSet,
    pub cancel: &'a CancellationToken,
}

impl RenderRequest<'_> {
    pub fn key(&self) -> PageKey {
        PageKey { epoch: self.handle.epoch(), page: self.page }
    }
}

/// A page that finished rasterizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedPage {
    pub key: PageKey,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

/// Lifecycle of the render of one `(epoch, page)` pair.
#[derive(Debug)]
pub struct RenderTask {
    key: PageKey,
    state: TaskState,
    token: CancellationToken,
}

impl RenderTask {
    pub fn new(key: PageKey, token: CancellationToken) -> Self {
        Self { key, state: TaskState::Pending, token }
    }

    pub fn key(&self) -> PageKey {
        self.key
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Cancel the task. A settled task is left as it is.
    ///
    /// Returns `true` if the task was still pending or running.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            TaskState::Completed | TaskState::Cancelled => false,
            TaskState::Pending | TaskState::Running => {
                self.token.cancel();
                self.state = TaskState::Cancelled;
                true
            }
        }
    }

    pub(crate) fn start(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::Running;
        }
    }

    pub(crate) fn settle(&mut self, result: &Result<RenderedPage, RenderError>) {
        self.state = match result {
            Ok(_) => TaskState::Completed,
            Err(RenderError::Cancelled) => TaskState::Cancelled,
            // A failed page may be rendered again by an explicit reopen.
            Err(RenderError::Other { .. }) => TaskState::Pending,
        };
    }
}

/// Rasterizes pages in horizontal bands, yielding between bands.
pub struct PageRenderer<E> {
    engine: SharedEngine<E>,
    band_rows: u32,
}

impl<E> Clone for PageRenderer<E> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), band_rows: self.band_rows }
    }
}

impl<E: PdfEngine> PageRenderer<E> {
    pub fn new(engine: SharedEngine<E>, band_rows: u32) -> Self {
        Self { engine, band_rows: band_rows.max(1) }
    }

    /// Rasterize one page into its surface in `request.target`.
    ///
    /// The token is checked before the surface is allocated and before each
    /// band; once it is observed cancelled no further pixels are written and
    /// the call resolves to [`RenderError::Cancelled`].
    pub async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage, RenderError> {
        let RenderRequest { handle, page, scale, target, cancel } = request;
        let key = request.key();

        if page == 0 || page > handle.page_count() {
            return Err(RenderError::Other {
                page,
                message: format!("page out of range (page_count={})", handle.page_count()),
            });
        }

        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let engine_request = pdf_engine::RenderRequest { page_index: page - 1, scale };
        let viewport = lock(&self.engine)
            .viewport(handle.raw(), engine_request)
            .map_err(|err| other(page, err))?;

        if target.prepare(key.epoch, page, viewport, cancel) == SurfaceWrite::Rejected {
            return Err(RenderError::Cancelled);
        }

        let mut row = 0;
        while row < viewport.height_px {
            let end = row.saturating_add(self.band_rows).min(viewport.height_px);

            let written = target
                .write(key.epoch, page, cancel, |image| {
                    lock(&self.engine).render_rows(handle.raw(), engine_request, image, row..end)
                })
                .map_err(|err| other(page, err))?;

            if written == SurfaceWrite::Rejected {
                tracing::debug!(epoch = %key.epoch, page, row, "render cancelled mid-page");
                return Err(RenderError::Cancelled);
            }

            row = end;
            tokio::task::yield_now().await;
        }

        Ok(RenderedPage { key, viewport })
    }
}

fn other(page: u32, err: PdfEngineError) -> RenderError {
    RenderError::Other { page, message: err.to_string() }
}
