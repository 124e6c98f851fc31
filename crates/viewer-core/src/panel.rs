use crate::events::{EventSink, PanelEventKind};
use crate::layout::PageLayout;
use crate::pipeline::{EpochPhase, RenderGuard, RenderPipeline};
use crate::scroll::{ScrollCause, ScrollEvent, ScrollStamp, ScrollUpdate};
use crate::{DocumentHandle, DocumentLoader, ErrorKind, LoadError, SharedEngine, SurfaceSet};
use doc_model::{Alignment, PanelSide, ViewerPreferences};
use pdf_engine::{PdfEngine, RgbaImage};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use twinpage_scheduler::Epoch;

/// Programmatic offsets remembered while waiting for their echoes.
const MAX_PENDING_ECHOES: usize = 32;

/// One side of the dual view.
///
/// Owns the loader and pipeline of its slot, the surfaces its pages are
/// rasterized into, and its scroll position.
pub struct Panel<E> {
    side: PanelSide,
    alignment: Alignment,
    loader: DocumentLoader<E>,
    pipeline: RenderPipeline<E>,
    surfaces: SurfaceSet,
    events: EventSink,
    document: Option<Arc<DocumentHandle>>,
    guard: Option<RenderGuard>,
    layout: PageLayout,
    page_gap: f32,
    viewport_height: f32,
    epsilon: f32,
    offset: f32,
    pending_echoes: VecDeque<(ScrollStamp, f32)>,
    last_applied_seq: u64,
}

impl<E: PdfEngine + Send + 'static> Panel<E> {
    pub fn new(
        side: PanelSide,
        engine: SharedEngine<E>,
        prefs: &ViewerPreferences,
        events: EventSink,
    ) -> Self {
        let prefs = prefs.sanitized();
        Self {
            side,
            alignment: Alignment::for_side(side, prefs.facing),
            loader: DocumentLoader::new(engine.clone()),
            pipeline: RenderPipeline::new(engine, prefs.render_scale, prefs.band_rows),
            surfaces: SurfaceSet::new(),
            events,
            document: None,
            guard: None,
            layout: PageLayout::default(),
            page_gap: prefs.page_gap_px,
            viewport_height: prefs.viewport_height_px,
            epsilon: prefs.scroll_epsilon,
            offset: 0.0,
            pending_echoes: VecDeque::new(),
            last_applied_seq: 0,
        }
    }

    /// Replace the displayed document.
    ///
    /// The running render is cancelled and drained and the old surfaces are
    /// discarded before the new path is opened, so nothing from the previous
    /// document is drawn once the open starts. A load failure is reported on
    /// this panel only.
    pub async fn set_document(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<DocumentHandle>, LoadError> {
        let path = path.as_ref();
        self.teardown().await;
        self.pipeline.begin_loading();

        match self.loader.open(path).await {
            Ok(handle) => {
                let epoch = handle.epoch();
                self.surfaces.reset(Some(epoch));
                self.events.advance_floor(epoch);
                self.layout = PageLayout::from_page_sizes(
                    handle.page_sizes(),
                    self.pipeline.scale(),
                    self.page_gap,
                );
                self.events
                    .emit(Some(epoch), PanelEventKind::Loaded { page_count: handle.page_count() });

                let handle = Arc::new(handle);
                self.guard = Some(RenderGuard::spawn(
                    self.pipeline.clone(),
                    handle.clone(),
                    self.surfaces.clone(),
                    self.events.clone(),
                ));
                self.document = Some(handle.clone());
                Ok(handle)
            }
            Err(err) => {
                let epoch = self.loader.epoch();
                if let Some(epoch) = epoch {
                    self.events.advance_floor(epoch);
                }
                tracing::warn!(
                    side = %self.side,
                    path = %path.display(),
                    error = %err,
                    "load failed"
                );
                self.pipeline.fail_load(err.to_string());
                self.events.emit(
                    epoch,
                    PanelEventKind::Error { kind: ErrorKind::Load, message: err.to_string() },
                );
                Err(err)
            }
        }
    }

    /// Move to a sibling's offset. Returns the offset actually applied.
    ///
    /// Updates stamped with this panel's own side, addressed to the other
    /// panel, or older than the last applied one are rejected.
    pub fn apply_programmatic(&mut self, update: ScrollUpdate) -> Option<f32> {
        if update.target != self.side || update.stamp.origin == self.side {
            tracing::warn!(
                side = %self.side,
                origin = %update.stamp.origin,
                "rejecting misrouted scroll update"
            );
            return None;
        }
        if update.stamp.seq <= self.last_applied_seq {
            tracing::debug!(
                side = %self.side,
                seq = update.stamp.seq,
                "dropping stale scroll update"
            );
            return None;
        }

        self.last_applied_seq = update.stamp.seq;
        self.offset = self.clamp(update.offset);
        if self.pending_echoes.len() == MAX_PENDING_ECHOES {
            self.pending_echoes.pop_front();
        }
        self.pending_echoes.push_back((update.stamp, self.offset));
        self.events.emit(self.epoch(), PanelEventKind::ScrollOffsetChanged { offset: self.offset });
        Some(self.offset)
    }

    /// Classify a scroll position reported by the host.
    ///
    /// A report within the scroll epsilon of any programmatic offset applied
    /// since the last user scroll is that update's echo, even when it arrives
    /// after newer updates. An echo leaves the offset at the latest applied
    /// position. Anything else is user input and forgets the pending echoes.
    pub fn report_scroll(&mut self, raw_offset: f32) -> ScrollEvent {
        let offset = self.clamp(raw_offset);
        let echo = self
            .pending_echoes
            .iter()
            .rev()
            .find(|(_, applied)| (offset - applied).abs() <= self.epsilon);

        let cause = match echo {
            Some((stamp, _)) => ScrollCause::Programmatic(*stamp),
            None => {
                self.pending_echoes.clear();
                self.offset = offset;
                ScrollCause::User
            }
        };

        ScrollEvent { panel: self.side, offset, cause }
    }

    /// Wait for the current render to settle.
    pub async fn wait_idle(&mut self) -> EpochPhase {
        match self.guard.as_mut() {
            Some(guard) => guard.wait().await,
            None => self.pipeline.phase(),
        }
    }

    /// Stop rendering and release the document.
    pub async fn dispose(&mut self) {
        self.teardown().await;
        tracing::debug!(side = %self.side, "panel disposed");
    }

    async fn teardown(&mut self) {
        if let Some(guard) = self.guard.take() {
            let epoch = guard.epoch();
            let phase = guard.release().await;
            tracing::debug!(side = %self.side, %epoch, ?phase, "render drained");
        }

        self.document = None;
        self.surfaces.reset(None);
        self.loader.close();
        self.layout = PageLayout::default();
        self.offset = 0.0;
        self.pending_echoes.clear();
    }

    fn clamp(&self, offset: f32) -> f32 {
        if offset.is_nan() {
            return 0.0;
        }
        offset.clamp(0.0, self.max_scroll_offset())
    }
}

impl<E> Panel<E> {
    pub fn side(&self) -> PanelSide {
        self.side
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = alignment;
    }

    pub fn document(&self) -> Option<&Arc<DocumentHandle>> {
        self.document.as_ref()
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.document.as_ref().map(|document| document.epoch())
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn max_scroll_offset(&self) -> f32 {
        self.layout.max_scroll_offset(self.viewport_height)
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Page under the middle of the viewport.
    pub fn current_page(&self) -> Option<u32> {
        self.layout.current_page(self.offset, self.viewport_height)
    }

    pub fn surfaces(&self) -> &SurfaceSet {
        &self.surfaces
    }

    pub fn pipeline(&self) -> &RenderPipeline<E> {
        &self.pipeline
    }
}

impl<E: PdfEngine> Panel<E> {
    pub fn phase(&self) -> EpochPhase {
        self.pipeline.phase()
    }

    pub fn rendered_pages(&self) -> Vec<u32> {
        self.pipeline.completed_pages()
    }

    /// Copies of the rasters of every completed page.
    pub fn snapshot(&self) -> BTreeMap<u32, RgbaImage> {
        self.rendered_pages()
            .into_iter()
            .filter_map(|page| self.surfaces.page(page).map(|image| (page, image)))
            .collect()
    }
}
