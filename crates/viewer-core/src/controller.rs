use crate::events::{EventSink, PanelEvent};
use crate::panel::Panel;
use crate::pipeline::EpochPhase;
use crate::scroll::{ScrollSynchronizer, ScrollUpdate};
use crate::{DocumentHandle, LoadError};
use doc_model::{Alignment, PanelSide, ViewerPreferences};
use pdf_engine::{PdfEngine, RgbaImage};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub type LoadResult = Result<Arc<DocumentHandle>, LoadError>;

/// Result of opening a document pair. Each side succeeds or fails on its own.
#[derive(Debug)]
pub struct OpenReport {
    pub left: LoadResult,
    pub right: LoadResult,
}

impl OpenReport {
    pub fn side(&self, side: PanelSide) -> &LoadResult {
        match side {
            PanelSide::Left => &self.left,
            PanelSide::Right => &self.right,
        }
    }

    pub fn both_failed(&self) -> bool {
        self.left.is_err() && self.right.is_err()
    }
}

/// Two panels whose scroll positions follow each other.
pub struct DualPaneController<E> {
    left: Panel<E>,
    right: Panel<E>,
    sync: ScrollSynchronizer,
    events: Option<UnboundedReceiver<PanelEvent>>,
}

impl<E: PdfEngine + Send + 'static> DualPaneController<E> {
    /// Each panel gets its own engine, so parsing or rasterizing one document
    /// never waits on the other panel's engine lock.
    pub fn new(left: E, right: E, prefs: &ViewerPreferences) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let left = Panel::new(
            PanelSide::Left,
            crate::shared(left),
            prefs,
            EventSink::new(PanelSide::Left, tx.clone()),
        );
        let right = Panel::new(
            PanelSide::Right,
            crate::shared(right),
            prefs,
            EventSink::new(PanelSide::Right, tx),
        );

        Self { left, right, sync: ScrollSynchronizer::new(), events: Some(rx) }
    }

    /// Load a document into each panel. The two loads proceed independently.
    pub async fn open(&mut self, left: impl AsRef<Path>, right: impl AsRef<Path>) -> OpenReport {
        let (left, right) = tokio::join!(
            self.left.set_document(left.as_ref()),
            self.right.set_document(right.as_ref())
        );
        OpenReport { left, right }
    }

    pub async fn set_document(&mut self, side: PanelSide, path: impl AsRef<Path>) -> LoadResult {
        self.panel_mut(side).set_document(path).await
    }

    /// Feed a scroll position reported by the host for `side`.
    ///
    /// A user scroll is relayed to the sibling and the sibling's echo is
    /// classified and suppressed before this returns. Returns the relayed
    /// update, if any.
    pub fn scroll(&mut self, side: PanelSide, offset: f32) -> Option<ScrollUpdate> {
        let event = self.panel_mut(side).report_scroll(offset);
        let update = self.sync.on_scroll(event)?;

        let sibling = self.panel_mut(update.target);
        if let Some(applied) = sibling.apply_programmatic(update) {
            let echo = sibling.report_scroll(applied);
            if let Some(bounced) = self.sync.on_scroll(echo) {
                tracing::warn!(
                    side = %bounced.target,
                    seq = bounced.stamp.seq,
                    "scroll echo escaped suppression"
                );
            }
        }

        Some(update)
    }

    pub async fn wait_idle(&mut self) -> (EpochPhase, EpochPhase) {
        tokio::join!(self.left.wait_idle(), self.right.wait_idle())
    }

    /// Stop both panels. No pixels are written once this returns.
    pub async fn dispose(&mut self) {
        tokio::join!(self.left.dispose(), self.right.dispose());
        tracing::info!("controller disposed");
    }
}

impl<E> DualPaneController<E> {
    pub fn panel(&self, side: PanelSide) -> &Panel<E> {
        match side {
            PanelSide::Left => &self.left,
            PanelSide::Right => &self.right,
        }
    }

    fn panel_mut(&mut self, side: PanelSide) -> &mut Panel<E> {
        match side {
            PanelSide::Left => &mut self.left,
            PanelSide::Right => &mut self.right,
        }
    }

    /// Take the event stream of both panels. Only the first call gets it.
    pub fn subscribe(&mut self) -> Option<UnboundedReceiver<PanelEvent>> {
        self.events.take()
    }

    pub fn set_alignment(&mut self, side: PanelSide, alignment: Alignment) {
        self.panel_mut(side).set_alignment(alignment);
    }

    /// Facing aligns the pages against the divider, otherwise both are centered.
    pub fn set_facing(&mut self, facing: bool) {
        for side in PanelSide::BOTH {
            self.panel_mut(side).set_alignment(Alignment::for_side(side, facing));
        }
    }

    pub fn alignment(&self, side: PanelSide) -> Alignment {
        self.panel(side).alignment()
    }

    pub fn offset(&self, side: PanelSide) -> f32 {
        self.panel(side).offset()
    }

    pub fn max_scroll_offset(&self, side: PanelSide) -> f32 {
        self.panel(side).max_scroll_offset()
    }
}

impl<E: PdfEngine> DualPaneController<E> {
    /// Rasters of the completed pages of `side`.
    pub fn surfaces(&self, side: PanelSide) -> BTreeMap<u32, RgbaImage> {
        self.panel(side).snapshot()
    }
}
