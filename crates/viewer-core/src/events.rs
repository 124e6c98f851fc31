//! Panel notifications delivered to the host.

use crate::ErrorKind;
use doc_model::PanelSide;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use twinpage_scheduler::Epoch;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelEvent {
    pub side: PanelSide,
    pub epoch: Option<Epoch>,
    #[serde(flatten)]
    pub kind: PanelEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PanelEventKind {
    Loaded { page_count: u32 },
    PageRendered { page: u32 },
    /// Rendering of `page` stopped because its epoch was cancelled.
    RenderCancelled { page: u32 },
    Error { kind: ErrorKind, message: String },
    ScrollOffsetChanged { offset: f32 },
}

/// Sending half of a panel's event stream.
///
/// Events tagged with an epoch older than the floor are dropped, so once a
/// panel has moved to a new document nothing from the previous one reaches
/// the host.
#[derive(Debug, Clone)]
pub struct EventSink {
    side: PanelSide,
    tx: UnboundedSender<PanelEvent>,
    floor: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new(side: PanelSide, tx: UnboundedSender<PanelEvent>) -> Self {
        Self { side, tx, floor: Arc::new(AtomicU64::new(0)) }
    }

    pub fn side(&self) -> PanelSide {
        self.side
    }

    pub fn emit(&self, epoch: Option<Epoch>, kind: PanelEventKind) {
        if let Some(epoch) = epoch {
            if epoch.raw() < self.floor.load(Ordering::Acquire) {
                tracing::debug!(side = %self.side, %epoch, "dropping stale event");
                return;
            }
        }

        // The host may have dropped its receiver; panels keep working headless.
        let _ = self.tx.send(PanelEvent { side: self.side, epoch, kind });
    }

    /// Drop every later event from epochs before `epoch`.
    pub fn advance_floor(&self, epoch: Epoch) {
        self.floor.fetch_max(epoch.raw(), Ordering::AcqRel);
    }
}
