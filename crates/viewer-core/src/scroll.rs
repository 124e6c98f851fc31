//! Relaying scroll offsets between the two panels without feedback loops.
//!
//! Every user scroll is stamped with its origin panel and that panel's next
//! sequence number. The sibling applies the offset programmatically and
//! reports the resulting scroll back tagged with the same stamp, which the
//! synchronizer recognises as an echo because it issued that sequence number
//! itself. No timing window is involved.

use doc_model::PanelSide;
use serde::Serialize;

/// Origin and sequence number of a relayed scroll offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScrollStamp {
    pub origin: PanelSide,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollCause {
    User,
    /// The scroll was caused by applying a relayed update.
    Programmatic(ScrollStamp),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollEvent {
    pub panel: PanelSide,
    pub offset: f32,
    pub cause: ScrollCause,
}

/// Offset to apply to `target` on behalf of `stamp.origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScrollUpdate {
    pub target: PanelSide,
    pub offset: f32,
    pub stamp: ScrollStamp,
}

#[derive(Debug, Default)]
pub struct ScrollSynchronizer {
    left_seq: u64,
    right_seq: u64,
}

impl ScrollSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sequence number issued for scrolls originating on `side`.
    pub fn last_seq(&self, side: PanelSide) -> u64 {
        match side {
            PanelSide::Left => self.left_seq,
            PanelSide::Right => self.right_seq,
        }
    }

    /// Route one scroll event. Only user scrolls produce an update.
    pub fn on_scroll(&mut self, event: ScrollEvent) -> Option<ScrollUpdate> {
        match event.cause {
            ScrollCause::User => {
                let seq = self.next_seq(event.panel);
                let stamp = ScrollStamp { origin: event.panel, seq };
                tracing::trace!(
                    origin = %event.panel,
                    seq,
                    offset = event.offset,
                    "relaying scroll"
                );
                Some(ScrollUpdate {
                    target: event.panel.sibling(),
                    offset: event.offset.max(0.0),
                    stamp,
                })
            }
            ScrollCause::Programmatic(stamp) if stamp.origin == event.panel => {
                tracing::warn!(
                    panel = %event.panel,
                    seq = stamp.seq,
                    "panel reported its own relayed scroll"
                );
                None
            }
            ScrollCause::Programmatic(stamp) if stamp.seq <= self.last_seq(stamp.origin) => {
                tracing::trace!(panel = %event.panel, seq = stamp.seq, "echo suppressed");
                None
            }
            ScrollCause::Programmatic(stamp) => {
                tracing::warn!(
                    panel = %event.panel,
                    origin = %stamp.origin,
                    seq = stamp.seq,
                    "ignoring scroll with a sequence number that was never issued"
                );
                None
            }
        }
    }

    fn next_seq(&mut self, side: PanelSide) -> u64 {
        let seq = match side {
            PanelSide::Left => &mut self.left_seq,
            PanelSide::Right => &mut self.right_seq,
        };
        *seq += 1;
        *seq
    }
}
