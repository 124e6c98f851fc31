//! Dual-pane document viewing: loading, incremental page rendering, and
//! scroll synchronization between two panels.

mod controller;
mod error;
mod events;
mod layout;
mod loader;
mod panel;
mod pipeline;
mod renderer;
mod scroll;
mod surface;

#[cfg(test)]
mod testing;

pub use controller::{DualPaneController, LoadResult, OpenReport};
pub use error::{ErrorKind, LoadError, RenderError};
pub use events::{EventSink, PanelEvent, PanelEventKind};
pub use layout::PageLayout;
pub use loader::{DocumentHandle, DocumentLoader};
pub use panel::Panel;
pub use pipeline::{EpochPhase, RenderGuard, RenderPipeline};
pub use renderer::{PageKey, PageRenderer, RenderRequest, RenderTask, RenderedPage, TaskState};
pub use scroll::{ScrollCause, ScrollEvent, ScrollStamp, ScrollSynchronizer, ScrollUpdate};
pub use surface::SurfaceSet;

pub use twinpage_scheduler::{CancellationToken, Epoch};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Engine shared by the loader and renderer of one panel.
pub type SharedEngine<E> = Arc<Mutex<E>>;

/// Wrap an engine for sharing.
pub fn shared<E>(engine: E) -> SharedEngine<E> {
    Arc::new(Mutex::new(engine))
}

pub(crate) fn lock<E>(engine: &SharedEngine<E>) -> MutexGuard<'_, E> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}
