//! Raster surfaces owned by one panel.

use pdf_engine::{PdfEngineError, RgbaImage, Viewport};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use twinpage_scheduler::{CancellationToken, Epoch};

/// Page surfaces of one panel, bound to a single epoch at a time.
///
/// Writes are accepted only for the bound epoch and only while the writer's
/// token is live, both checked under the same lock the write happens in.
/// Rebinding the set to another epoch discards every surface.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSet {
    inner: Arc<Mutex<Surfaces>>,
}

#[derive(Debug, Default)]
struct Surfaces {
    epoch: Option<Epoch>,
    pages: BTreeMap<u32, RgbaImage>,
}

/// Outcome of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SurfaceWrite {
    Applied,
    Rejected,
}

impl SurfaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all surfaces and bind the set to `epoch`.
    pub fn reset(&self, epoch: Option<Epoch>) {
        let mut surfaces = self.lock();
        surfaces.epoch = epoch;
        surfaces.pages.clear();
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.lock().epoch
    }

    /// Allocate a blank surface for `page` sized to `viewport`.
    pub(crate) fn prepare(
        &self,
        epoch: Epoch,
        page: u32,
        viewport: Viewport,
        token: &CancellationToken,
    ) -> SurfaceWrite {
        let mut surfaces = self.lock();
        if surfaces.epoch != Some(epoch) || token.is_cancelled() {
            return SurfaceWrite::Rejected;
        }

        surfaces.pages.insert(page, RgbaImage::new(viewport.width_px, viewport.height_px));
        SurfaceWrite::Applied
    }

    /// Run `draw` against the surface of `page` if the epoch and token allow it.
    pub(crate) fn write<F>(
        &self,
        epoch: Epoch,
        page: u32,
        token: &CancellationToken,
        draw: F,
    ) -> Result<SurfaceWrite, PdfEngineError>
    where
        F: FnOnce(&mut RgbaImage) -> Result<(), PdfEngineError>,
    {
        let mut surfaces = self.lock();
        if surfaces.epoch != Some(epoch) || token.is_cancelled() {
            return Ok(SurfaceWrite::Rejected);
        }

        match surfaces.pages.get_mut(&page) {
            Some(image) => draw(image).map(|()| SurfaceWrite::Applied),
            None => Ok(SurfaceWrite::Rejected),
        }
    }

    /// Copy of the surface for `page`.
    pub fn page(&self, page: u32) -> Option<RgbaImage> {
        self.lock().pages.get(&page).cloned()
    }

    pub fn dimensions(&self, page: u32) -> Option<(u32, u32)> {
        self.lock().pages.get(&page).map(|image| image.dimensions())
    }

    /// Pages that have a surface, in increasing order.
    pub fn pages(&self) -> Vec<u32> {
        self.lock().pages.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pages.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Surfaces> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
