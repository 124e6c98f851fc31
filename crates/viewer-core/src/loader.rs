//! Opening documents for one panel slot.

use crate::{lock, LoadError, SharedEngine};
use pdf_engine::{OpenSource, PageSize, PdfEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use twinpage_scheduler::{Epoch, EpochClock};

/// A fully opened document, valid for exactly one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentHandle {
    path: PathBuf,
    epoch: Epoch,
    page_sizes: Vec<PageSize>,
    raw: pdf_engine::DocumentHandle,
}

impl DocumentHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    /// Size of a 1-based page.
    pub fn page_size(&self, page: u32) -> Option<PageSize> {
        let index = page.checked_sub(1)?;
        self.page_sizes.get(index as usize).copied()
    }

    pub fn page_sizes(&self) -> &[PageSize] {
        &self.page_sizes
    }

    pub(crate) fn raw(&self) -> pdf_engine::DocumentHandle {
        self.raw
    }
}

/// Opens documents into one logical slot.
///
/// Each `open` starts a new epoch and closes the engine handle of the previous
/// one, so at most one handle per slot is ever live.
pub struct DocumentLoader<E> {
    engine: SharedEngine<E>,
    clock: EpochClock,
    current: Option<(Epoch, pdf_engine::DocumentHandle)>,
}

impl<E: PdfEngine + Send + 'static> DocumentLoader<E> {
    pub fn new(engine: SharedEngine<E>) -> Self {
        Self { engine, clock: EpochClock::new(), current: None }
    }

    /// Open `path`, returning a handle for a freshly issued epoch.
    ///
    /// Either a complete handle is returned or nothing: on failure the slot is
    /// left without a live handle. Parsing runs on the blocking pool and holds
    /// only this loader's engine.
    pub async fn open(&mut self, path: impl AsRef<Path>) -> Result<DocumentHandle, LoadError> {
        let path = path.as_ref();
        let epoch = self.clock.advance();
        self.close();

        tracing::info!(path = %path.display(), %epoch, "opening document");

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| LoadError::Unreadable { path: path.to_path_buf(), source })?;

        let engine = Arc::clone(&self.engine);
        let owned = path.to_path_buf();
        let (raw, page_sizes) = tokio::task::spawn_blocking(move || parse(&engine, &owned, bytes))
            .await
            .map_err(|err| LoadError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("parser task failed: {err}"),
            })??;

        self.current = Some((epoch, raw));
        tracing::info!(path = %path.display(), %epoch, pages = page_sizes.len(), "document opened");

        Ok(DocumentHandle { path: path.to_path_buf(), epoch, page_sizes, raw })
    }

    /// Whether `handle` came from the most recent `open` and is still live.
    pub fn is_current(&self, handle: &DocumentHandle) -> bool {
        self.current == Some((handle.epoch, handle.raw))
    }

    /// Epoch of the most recent `open`, successful or not.
    pub fn epoch(&self) -> Option<Epoch> {
        self.clock.current()
    }

    /// Release the live handle, if any.
    pub fn close(&mut self) {
        if let Some((epoch, raw)) = self.current.take() {
            if let Err(err) = lock(&self.engine).close(raw) {
                tracing::warn!(%epoch, error = %err, "failed to close document");
            }
        }
    }
}

/// Open `bytes` in `engine` and read every page size, closing the engine
/// handle again if any size is missing.
fn parse<E: PdfEngine>(
    engine: &SharedEngine<E>,
    path: &Path,
    bytes: Vec<u8>,
) -> Result<(pdf_engine::DocumentHandle, Vec<PageSize>), LoadError> {
    let mut engine = lock(engine);
    let raw =
        engine.open(OpenSource::Bytes(bytes)).map_err(|err| LoadError::from_engine(path, err))?;

    let sizes = engine.page_count(raw).and_then(|count| {
        (0..count).map(|index| engine.page_size(raw, index)).collect::<Result<Vec<_>, _>>()
    });

    match sizes {
        Ok(sizes) if !sizes.is_empty() => Ok((raw, sizes)),
        Ok(_) => {
            let _ = engine.close(raw);
            Err(LoadError::Corrupt {
                path: path.to_path_buf(),
                reason: "document has no pages".to_owned(),
            })
        }
        Err(err) => {
            let _ = engine.close(raw);
            Err(LoadError::from_engine(path, err))
        }
    }
}
