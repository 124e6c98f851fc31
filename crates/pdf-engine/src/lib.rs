use image::{ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

const BORDER: Rgba<u8> = Rgba([220, 220, 220, 255]);
const PDF_MAGIC: &[u8] = b"%PDF-";
const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Pixel dimensions of a page rasterized at a given scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width_px: u32,
    pub height_px: u32,
}

impl PageSize {
    pub fn viewport(self, scale: f32) -> Viewport {
        let scale = if scale <= 0.0 { 1.0 } else { scale };
        Viewport {
            width_px: (self.width_pt * scale).round().max(1.0) as u32,
            height_px: (self.height_pt * scale).round().max(1.0) as u32,
        }
    }
}

/// Zero-based page plus raster scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("not a PDF document")]
    NotPdf,
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("target surface is {actual_width}x{actual_height}, page needs {width}x{height}")]
    SurfaceMismatch { width: u32, height: u32, actual_width: u32, actual_height: u32 },
    #[error("rows {start}..{end} outside page height {height}")]
    RowsOutOfRange { start: u32, end: u32, height: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;

    /// Rasterize `rows` of a page into `target`.
    ///
    /// `target` must already be sized to the page viewport at `request.scale`.
    /// Only the requested rows are written, which lets callers render a page in
    /// bands and stop between them.
    fn render_rows(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
        target: &mut RgbaImage,
        rows: Range<u32>,
    ) -> Result<(), PdfEngineError>;

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;

    fn viewport(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<Viewport, PdfEngineError> {
        Ok(self.page_size(handle, request.page_index)?.viewport(request.scale))
    }

    /// Rasterize a whole page into a freshly allocated image.
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let viewport = self.viewport(handle, request)?;
        let mut image = RgbaImage::new(viewport.width_px, viewport.height_px);
        self.render_rows(handle, request, &mut image, 0..viewport.height_px)?;
        Ok(image)
    }
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
    paper: Rgba<u8>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(PdfEngineError::NotPdf);
        }

        if trailer_declares_encryption(bytes) {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            sizes.push(media_box(&doc, object_id)?.unwrap_or(LETTER));
        }

        if sizes.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

/// Whether the last classic `trailer` dictionary has an `/Encrypt` entry.
///
/// Runs before parsing so encrypted files are reported as such even when the
/// parser cannot read them. Files using xref streams have no `trailer` keyword
/// and are checked on the parsed trailer instead.
fn trailer_declares_encryption(bytes: &[u8]) -> bool {
    let Some(start) = rfind(bytes, b"trailer") else {
        return false;
    };
    let trailer = &bytes[start..];
    let end = find(trailer, b"startxref").unwrap_or(trailer.len());
    find(&trailer[..end], b"/Encrypt").is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

/// The page's MediaBox, inherited from the nearest `/Pages` ancestor when the
/// page itself has none.
fn media_box(doc: &Document, page_id: ObjectId) -> Result<Option<PageSize>, PdfEngineError> {
    let mut node = doc.get_dictionary(page_id)?;

    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(b"MediaBox") {
            return Ok(rectangle_size(doc, value));
        }

        let Ok(parent) = node.get(b"Parent").and_then(Object::as_reference) else {
            return Ok(None);
        };
        node = doc.get_dictionary(parent)?;
    }

    tracing::warn!(?page_id, "page tree too deep, using default page size");
    Ok(None)
}

fn rectangle_size(doc: &Document, value: &Object) -> Option<PageSize> {
    let array = resolve(doc, value)?.as_array().ok()?;
    let [x0, y0, x1, y1] = array.as_slice() else {
        return None;
    };
    let coord = |object: &Object| resolve(doc, object)?.as_float().ok();

    Some(PageSize {
        width_pt: (coord(x1)? - coord(x0)?).abs(),
        height_pt: (coord(y1)? - coord(y0)?).abs(),
    })
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Check that `target` fits the page viewport and `rows` lies inside it.
fn check_band(
    target: &RgbaImage,
    viewport: Viewport,
    rows: &Range<u32>,
) -> Result<(), PdfEngineError> {
    let Viewport { width_px: width, height_px: height } = viewport;

    if target.width() != width || target.height() != height {
        return Err(PdfEngineError::SurfaceMismatch {
            width,
            height,
            actual_width: target.width(),
            actual_height: target.height(),
        });
    }

    if rows.start > rows.end || rows.end > height {
        return Err(PdfEngineError::RowsOutOfRange { start: rows.start, end: rows.end, height });
    }

    Ok(())
}

/// Paper colour derived from the document bytes, so two different documents
/// never rasterize to identical pages.
fn paper_tint(bytes: &[u8]) -> Rgba<u8> {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }

    let [r, g, b, _] = hash.to_le_bytes();
    Rgba([200 + r % 56, 200 + g % 56, 200 + b % 56, 255])
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = Self::parse_sizes(&bytes)?;
        let paper = paper_tint(&bytes);

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        tracing::debug!(handle = handle.raw(), pages = page_sizes.len(), "parsed document");
        self.docs.insert(handle, DocumentRecord { page_sizes, paper });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    fn render_rows(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
        target: &mut RgbaImage,
        rows: Range<u32>,
    ) -> Result<(), PdfEngineError> {
        let paper = self.record(handle)?.paper;
        let viewport = self.viewport(handle, request)?;
        check_band(target, viewport, &rows)?;

        let Viewport { width_px: width, height_px: height } = viewport;
        let framed = width >= 4 && height >= 4;
        for y in rows {
            for x in 0..width {
                let edge = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                let pixel = if framed && edge { BORDER } else { paper };
                target.put_pixel(x, y, pixel);
            }
        }

        Ok(())
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use image::imageops::{self, FilterType};
    use pdfium_render::prelude::*;
    use std::cell::RefCell;

    type PageKey = (DocumentHandle, u32, Viewport);

    /// Rasterizes page content through pdfium.
    ///
    /// Parsing, page sizes and validation stay with [`LopdfEngine`] so both
    /// backends lay pages out identically. pdfium draws whole pages, so the
    /// most recent page raster is kept and later bands are copied out of it.
    pub struct PdfiumEngine {
        pdfium: Pdfium,
        inner: LopdfEngine,
        sources: HashMap<DocumentHandle, Vec<u8>>,
        last_page: RefCell<Option<(PageKey, RgbaImage)>>,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_system_library().map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self {
                pdfium: Pdfium::new(bindings),
                inner: LopdfEngine::default(),
                sources: HashMap::new(),
                last_page: RefCell::new(None),
            })
        }

        fn rasterize(&self, key: PageKey) -> Result<RgbaImage, PdfEngineError> {
            let (handle, page_index, viewport) = key;
            let bytes =
                self.sources.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))?;
            let page_count = self.inner.page_count(handle)?;
            let index = u16::try_from(page_index)
                .map_err(|_| PdfEngineError::PageOutOfRange { page: page_index, page_count })?;

            let document = self.pdfium.load_pdf_from_byte_slice(bytes, None).map_err(backend)?;
            let page = document.pages().get(index).map_err(backend)?;
            let config = PdfRenderConfig::new()
                .set_target_width(viewport.width_px as i32)
                .set_target_height(viewport.height_px as i32);
            let bitmap = page.render_with_config(&config).map_err(backend)?;

            let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
            let image = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
                .ok_or_else(|| PdfEngineError::Backend("pdfium returned a short bitmap".into()))?;

            let Viewport { width_px, height_px } = viewport;
            if (width, height) == (width_px, height_px) {
                Ok(image)
            } else {
                Ok(imageops::resize(&image, width_px, height_px, FilterType::Triangle))
            }
        }
    }

    fn backend(err: PdfiumError) -> PdfEngineError {
        PdfEngineError::Backend(err.to_string())
    }

    /// Copy `rows` of `source` into the same rows of `target`.
    fn copy_rows(source: &RgbaImage, target: &mut RgbaImage, rows: Range<u32>) {
        for y in rows {
            for x in 0..target.width() {
                target.put_pixel(x, y, *source.get_pixel(x, y));
            }
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            let bytes = match source {
                OpenSource::Path(path) => fs::read(path)?,
                OpenSource::Bytes(bytes) => bytes,
            };

            let handle = self.inner.open(OpenSource::Bytes(bytes.clone()))?;
            self.sources.insert(handle, bytes);
            Ok(handle)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(handle, page_index)
        }

        fn render_rows(
            &self,
            handle: DocumentHandle,
            request: RenderRequest,
            target: &mut RgbaImage,
            rows: Range<u32>,
        ) -> Result<(), PdfEngineError> {
            let viewport = self.inner.viewport(handle, request)?;
            check_band(target, viewport, &rows)?;

            let key = (handle, request.page_index, viewport);
            let mut last_page = self.last_page.borrow_mut();
            let image = match last_page.take() {
                Some((cached, image)) if cached == key => image,
                _ => self.rasterize(key)?,
            };

            copy_rows(&image, target, rows);
            *last_page = Some((key, image));
            Ok(())
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.sources.remove(&handle);
            let last_page = self.last_page.get_mut();
            if last_page.as_ref().is_some_and(|((cached, _, _), _)| *cached == handle) {
                *last_page = None;
            }
            self.inner.close(handle)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn copy_rows_leaves_other_rows_untouched() {
            let source = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
            let mut target = RgbaImage::new(4, 4);

            copy_rows(&source, &mut target, 1..3);

            assert_eq!(*target.get_pixel(2, 0), Rgba([0, 0, 0, 0]));
            assert_eq!(*target.get_pixel(2, 1), Rgba([10, 20, 30, 255]));
            assert_eq!(*target.get_pixel(2, 3), Rgba([0, 0, 0, 0]));
        }

        #[test]
        fn renders_bands_of_the_same_page_raster() {
            // Needs libpdfium on the loader path.
            let Ok(mut engine) = PdfiumEngine::from_system_library() else {
                return;
            };
            let handle = engine
                .open(OpenSource::Bytes(fixtures::pdf_with_pages(2)))
                .expect("open should succeed");
            let request = RenderRequest { page_index: 1, scale: 0.25 };

            let banded = {
                let viewport = engine.viewport(handle, request).expect("viewport");
                let mut image = RgbaImage::new(viewport.width_px, viewport.height_px);
                let middle = viewport.height_px / 2;
                engine.render_rows(handle, request, &mut image, 0..middle).expect("top band");
                engine
                    .render_rows(handle, request, &mut image, middle..viewport.height_px)
                    .expect("bottom band");
                image
            };
            let whole = engine.render_page(handle, request).expect("page should render");

            assert_eq!(banded, whole);
            engine.close(handle).expect("close should succeed");
            assert!(engine.render_page(handle, request).is_err());
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
