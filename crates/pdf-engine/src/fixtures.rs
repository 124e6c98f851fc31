//! Generated PDF documents for tests.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Letter-sized page in points.
pub const LETTER: (i64, i64) = (612, 792);

/// A valid PDF with `count` letter-sized pages.
pub fn pdf_with_pages(count: usize) -> Vec<u8> {
    pdf_with_page_sizes(&vec![LETTER; count])
}

/// A valid PDF with one page per `(width, height)` entry, in points.
pub fn pdf_with_page_sizes(sizes: &[(i64, i64)]) -> Vec<u8> {
    let mut doc = page_tree(sizes.len(), |index, page| {
        let (width, height) = sizes[index];
        page.set("MediaBox", media_box(width, height));
    });
    save(&mut doc)
}

/// `count` pages that carry no MediaBox of their own; the `/Pages` root does.
pub fn pdf_with_inherited_media_box(count: usize, (width, height): (i64, i64)) -> Vec<u8> {
    let mut doc = page_tree(count, |_, _| {});
    let pages_id = root_pages_id(&doc);
    let pages = doc
        .get_object_mut(pages_id)
        .and_then(Object::as_dict_mut)
        .expect("fixture page tree should be a dictionary");
    pages.set("MediaBox", media_box(width, height));
    save(&mut doc)
}

/// A one-page PDF whose uncompressed content stream shows `text`.
pub fn pdf_with_page_text(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
    let mut doc = page_tree(1, |_, page| page.set("MediaBox", media_box(LETTER.0, LETTER.1)));
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = first_page_id(&doc);
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .expect("fixture page should be a dictionary");
    page.set("Contents", content_id);
    save(&mut doc)
}

/// A one-page PDF whose trailer references a standard security handler.
pub fn encrypted_pdf() -> Vec<u8> {
    let mut doc = page_tree(1, |_, page| page.set("MediaBox", media_box(LETTER.0, LETTER.1)));
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => Object::Integer(1),
        "R" => Object::Integer(2),
        "O" => Object::string_literal(vec![0x4f_u8; 32]),
        "U" => Object::string_literal(vec![0x55_u8; 32]),
        "P" => Object::Integer(-4),
    });
    doc.trailer.set("Encrypt", encrypt_id);
    doc.trailer.set(
        "ID",
        vec![Object::string_literal(vec![1_u8; 16]), Object::string_literal(vec![1_u8; 16])],
    );
    save(&mut doc)
}

fn media_box(width: i64, height: i64) -> Vec<Object> {
    vec![Object::Integer(0), Object::Integer(0), Object::Integer(width), Object::Integer(height)]
}

/// Catalog plus a flat page tree of `count` pages, each passed to `page`.
fn page_tree(count: usize, mut page: impl FnMut(usize, &mut Dictionary)) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..count)
        .map(|index| {
            let mut dict = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
            };
            page(index, &mut dict);
            Object::Reference(doc.add_object(dict))
        })
        .collect();

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(count as i64),
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

fn root_pages_id(doc: &Document) -> ObjectId {
    doc.catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .expect("fixture catalog should reference its page tree")
}

fn first_page_id(doc: &Document) -> ObjectId {
    *doc.get_pages().values().next().expect("fixture should have a page")
}

fn save(doc: &mut Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("in-memory PDF should serialize");
    bytes
}

/// Starts like a PDF but cannot be parsed.
pub fn truncated_pdf() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog".to_vec()
}

/// Write a `pages`-page PDF named `name` into `dir`.
pub fn write_pdf(dir: &Path, name: &str, pages: usize) -> io::Result<PathBuf> {
    write_bytes(dir, name, &pdf_with_pages(pages))
}

pub fn write_bytes(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, bytes)?;
    Ok(path)
}
