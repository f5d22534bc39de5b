//! Document loader: stored bytes to ordered text segments.
//!
//! The declared MIME type selects a [`DocumentKind`]; anything outside the
//! three supported kinds is rejected with [`LoadError::UnsupportedType`],
//! which aborts the whole analysis run. Content that cannot be decoded is
//! [`LoadError::Malformed`] and only fails the file it came from.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;

use clausewatch_core::models::Segment;

use crate::models::StoredFile;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TXT: &str = "text/plain";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("{kind} content is malformed: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

impl LoadError {
    fn malformed(kind: DocumentKind, reason: impl ToString) -> Self {
        LoadError::Malformed {
            kind: kind.label(),
            reason: reason.to_string(),
        }
    }
}

/// The closed set of loadable document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    WordDocument,
    Pdf,
    PlainText,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Result<Self, LoadError> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            MIME_DOCX => Ok(DocumentKind::WordDocument),
            MIME_PDF => Ok(DocumentKind::Pdf),
            MIME_TXT => Ok(DocumentKind::PlainText),
            other => Err(LoadError::UnsupportedType(other.to_string())),
        }
    }

    /// Map an upload's file name to a kind by extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "docx" => Some(DocumentKind::WordDocument),
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::PlainText),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentKind::WordDocument => MIME_DOCX,
            DocumentKind::Pdf => MIME_PDF,
            DocumentKind::PlainText => MIME_TXT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DocumentKind::WordDocument => "Word document",
            DocumentKind::Pdf => "PDF",
            DocumentKind::PlainText => "text file",
        }
    }

    /// Extract plain text. PDFs yield one string per page; the other kinds
    /// yield a single string.
    pub fn extract_text(self, bytes: &[u8]) -> Result<Vec<String>, LoadError> {
        match self {
            DocumentKind::WordDocument => extract_docx(bytes).map(|t| vec![t]),
            DocumentKind::Pdf => extract_pdf_pages(bytes),
            DocumentKind::PlainText => String::from_utf8(bytes.to_vec())
                .map(|t| vec![t])
                .map_err(|e| LoadError::malformed(self, e)),
        }
    }
}

/// Load a stored file into segments, dropping whitespace-only pages.
pub fn load_segments(file: &StoredFile) -> Result<Vec<Segment>, LoadError> {
    let kind = DocumentKind::from_mime(&file.meta.mime_type)?;
    let paginated = kind == DocumentKind::Pdf;
    let segments = kind
        .extract_text(&file.content)?
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| {
            let segment = Segment::new(file.meta.id, file.meta.name.clone(), text);
            if paginated {
                segment.with_page(i as u32 + 1)
            } else {
                segment
            }
        })
        .collect();
    Ok(segments)
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    let owned = bytes.to_vec();
    match std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem_by_pages(&owned)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(LoadError::malformed(DocumentKind::Pdf, e)),
        Err(_) => Err(LoadError::malformed(DocumentKind::Pdf, "parser panicked")),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let kind = DocumentKind::WordDocument;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::malformed(kind, e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| LoadError::malformed(kind, "word/document.xml not found"))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| LoadError::malformed(kind, e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::malformed(kind, "word/document.xml exceeds size limit"));
    }
    docx_body_text(&xml).map_err(|e| LoadError::malformed(kind, e))
}

/// Collect `w:t` runs; each `w:p` ends with a blank line, `w:tab` becomes a
/// tab and `w:br` a newline.
fn docx_body_text(xml: &[u8]) -> Result<String, quick_xml::Error> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(te) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
