//! PDF and Word support: hand-built documents go through the loader and the
//! `cw` upload path.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use clausewatch::extract::{load_segments, DocumentKind, LoadError, MIME_DOCX, MIME_PDF};
use clausewatch::models::{FileMeta, StoredFile};
use clausewatch_core::chunk::{Chunker, Tokenizer};

const PHRASE: &str = "payment in thirty days";

fn cw_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("cw");
    path
}

/// Minimal one-page PDF showing `PHRASE`, with correct xref offsets so
/// pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", PHRASE);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn stored(name: &str, mime: &str, content: Vec<u8>) -> StoredFile {
    StoredFile {
        meta: FileMeta {
            id: 1,
            repository_id: "repo".to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            size: content.len() as i64,
        },
        content,
    }
}

#[test]
fn pdf_pages_are_numbered_segments() {
    let segments = load_segments(&stored("tender.pdf", MIME_PDF, minimal_pdf_with_phrase())).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].page, Some(1));
    assert_eq!(segments[0].file_name, "tender.pdf");
    assert!(
        segments[0].text.contains(PHRASE),
        "extracted text should contain the phrase: {:?}",
        segments[0].text
    );
}

#[test]
fn pdf_chunks_keep_their_page() {
    let segments = load_segments(&stored("tender.pdf", MIME_PDF, minimal_pdf_with_phrase())).unwrap();
    let chunker = Chunker::new(Tokenizer::cl100k().unwrap(), 500, 50).unwrap();
    let chunks: Vec<_> = chunker.chunks(&segments).collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].page, Some(1));
    assert_eq!(chunks[0].chunk_index, 0);
}

#[test]
fn corrupt_pdf_is_malformed_not_unsupported() {
    let err = load_segments(&stored("bad.pdf", MIME_PDF, b"not a valid pdf".to_vec())).unwrap_err();
    assert!(matches!(err, LoadError::Malformed { .. }), "got {:?}", err);
}

#[test]
fn docx_paragraphs_are_one_segment() {
    let bytes = minimal_docx_with_paragraphs(&[
        "1. The supplier shall deliver within 14 days.",
        "2. Delivery is due within 28 days.",
    ]);
    let segments = load_segments(&stored("annex.docx", MIME_DOCX, bytes)).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].page, None);
    assert_eq!(
        segments[0].text,
        "1. The supplier shall deliver within 14 days.\n\n2. Delivery is due within 28 days."
    );
}

#[test]
fn docx_without_document_part_is_malformed() {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"hello").unwrap();
        zip.finish().unwrap();
    }
    let err = DocumentKind::WordDocument.extract_text(&buf).unwrap_err();
    assert!(err.to_string().contains("word/document.xml"));
}

fn setup_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();
    fs::write(root.join("files/tender.pdf"), minimal_pdf_with_phrase()).unwrap();
    fs::write(
        root.join("files/annex.docx"),
        minimal_docx_with_paragraphs(&["Delivery is due within 28 days."]),
    )
    .unwrap();

    let config_path = root.join("config/clausewatch.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/clausewatch.sqlite\"\n\n[index]\nbackend = \"memory\"\n\n[auth]\npassword = \"pw\"\n",
            root.display()
        ),
    )
    .unwrap();
    (tmp, config_path)
}

fn run_cw(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cw_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["--accept-disclaimer", "--password", "pw"])
        .args(args)
        .env_remove("PASSWORD_TO_ENTER")
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cw binary at {:?}: {}", binary, e));
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn uploads_store_content_type_from_extension() {
    let (tmp, config_path) = setup_env();
    let pdf = tmp.path().join("files/tender.pdf");
    let docx = tmp.path().join("files/annex.docx");

    let (stdout, stderr, success) = run_cw(
        &config_path,
        &[
            "repo",
            "create",
            "--name",
            "Formats",
            pdf.to_str().unwrap(),
            docx.to_str().unwrap(),
        ],
    );
    assert!(success, "create failed: stdout={}, stderr={}", stdout, stderr);
    let id = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("id: "))
        .unwrap()
        .to_string();

    let (stdout, _, success) = run_cw(&config_path, &["repo", "files", &id]);
    assert!(success);
    assert!(stdout.contains("tender.pdf  application/pdf"));
    assert!(stdout.contains(&format!("annex.docx  {}", MIME_DOCX)));
}
