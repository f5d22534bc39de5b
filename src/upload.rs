//! Upload intake shared by `cw repo create` and `POST /commands`.

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::error::ValidationError;
use crate::extract::DocumentKind;
use crate::models::NewFile;
use crate::repository::normalize_name;

/// A file as it arrives over HTTP: name plus base64 content.
#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    pub name: String,
    pub content_base64: String,
}

impl Upload {
    pub fn from_bytes(name: impl Into<String>, content: &[u8]) -> Self {
        Self {
            name: name.into(),
            content_base64: STANDARD.encode(content),
        }
    }
}

/// A validated upload, ready for [`crate::repository::BlobStore::save`].
#[derive(Debug)]
pub struct PreparedUpload {
    pub name: String,
    pub files: Vec<NewFile>,
    /// User-facing notes, e.g. about files dropped over the limit.
    pub warnings: Vec<String>,
}

/// Normalize the repository name, keep at most `max_files` uploads, and
/// decode them. Any upload without a `.docx`, `.pdf` or `.txt` extension
/// rejects the whole batch.
pub fn prepare_upload(raw_name: &str, uploads: &[Upload], max_files: usize) -> Result<PreparedUpload> {
    let name = normalize_name(raw_name);
    let mut warnings = Vec::new();

    let kept = if uploads.len() > max_files {
        tracing::warn!(received = uploads.len(), max_files, "dropping uploads over the limit");
        warnings.push(format!(
            "You can upload at most {} files. Only the first {} were kept.",
            max_files, max_files
        ));
        &uploads[..max_files]
    } else {
        uploads
    };

    let mut files = Vec::with_capacity(kept.len());
    for upload in kept {
        let kind = DocumentKind::from_file_name(&upload.name)
            .ok_or_else(|| ValidationError::UnsupportedUpload(upload.name.clone()))?;
        let content = STANDARD
            .decode(upload.content_base64.trim())
            .map_err(|_| ValidationError::InvalidUpload(upload.name.clone()))?;
        files.push(NewFile {
            name: upload.name.clone(),
            mime_type: kind.mime_type().to_string(),
            content,
        });
    }

    Ok(PreparedUpload { name, files, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{MIME_PDF, MIME_TXT};

    #[test]
    fn keeps_first_files_and_warns() {
        let uploads: Vec<Upload> = (0..7)
            .map(|i| Upload::from_bytes(format!("f{i}.txt"), b"clause"))
            .collect();
        let prepared = prepare_upload("  TenderA ", &uploads, 5).unwrap();
        assert_eq!(prepared.name, "TenderA");
        assert_eq!(prepared.files.len(), 5);
        assert_eq!(prepared.files[4].name, "f4.txt");
        assert_eq!(prepared.files[0].content, b"clause");
        assert_eq!(prepared.warnings.len(), 1);
    }

    #[test]
    fn mime_follows_extension() {
        let prepared = prepare_upload(
            "T",
            &[Upload::from_bytes("a.PDF", b"%PDF"), Upload::from_bytes("b.txt", b"x")],
            5,
        )
        .unwrap();
        assert_eq!(prepared.files[0].mime_type, MIME_PDF);
        assert_eq!(prepared.files[1].mime_type, MIME_TXT);
        assert!(prepared.warnings.is_empty());
    }

    #[test]
    fn rejects_unsupported_extension() {
        let err = prepare_upload("T", &[Upload::from_bytes("sheet.xlsx", b"x")], 5).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::UnsupportedUpload("sheet.xlsx".into()))
        );
    }

    #[test]
    fn rejects_bad_base64() {
        let upload = Upload {
            name: "a.txt".into(),
            content_base64: "***".into(),
        };
        let err = prepare_upload("T", &[upload], 5).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::InvalidUpload(_))
        ));
    }
}
