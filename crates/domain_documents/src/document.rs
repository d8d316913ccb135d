//! Generated documents

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use core_kernel::{BillingEntityId, DateWindow, GeneratedDocumentId};

/// Output of a renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// Lowercase hex SHA-256 of `bytes`
    pub content_hash: String,
}

impl RenderedDocument {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        let content_hash = content_hash(&bytes);
        Self {
            bytes,
            mime: mime.into(),
            content_hash,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// SHA-256 of the content, hex encoded
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File name of a worklog attachment
///
/// `worklog-<document number or target id>-<from>_<to>.html`
pub fn worklog_file_name(reference: &str, period: &DateWindow) -> String {
    let reference: String = reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("worklog-{}-{}_{}.html", reference, period.start, period.end)
}

/// Values written by an upsert keyed on `target_document_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpsert {
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub billing_entity_id: BillingEntityId,
    pub period: DateWindow,
    pub file_name: String,
    pub rendered: RenderedDocument,
}

/// A stored document row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub id: GeneratedDocumentId,
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub billing_entity_id: BillingEntityId,
    pub period: DateWindow,
    pub file_name: String,
    pub mime: String,
    pub size_bytes: i64,
    pub content_hash: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Set once the file was uploaded to the accounting archive
    pub external_archive_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let doc = RenderedDocument::new(b"abc".to_vec(), "text/html");
        assert_eq!(
            doc.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(doc.size_bytes(), 3);
    }

    #[test]
    fn test_worklog_file_name() {
        let period = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap();
        assert_eq!(
            worklog_file_name("1042", &period),
            "worklog-1042-2024-03-01_2024-03-31.html"
        );
        assert_eq!(
            worklog_file_name("A/7", &period),
            "worklog-A_7-2024-03-01_2024-03-31.html"
        );
    }
}
