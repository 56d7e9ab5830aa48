//! Documents flowing through the pipeline

use crate::error::Result;
use crate::uri;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A document as read from disk or fetched from the web, before decoding
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Stable identifier (file URI or page URL)
    pub id: String,
    /// Origin URI recorded in the history
    pub uri: String,
    /// Undecoded content
    pub content: Vec<u8>,
}

impl RawDocument {
    pub fn new(id: impl Into<String>, uri: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            content,
        }
    }

    /// Read a local file; id and uri are both its `file://` URI
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        let file_uri = uri::path_to_uri(path);
        Ok(Self::new(file_uri.clone(), file_uri, content))
    }

    /// Wrap the extracted text of a web page; id and uri are both its URL
    pub fn from_page(url: &str, text: String) -> Self {
        Self::new(url, url, text.into_bytes())
    }

    /// Content hash used for dedup
    pub fn content_hash(&self) -> String {
        blake3::hash(&self.content).to_hex().to_string()
    }
}

/// Metadata stored with every unit in the corpus and the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub parent_document_id: String,
}

/// A whole document or one chunk of it, as stored in the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUnit {
    pub id: String,
    pub text: String,
    pub metadata: UnitMetadata,
}

impl DocumentUnit {
    /// Unsplit document; its parent is the id with any `__part_N` suffix
    /// stripped
    pub fn whole(id: &str, uri: &str, text: String) -> Self {
        Self {
            id: id.to_string(),
            text,
            metadata: UnitMetadata {
                uri: uri.to_string(),
                chunk_number: None,
                total_chunks: None,
                language: None,
                parent_document_id: uri::parent_document_id(id).to_string(),
            },
        }
    }

    /// Chunk `index` of `total` cut from document `parent_id`
    pub fn chunk(
        parent_id: &str,
        uri: &str,
        language: &str,
        index: usize,
        total: usize,
        text: String,
    ) -> Self {
        Self {
            id: uri::part_id(parent_id, index),
            text,
            metadata: UnitMetadata {
                uri: uri.to_string(),
                chunk_number: Some(index),
                total_chunks: Some(total),
                language: Some(language.to_string()),
                parent_document_id: parent_id.to_string(),
            },
        }
    }

    pub fn parent_document_id(&self) -> &str {
        &self.metadata.parent_document_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_file_uses_file_uri() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a b.md");
        std::fs::write(&path, "hello").unwrap();

        let doc = RawDocument::from_file(&path).unwrap();
        assert!(doc.id.starts_with("file://"));
        assert!(doc.id.ends_with("a%20b.md"));
        assert_eq!(doc.id, doc.uri);
        assert_eq!(doc.content, b"hello");
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let a = RawDocument::new("x", "x", b"one".to_vec());
        let b = RawDocument::new("x", "x", b"one".to_vec());
        let c = RawDocument::new("x", "x", b"two".to_vec());
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_chunk_unit_ids_and_metadata() {
        let unit = DocumentUnit::chunk("file:///r/m.py", "file:///r/m.py", "python", 2, 3, "x".into());
        assert_eq!(unit.id, "file:///r/m.py__part_2");
        assert_eq!(unit.parent_document_id(), "file:///r/m.py");
        assert_eq!(unit.metadata.total_chunks, Some(3));

        let whole = DocumentUnit::whole("https://x.io/a", "https://x.io/a", "t".into());
        assert_eq!(whole.parent_document_id(), "https://x.io/a");
        assert_eq!(whole.metadata.chunk_number, None);

        let part = DocumentUnit::whole("https://x.io/a__part_4", "https://x.io/a", "t".into());
        assert_eq!(part.id, "https://x.io/a__part_4");
        assert_eq!(part.parent_document_id(), "https://x.io/a");
    }
}
