//! Data types for documents, chunks, index metadata, and retrieval results.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The source format of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Txt,
    Md,
    Pdf,
}

impl DocumentType {
    /// Detect the type from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Txt),
            "md" => Some(Self::Md),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// The extension without its leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A registered source document and the chunks produced from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: Uuid,
    /// File name the document was registered under.
    pub name: String,
    /// Source format.
    pub doc_type: DocumentType,
    /// Extracted text content.
    pub content: String,
    /// Size of the original file in bytes.
    pub size_bytes: u64,
    /// When the document was processed.
    pub upload_time: DateTime<Utc>,
    /// Chunks in document order. Empty until the document has been indexed.
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// A bounded span of document text, the unit of indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: Uuid,
    /// The text content of the chunk.
    pub text: String,
    /// The ID of the parent [`Document`].
    pub document_id: Uuid,
    /// The name of the parent [`Document`].
    pub document_name: String,
    /// Page the chunk came from, when the source has pages.
    pub page_number: Option<u32>,
}

impl Chunk {
    /// Create a chunk with a fresh ID and no page number.
    pub fn new(text: impl Into<String>, document_id: Uuid, document_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            document_id,
            document_name: document_name.into(),
            page_number: None,
        }
    }

    /// The metadata record stored alongside this chunk's vector.
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            chunk_id: self.id,
            document_id: self.document_id,
            document_name: self.document_name.clone(),
            text: self.text.clone(),
            page_number: self.page_number,
        }
    }
}

/// Metadata kept for every vector in a [`VectorStore`](crate::VectorStore).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub text: String,
    pub page_number: Option<u32>,
}

/// A chunk returned by retrieval, paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// The chunk ID.
    pub id: Uuid,
    pub text: String,
    pub document_id: Uuid,
    pub document_name: String,
    pub page_number: Option<u32>,
    /// Cosine similarity in `[-1, 1]` (higher is more relevant).
    pub score: f32,
}

impl RetrievedChunk {
    pub(crate) fn from_search_hit(metadata: ChunkMetadata, score: f32) -> Self {
        Self {
            id: metadata.chunk_id,
            text: metadata.text,
            document_id: metadata.document_id,
            document_name: metadata.document_name,
            page_number: metadata.page_number,
            score,
        }
    }
}

/// A registry listing entry for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub name: String,
    pub doc_type: DocumentType,
    pub size_bytes: u64,
    pub chunk_count: usize,
    pub upload_time: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            name: document.name.clone(),
            doc_type: document.doc_type,
            size_bytes: document.size_bytes,
            chunk_count: document.chunks.len(),
            upload_time: document.upload_time,
        }
    }
}
