//! Document processors turn a file path (and optional raw bytes) into a [`Document`].

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::document::{Document, DocumentType};
use crate::error::{KnowledgeError, Result};

/// Extracts text from a source file.
///
/// When `content` is given it is used instead of reading `path`, and its length is the
/// document size. Implementations must assign deterministic ids so that processing the same
/// name and content twice yields the same [`Document::id`].
pub trait DocumentProcessor: Send + Sync {
    /// Process a document.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::UnsupportedType`] for extensions other than `.txt`, `.md` and `.pdf`
    /// - [`KnowledgeError::NotFound`] if `content` is `None` and `path` does not exist
    /// - [`KnowledgeError::Extraction`] if text cannot be extracted
    fn process(&self, path: &Path, content: Option<&[u8]>) -> Result<Document>;
}

/// The id a document with this name and extracted text is registered under.
pub fn document_id(name: &str, content: &str) -> Uuid {
    let mut key = Vec::with_capacity(name.len() + content.len() + 1);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key.extend_from_slice(content.as_bytes());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &key)
}

/// Plain text and markdown processor.
///
/// Bytes are decoded as UTF-8 with invalid sequences dropped. Markdown is reduced to plain
/// text: headings, paired emphasis, code fences, links and known HTML tags are stripped
/// while paragraph breaks are kept. PDF files need an external processor and are reported as
/// [`KnowledgeError::Extraction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDocumentProcessor;

impl TextDocumentProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentProcessor for TextDocumentProcessor {
    fn process(&self, path: &Path, content: Option<&[u8]>) -> Result<Document> {
        let doc_type = DocumentType::from_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e.to_ascii_lowercase()))
                .unwrap_or_default();
            KnowledgeError::UnsupportedType(ext)
        })?;

        if doc_type == DocumentType::Pdf {
            return Err(KnowledgeError::Extraction {
                path: path.display().to_string(),
                message: "PDF extraction requires an external document processor".to_string(),
            });
        }

        let owned;
        let bytes = match content {
            Some(bytes) => bytes,
            None => {
                if !path.exists() {
                    return Err(KnowledgeError::NotFound(path.display().to_string()));
                }
                owned = fs::read(path)?;
                owned.as_slice()
            }
        };

        let decoded = decode_utf8_lossless(bytes);
        let text = match doc_type {
            DocumentType::Md => markdown_to_text(&decoded),
            _ => decoded,
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let document = Document {
            id: document_id(&name, &text),
            name,
            doc_type,
            content: text,
            size_bytes: bytes.len() as u64,
            upload_time: Utc::now(),
            chunks: Vec::new(),
        };
        info!(document.name = %document.name, size_bytes = document.size_bytes, "processed document");
        Ok(document)
    }
}

/// Decode UTF-8, dropping invalid byte sequences and a leading byte-order mark.
fn decode_utf8_lossless(bytes: &[u8]) -> String {
    let text: String = bytes.utf8_chunks().map(|chunk| chunk.valid()).collect();
    match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    }
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(```|~~~).*$\n?").expect("unreachable error: code fence pattern is valid")
});

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").expect("unreachable error: heading pattern is valid")
});

static IMAGE_OR_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("unreachable error: link pattern is valid")
});

/// Known lowercase HTML elements and comments. Other `<...>` text, such as `Vec<T>` or
/// `x < 5 and y > 3`, is prose.
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<!--.*?-->|</?(?:a|abbr|b|blockquote|br|center|code|dd|del|details|div|dl|dt|em|figcaption|figure|font|h[1-6]|hr|i|img|input|kbd|li|mark|ol|p|picture|pre|s|small|source|span|strong|sub|summary|sup|table|tbody|td|th|thead|tr|u|ul|video)\b[^<>\n]*>",
    )
    .expect("unreachable error: tag pattern is valid")
});

/// Inline code spans and paired emphasis markers around non-blank text.
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"`([^`\n]+)`|\*\*([^*\s](?:[^*\n]*[^*\s])?)\*\*|__([^_\s](?:[^_\n]*[^_\s])?)__|\*([^*\s](?:[^*\n]*[^*\s])?)\*",
    )
    .expect("unreachable error: emphasis pattern is valid")
});

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*)(?:[-*+]|>)[ \t]+").expect("unreachable error: list pattern is valid")
});

/// Reduce markdown to plain text, keeping line and paragraph structure.
pub fn markdown_to_text(markdown: &str) -> String {
    let text = CODE_FENCE.replace_all(markdown, "");
    let text = HEADING.replace_all(&text, "");
    let text = IMAGE_OR_LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "$1");
    let text = EMPHASIS.replace_all(&text, "$1$2$3$4");
    debug!(before = markdown.len(), after = text.len(), "stripped markdown");
    text.into_owned()
}
