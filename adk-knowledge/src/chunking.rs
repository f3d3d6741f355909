//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`ParagraphChunker`]: packs paragraphs greedily, falls back to sentences, and primes
//!   each new chunk with an overlap tail from the previous one
//! - [`RecursiveChunker`]: splits on a ladder of separators, down to fixed-width slices
//!
//! Sizes are counted in characters, and every cut lands on a character boundary.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::document::{Chunk, Document};
use crate::error::KnowledgeError;

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const PARAGRAPH_SEPARATOR_LEN: usize = 2;

/// Smallest non-zero overlap that still carries text past the paragraph joiner when the next
/// piece fills a whole chunk.
pub const MIN_PARAGRAPH_OVERLAP: usize = PARAGRAPH_SEPARATOR_LEN + 1;

/// Partial pieces shorter than this are not worth carrying into the next chunk.
const MIN_PARTIAL_OVERLAP: usize = 50;

const SEPARATORS: [&str; 7] = ["\n\n", "\n", ". ", "! ", "? ", " ", ""];

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n\s*\n").expect("unreachable error: invalid paragraph break pattern")
});
static PAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*---[ \t]*Page \d+[ \t]*---[ \t]*$")
        .expect("unreachable error: invalid page marker pattern")
});
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?]\s+").expect("unreachable error: invalid sentence pattern")
});

/// A strategy for splitting documents into chunks.
///
/// Implementors only provide [`split_text`](Chunker::split_text); the provided methods wrap
/// each piece into a [`Chunk`] with a fresh ID, so every strategy yields the same schema.
pub trait Chunker: Send + Sync {
    /// Split text into trimmed, non-empty pieces in document order.
    ///
    /// Returns an empty `Vec` for empty or whitespace-only input.
    fn split_text(&self, text: &str) -> Vec<String>;

    /// Split `text` into chunks attributed to the given document.
    fn chunk_text(&self, text: &str, document_id: Uuid, document_name: &str) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .map(|piece| Chunk::new(piece, document_id, document_name))
            .collect()
    }

    /// Split a document's content into chunks.
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.chunk_text(&document.content, document.id, &document.name)
    }
}

/// Selects a [`Chunker`] implementation from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// [`ParagraphChunker`].
    #[default]
    Paragraph,
    /// [`RecursiveChunker`].
    Recursive,
}

impl ChunkingStrategy {
    /// Build the chunker for this strategy.
    pub fn build(self, chunk_size: usize, chunk_overlap: usize) -> Arc<dyn Chunker> {
        match self {
            Self::Paragraph => Arc::new(ParagraphChunker::new(chunk_size, chunk_overlap)),
            Self::Recursive => Arc::new(RecursiveChunker::new(chunk_size, chunk_overlap)),
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paragraph => f.write_str("paragraph"),
            Self::Recursive => f.write_str("recursive"),
        }
    }
}

impl FromStr for ChunkingStrategy {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paragraph" => Ok(Self::Paragraph),
            "recursive" => Ok(Self::Recursive),
            other => Err(KnowledgeError::Config(format!(
                "unknown chunking strategy '{other}' (expected 'paragraph' or 'recursive')"
            ))),
        }
    }
}

/// Packs paragraphs into chunks of at most `chunk_size` characters.
///
/// `--- Page N ---` marker lines are dropped and act as paragraph breaks, whatever the
/// length of the text. Text is split on blank lines. Paragraphs longer than
/// `chunk_size` are split into sentences, which are re-joined greedily; a sentence is only
/// cut apart when it alone exceeds `chunk_size`. When a chunk is finalised, the next one is
/// primed with up to `chunk_overlap` characters taken from the end of the previous chunk, so
/// a chunk may grow to `chunk_size + chunk_overlap` characters.
///
/// # Example
///
/// ```rust,ignore
/// use adk_knowledge::{Chunker, ParagraphChunker};
///
/// let chunker = ParagraphChunker::new(512, 50);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ParagraphChunker {
    /// Create a new `ParagraphChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: soft maximum number of characters per chunk
    /// * `chunk_overlap`: number of characters carried into the next chunk. The tail is
    ///   joined with `"\n\n"`, so overlaps below [`MIN_PARAGRAPH_OVERLAP`] can come out empty.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    /// Paragraphs and sentence groups, each at most `chunk_size` characters.
    fn pieces(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for paragraph in PARAGRAPH_BREAK.split(text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            if char_len(paragraph) <= self.chunk_size {
                pieces.push(paragraph.to_string());
            } else {
                pieces.extend(self.split_long_paragraph(paragraph));
            }
        }
        pieces
    }

    fn split_long_paragraph(&self, paragraph: &str) -> Vec<String> {
        let mut groups = Vec::new();
        let mut current = String::new();
        for sentence in split_sentences(paragraph) {
            if char_len(sentence) > self.chunk_size {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                groups.extend(self.split_words(sentence));
            } else {
                push_joined(&mut groups, &mut current, sentence, " ", self.chunk_size);
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Forced split of a single oversized sentence.
    fn split_words(&self, sentence: &str) -> Vec<String> {
        let mut groups = Vec::new();
        let mut current = String::new();
        for word in sentence.split_whitespace() {
            if char_len(word) > self.chunk_size {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                groups.extend(slice_chars(word, self.chunk_size, self.chunk_size));
            } else {
                push_joined(&mut groups, &mut current, word, " ", self.chunk_size);
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Up to `chunk_overlap` characters from the end of a finalised chunk's pieces.
    fn overlap_tail(&self, pieces: &[String]) -> String {
        if self.chunk_overlap == 0 {
            return String::new();
        }
        let min_partial = MIN_PARTIAL_OVERLAP.min(self.chunk_overlap / 2).max(1);

        let mut taken: Vec<&str> = Vec::new();
        let mut total = 0;
        for piece in pieces.iter().rev() {
            let joiner = if taken.is_empty() { 0 } else { PARAGRAPH_SEPARATOR_LEN };
            let len = char_len(piece);
            if total + joiner + len <= self.chunk_overlap {
                taken.push(piece);
                total += joiner + len;
                continue;
            }
            let remaining = self.chunk_overlap.saturating_sub(total + joiner);
            if remaining >= min_partial {
                let partial = partial_tail(piece, remaining);
                if !partial.is_empty() {
                    taken.push(partial);
                }
            }
            break;
        }
        taken.reverse();
        taken.join(PARAGRAPH_SEPARATOR)
    }
}

impl Chunker for ParagraphChunker {
    fn split_text(&self, text: &str) -> Vec<String> {
        let text = normalize_line_endings(text);
        // a blanked marker line leaves a paragraph break behind
        let text = PAGE_MARKER.replace_all(&text, "");
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if char_len(trimmed) <= self.chunk_size {
            return vec![trimmed.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0;

        for piece in self.pieces(trimmed) {
            let piece_len = char_len(&piece);
            if !current.is_empty()
                && current_len + PARAGRAPH_SEPARATOR_LEN + piece_len > self.chunk_size
            {
                chunks.push(current.join(PARAGRAPH_SEPARATOR));

                let tail = self.overlap_tail(&current);
                let budget = (self.chunk_size + self.chunk_overlap)
                    .saturating_sub(PARAGRAPH_SEPARATOR_LEN + piece_len);
                let tail = fit_tail(&tail, budget).to_string();

                current.clear();
                current_len = 0;
                if !tail.is_empty() {
                    current_len = char_len(&tail);
                    current.push(tail);
                }
            }
            current_len = if current.is_empty() {
                piece_len
            } else {
                current_len + PARAGRAPH_SEPARATOR_LEN + piece_len
            };
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.join(PARAGRAPH_SEPARATOR));
        }

        let chunks = finish(chunks);
        debug!(chunk_count = chunks.len(), text_chars = char_len(trimmed), "paragraph chunking");
        chunks
    }
}

/// Splits text by trying separators in priority order.
///
/// Separators are `"\n\n"`, `"\n"`, `". "`, `"! "`, `"? "`, `" "`, and finally `""`, which
/// falls back to fixed-width character slices with stride `chunk_size - chunk_overlap`.
/// Parts are merged greedily up to `chunk_size`; when a chunk is flushed, the next one
/// starts with the trailing `chunk_overlap` characters of the flushed chunk.
///
/// # Example
///
/// ```rust,ignore
/// use adk_knowledge::{Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(512, 50);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }

    fn split_recursive(&self, text: &str, level: usize) -> Vec<String> {
        let Some(&separator) = SEPARATORS.get(level) else {
            return slice_chars(text, self.chunk_size, self.chunk_size);
        };
        if separator.is_empty() {
            return slice_chars(text, self.chunk_size, self.stride());
        }
        if !text.contains(separator) {
            return self.split_recursive(text, level + 1);
        }

        let separator_len = char_len(separator);
        let mut merged = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for part in text.split(separator) {
            let part_len = char_len(part);
            let candidate_len = if current.is_empty() {
                part_len
            } else {
                current_len + separator_len + part_len
            };

            if candidate_len <= self.chunk_size {
                if !current.is_empty() {
                    current.push_str(separator);
                }
                current.push_str(part);
                current_len = candidate_len;
                continue;
            }

            if current.is_empty() {
                merged.extend(self.split_recursive(part, level + 1));
                continue;
            }

            let flushed = std::mem::take(&mut current);
            current_len = 0;
            if part_len > self.chunk_size {
                merged.push(flushed);
                merged.extend(self.split_recursive(part, level + 1));
                continue;
            }

            let budget =
                self.chunk_overlap.min(self.chunk_size.saturating_sub(separator_len + part_len));
            let overlap = tail_chars(&flushed, budget);
            if !overlap.is_empty() {
                current.push_str(overlap);
                current.push_str(separator);
                current_len = char_len(overlap) + separator_len;
            }
            current.push_str(part);
            current_len += part_len;
            merged.push(flushed);
        }

        if !current.is_empty() {
            merged.push(current);
        }
        merged
    }
}

impl Chunker for RecursiveChunker {
    fn split_text(&self, text: &str) -> Vec<String> {
        let text = normalize_line_endings(text);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if char_len(trimmed) <= self.chunk_size {
            return vec![trimmed.to_string()];
        }

        let chunks = finish(self.split_recursive(trimmed, 0));
        debug!(chunk_count = chunks.len(), text_chars = char_len(trimmed), "recursive chunking");
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn finish(chunks: Vec<String>) -> Vec<String> {
    chunks
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Byte offset where the last `n` characters of `s` begin.
fn tail_start(s: &str, n: usize) -> usize {
    if n == 0 {
        return s.len();
    }
    s.char_indices().rev().nth(n - 1).map_or(0, |(i, _)| i)
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    &s[tail_start(s, n)..]
}

/// The last `n` characters of `piece`, moved forward to a word start when the cut lands
/// inside a word.
fn partial_tail(piece: &str, n: usize) -> &str {
    let start = tail_start(piece, n);
    let tail = &piece[start..];
    let cuts_word = piece[..start].chars().next_back().is_some_and(|c| !c.is_whitespace())
        && tail.chars().next().is_some_and(|c| !c.is_whitespace());
    if cuts_word {
        if let Some(pos) = tail.find(char::is_whitespace) {
            let snapped = tail[pos..].trim_start();
            if !snapped.is_empty() {
                return snapped;
            }
        }
    }
    tail.trim_start()
}

/// Shorten an overlap tail from the front until it fits in `budget` characters.
fn fit_tail(tail: &str, budget: usize) -> &str {
    if char_len(tail) <= budget { tail } else { tail_chars(tail, budget).trim_start() }
}

/// Append `piece` to `current` with `separator`, flushing `current` into `out` first when
/// the result would exceed `limit` characters.
fn push_joined(out: &mut Vec<String>, current: &mut String, piece: &str, separator: &str, limit: usize) {
    if current.is_empty() {
        current.push_str(piece);
    } else if char_len(current) + char_len(separator) + char_len(piece) > limit {
        out.push(std::mem::replace(current, piece.to_string()));
    } else {
        current.push_str(separator);
        current.push_str(piece);
    }
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(paragraph) {
        // the punctuation mark is a single ASCII byte
        let end = m.start() + 1;
        let sentence = paragraph[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Fixed-width character windows of `size`, advancing by `stride`, ending at the last character.
fn slice_chars(text: &str, size: usize, stride: usize) -> Vec<String> {
    let bounds: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let count = bounds.len() - 1;
    let size = size.max(1);
    let stride = stride.max(1);

    let mut slices = Vec::new();
    let mut start = 0;
    while start < count {
        let end = (start + size).min(count);
        slices.push(text[bounds[start]..bounds[end]].to_string());
        if end == count {
            break;
        }
        start += stride;
    }
    slices
}
