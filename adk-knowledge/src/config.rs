//! Configuration for the knowledge base.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkingStrategy, MIN_PARAGRAPH_OVERLAP};
use crate::error::{KnowledgeError, Result};

/// Configuration parameters for a [`RetrievalEngine`](crate::RetrievalEngine).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of characters carried over from one chunk into the next.
    pub chunk_overlap: usize,
    /// Which chunker the engine builds when none is injected.
    pub chunking_strategy: ChunkingStrategy,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Character budget for [`get_context_string`](crate::RetrievalEngine::get_context_string).
    pub max_context_chars: usize,
    /// Largest accepted document, in megabytes.
    pub max_file_size_mb: u64,
    /// Accepted file extensions, lowercase with a leading dot.
    pub allowed_extensions: Vec<String>,
    /// Results scoring below this are dropped from retrieval.
    pub similarity_threshold: Option<f32>,
    /// Where the vector store and document registry are persisted. `None` keeps everything in memory.
    pub vector_store_dir: Option<PathBuf>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            chunking_strategy: ChunkingStrategy::Paragraph,
            top_k: 5,
            max_context_chars: 1500,
            max_file_size_mb: 10,
            allowed_extensions: vec![".pdf".into(), ".txt".into(), ".md".into()],
            similarity_threshold: None,
            vector_store_dir: Some(PathBuf::from("data/vector_store")),
        }
    }
}

impl KnowledgeConfig {
    /// Create a new builder for constructing a [`KnowledgeConfig`].
    pub fn builder() -> KnowledgeConfigBuilder {
        KnowledgeConfigBuilder::default()
    }

    /// Load configuration from `KNOWLEDGE_*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::Config`] if a variable cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_CHUNK_SIZE")? {
            builder = builder.chunk_size(v);
        }
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(v);
        }
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_CHUNKING_STRATEGY")? {
            builder = builder.chunking_strategy(v);
        }
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_TOP_K")? {
            builder = builder.top_k(v);
        }
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_MAX_CONTEXT_CHARS")? {
            builder = builder.max_context_chars(v);
        }
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_MAX_FILE_SIZE_MB")? {
            builder = builder.max_file_size_mb(v);
        }
        if let Some(v) = parse_var(&lookup, "KNOWLEDGE_SIMILARITY_THRESHOLD")? {
            builder = builder.similarity_threshold(v);
        }
        if let Some(dir) = lookup("KNOWLEDGE_VECTOR_STORE_DIR") {
            let dir = dir.trim();
            builder = if dir.is_empty() { builder.in_memory() } else { builder.vector_store_dir(dir) };
        }
        builder.build()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k`, `max_context_chars` or `max_file_size_mb` is zero
    /// - an allowed extension is empty or lacks its leading dot
    /// - `similarity_threshold` lies outside `[-1, 1]`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KnowledgeError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(KnowledgeError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.chunking_strategy == ChunkingStrategy::Paragraph
            && (1..MIN_PARAGRAPH_OVERLAP).contains(&self.chunk_overlap)
        {
            return Err(KnowledgeError::Config(format!(
                "chunk_overlap ({}) must be 0 or at least {MIN_PARAGRAPH_OVERLAP} for paragraph chunking",
                self.chunk_overlap
            )));
        }
        if self.top_k == 0 {
            return Err(KnowledgeError::Config("top_k must be greater than zero".to_string()));
        }
        if self.max_context_chars == 0 {
            return Err(KnowledgeError::Config(
                "max_context_chars must be greater than zero".to_string(),
            ));
        }
        if self.max_file_size_mb == 0 {
            return Err(KnowledgeError::Config(
                "max_file_size_mb must be greater than zero".to_string(),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(KnowledgeError::Config("allowed_extensions must not be empty".to_string()));
        }
        if let Some(bad) =
            self.allowed_extensions.iter().find(|ext| ext.len() < 2 || !ext.starts_with('.'))
        {
            return Err(KnowledgeError::Config(format!(
                "allowed extension '{bad}' must start with '.'"
            )));
        }
        if let Some(threshold) = self.similarity_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(KnowledgeError::Config(format!(
                    "similarity_threshold ({threshold}) must lie within [-1, 1]"
                )));
            }
        }
        Ok(())
    }

    /// The maximum accepted document size in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Whether `path` ends in one of the allowed extensions (case-insensitive).
    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        self.allowed_extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| KnowledgeError::Config(format!("invalid value for {key} ('{raw}'): {e}"))),
    }
}

/// Builder for constructing a validated [`KnowledgeConfig`].
#[derive(Debug, Clone, Default)]
pub struct KnowledgeConfigBuilder {
    config: KnowledgeConfig,
}

impl KnowledgeConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn chunking_strategy(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking_strategy = strategy;
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the character budget used when assembling a context string.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_file_size_mb = mb;
        self
    }

    /// Replace the extension allow-list. Extensions are lowercased.
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_extensions =
            extensions.into_iter().map(|e| e.into().to_lowercase()).collect();
        self
    }

    /// Set the minimum similarity score for retrieved results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Persist the store and registry under `dir`.
    pub fn vector_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.vector_store_dir = Some(dir.into());
        self
    }

    /// Keep the store in memory only.
    pub fn in_memory(mut self) -> Self {
        self.config.vector_store_dir = None;
        self
    }

    /// Build the [`KnowledgeConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeConfig::validate`].
    pub fn build(self) -> Result<KnowledgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = KnowledgeConfig::default();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_context_chars, 1500);
        assert_eq!(config.max_file_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.chunking_strategy, ChunkingStrategy::Paragraph);
        assert!(KnowledgeConfig::builder().build().is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let err = KnowledgeConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn paragraph_overlap_must_clear_the_joiner() {
        for overlap in [1, 2] {
            let err = KnowledgeConfig::builder().chunk_overlap(overlap).build().unwrap_err();
            assert!(err.to_string().contains("at least 3"), "{err}");
        }
        assert!(KnowledgeConfig::builder().chunk_overlap(0).build().is_ok());
        assert!(KnowledgeConfig::builder().chunk_overlap(3).build().is_ok());
        assert!(
            KnowledgeConfig::builder()
                .chunking_strategy(ChunkingStrategy::Recursive)
                .chunk_overlap(1)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn rejects_zero_top_k_and_bad_extensions() {
        assert!(KnowledgeConfig::builder().top_k(0).build().is_err());
        assert!(KnowledgeConfig::builder().allowed_extensions(["txt"]).build().is_err());
        assert!(KnowledgeConfig::builder().allowed_extensions(Vec::<String>::new()).build().is_err());
        assert!(KnowledgeConfig::builder().similarity_threshold(1.5).build().is_err());
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let config = KnowledgeConfig::default();
        assert!(config.is_allowed_extension(Path::new("notes/README.MD")));
        assert!(config.is_allowed_extension(Path::new("paper.pdf")));
        assert!(!config.is_allowed_extension(Path::new("image.png")));
        assert!(!config.is_allowed_extension(Path::new("txt")));
    }

    #[test]
    fn from_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KNOWLEDGE_CHUNK_SIZE", "256"),
            ("KNOWLEDGE_CHUNK_OVERLAP", " 32 "),
            ("KNOWLEDGE_CHUNKING_STRATEGY", "recursive"),
            ("KNOWLEDGE_VECTOR_STORE_DIR", ""),
        ]);
        let config =
            KnowledgeConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.chunk_overlap, 32);
        assert_eq!(config.chunking_strategy, ChunkingStrategy::Recursive);
        assert_eq!(config.vector_store_dir, None);
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn from_lookup_reports_unparseable_values() {
        let err = KnowledgeConfig::from_lookup(|key| {
            (key == "KNOWLEDGE_TOP_K").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("KNOWLEDGE_TOP_K"));
    }
}
