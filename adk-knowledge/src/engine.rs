//! Retrieval engine orchestrator.
//!
//! The [`RetrievalEngine`] owns the [`VectorStore`] and the document registry, and
//! coordinates ingestion (validate → process → chunk → embed → store → persist) and
//! retrieval (embed → search → filter) through injected services.
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_knowledge::{KnowledgeConfig, RetrievalEngine};
//!
//! let mut engine = RetrievalEngine::builder()
//!     .config(KnowledgeConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .build()?;
//!
//! let report = engine.add_document("notes/setup.md", None).await?;
//! println!("{}", report.message());
//! let context = engine.get_context_string("how do I install it?", None).await;
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunking::Chunker;
use crate::config::KnowledgeConfig;
use crate::document::{Chunk, Document, DocumentSummary, RetrievedChunk};
use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};
use crate::processor::{DocumentProcessor, TextDocumentProcessor};
use crate::vectorstore::{StoreStats, VectorStore, read_json, write_json_atomic};

/// File holding the document registry inside the store directory.
pub const REGISTRY_FILE: &str = "documents.json";

/// A [`RetrievalEngine`] shared across tasks. Holding the lock serialises writers.
pub type SharedRetrievalEngine = Arc<Mutex<RetrievalEngine>>;

/// Outcome of a successful [`RetrievalEngine::add_document`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub document_name: String,
    pub chunk_count: usize,
    /// Whether the updated store was written to disk.
    pub persisted: bool,
}

impl IngestReport {
    /// Human-readable summary, e.g. `Added 'notes.txt' (3 chunks)`.
    pub fn message(&self) -> String {
        format!("Added '{}' ({} chunks)", self.document_name, self.chunk_count)
    }
}

/// Engine statistics: the store's counters plus the registry size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    /// Documents in the registry.
    pub documents: usize,
    /// Whether the engine persists to disk.
    pub persistent: bool,
}

#[derive(Serialize)]
struct RegistryFileRef<'a> {
    documents: Vec<&'a Document>,
}

#[derive(Deserialize)]
struct RegistryFile {
    documents: Vec<Document>,
}

/// The document knowledge base.
///
/// Mutating operations take `&mut self`, so a single engine has at most one writer at a time.
/// Use [`into_shared`](Self::into_shared) to hand it to several tasks. Construct one via
/// [`RetrievalEngine::builder()`].
pub struct RetrievalEngine {
    config: KnowledgeConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    document_processor: Arc<dyn DocumentProcessor>,
    chunker: Arc<dyn Chunker>,
    store: VectorStore,
    documents: HashMap<Uuid, Document>,
    /// Set when saved state could not be read at startup; persisting would overwrite it.
    unreadable_snapshot: bool,
}

impl RetrievalEngine {
    /// Create a new [`RetrievalEngineBuilder`].
    pub fn builder() -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::default()
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Read access to the underlying vector store.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Process, chunk, embed and index a document, then persist the store.
    ///
    /// `content` replaces reading `path` from disk; `path` still provides the name and type.
    /// Rejected input leaves the engine unchanged. A failure to persist after a successful
    /// ingest is logged and reported through [`IngestReport::persisted`].
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::Validation`] for a disallowed extension, an oversized file, a
    ///   duplicate document, or a document without text
    /// - [`KnowledgeError::NotFound`] if `content` is `None` and `path` does not exist
    /// - any processor, embedding or store error, after it has been logged
    pub async fn add_document(
        &mut self,
        path: impl AsRef<Path>,
        content: Option<&[u8]>,
    ) -> Result<IngestReport> {
        let path = path.as_ref();

        if !self.config.is_allowed_extension(path) {
            warn!(path = %path.display(), "rejected file type");
            return Err(KnowledgeError::validation(format!(
                "Invalid file type. Allowed: {}",
                self.config.allowed_extensions.join(", ")
            )));
        }

        let size = match content {
            Some(bytes) => bytes.len() as u64,
            None => file_size(path)?,
        };
        if size > self.config.max_file_size_bytes() {
            warn!(path = %path.display(), size_bytes = size, "rejected oversized file");
            return Err(KnowledgeError::validation(format!(
                "File too large. Max size: {}MB",
                self.config.max_file_size_mb
            )));
        }

        let mut document = self.document_processor.process(path, content).inspect_err(|e| {
            error!(path = %path.display(), error = %e, "document processing failed");
        })?;

        if self.documents.contains_key(&document.id) {
            warn!(document.id = %document.id, document.name = %document.name, "duplicate document");
            return Err(KnowledgeError::validation("Document already exists"));
        }

        let chunks = self.chunker.chunk(&document);
        if chunks.is_empty() {
            warn!(document.name = %document.name, "document has no text content");
            return Err(KnowledgeError::validation("No text content found in document"));
        }
        debug!(document.id = %document.id, chunk_count = chunks.len(), "chunked document");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedding_provider.embed_batch(&texts).await.inspect_err(|e| {
            error!(document.id = %document.id, error = %e, "embedding failed during ingestion");
        })?;
        if embeddings.len() != chunks.len() {
            error!(
                document.id = %document.id,
                expected = chunks.len(),
                actual = embeddings.len(),
                "embedding provider returned the wrong number of vectors"
            );
            return Err(KnowledgeError::embedding(
                "embed_batch",
                format!("returned {} embeddings for {} chunks", embeddings.len(), chunks.len()),
            ));
        }

        let metadata = chunks.iter().map(Chunk::metadata).collect();
        self.store.add(embeddings, metadata).inspect_err(|e| {
            error!(document.id = %document.id, error = %e, "failed to add vectors to store");
        })?;

        document.chunks = chunks;
        let mut report = IngestReport {
            document_id: document.id,
            document_name: document.name.clone(),
            chunk_count: document.chunks.len(),
            persisted: false,
        };
        self.documents.insert(document.id, document);
        report.persisted = self.persist();

        info!(
            document.id = %report.document_id,
            document.name = %report.document_name,
            chunk_count = report.chunk_count,
            "added document"
        );
        Ok(report)
    }

    /// Remove a document and all of its vectors.
    ///
    /// Returns `false` if neither the registry nor the store knows `document_id`.
    pub fn remove_document(&mut self, document_id: Uuid) -> bool {
        let registered = self.documents.remove(&document_id);
        let removed = self.store.remove_by_document(document_id);
        if registered.is_none() && removed == 0 {
            debug!(document.id = %document_id, "remove requested for unknown document");
            return false;
        }
        self.persist();

        let name = registered.map(|d| d.name).unwrap_or_default();
        info!(document.id = %document_id, document.name = %name, removed, "removed document");
        true
    }

    /// The chunks most similar to `query`, best first.
    ///
    /// `top_k` defaults to the configured value. Results below the configured
    /// `similarity_threshold` are dropped. Embedding or search failures are logged and yield
    /// an empty list.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Vec<RetrievedChunk> {
        if self.store.is_empty() {
            debug!("retrieve on empty store");
            return Vec::new();
        }
        let top_k = top_k.unwrap_or(self.config.top_k);

        let query_embedding = match self.embedding_provider.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(error = %e, "embedding failed during retrieval");
                return Vec::new();
            }
        };
        let hits = match self.store.search(&query_embedding, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                error!(error = %e, "vector store search failed");
                return Vec::new();
            }
        };

        let threshold = self.config.similarity_threshold;
        let results: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter(|(_, score)| threshold.is_none_or(|t| *score >= t))
            .map(|(metadata, score)| RetrievedChunk::from_search_hit(metadata, score))
            .collect();

        info!(result_count = results.len(), "retrieval completed");
        results
    }

    /// Retrieved chunks formatted as `[Source: <name>]: <text>` blocks for prompting.
    ///
    /// Blocks are added in ranked order until the next one would push the total past
    /// `max_chars` (default: the configured `max_context_chars`). Returns `""` when nothing
    /// is retrieved.
    pub async fn get_context_string(&self, query: &str, max_chars: Option<usize>) -> String {
        let budget = max_chars.unwrap_or(self.config.max_context_chars);
        let results = self.retrieve(query, None).await;

        let mut context = String::new();
        let mut used = 0;
        for result in &results {
            let block = format!("[Source: {}]: {}\n\n", result.document_name, result.text);
            let len = block.chars().count();
            if used + len > budget {
                break;
            }
            context.push_str(&block);
            used += len;
        }
        context.trim().to_string()
    }

    /// Summaries of every registered document, oldest first.
    pub fn get_document_list(&self) -> Vec<DocumentSummary> {
        self.sorted_documents().into_iter().map(DocumentSummary::from).collect()
    }

    pub fn get_document(&self, document_id: Uuid) -> Option<&Document> {
        self.documents.get(&document_id)
    }

    /// Remove every document and vector.
    ///
    /// This also releases an unreadable snapshot found at startup, which the emptied state
    /// then replaces on disk. Returns `false` if the emptied state could not be persisted.
    pub fn clear_all(&mut self) -> bool {
        self.store.clear();
        self.documents.clear();
        self.unreadable_snapshot = false;
        info!("cleared all documents");
        match self.config.vector_store_dir {
            Some(_) => self.persist(),
            None => true,
        }
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            store: self.store.stats(),
            documents: self.documents.len(),
            persistent: self.config.vector_store_dir.is_some(),
        }
    }

    /// Write the store and registry to the configured directory.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::Config`] for an in-memory engine
    /// - [`KnowledgeError::Persistence`] while the saved state found at startup is unreadable
    ///   and has not been discarded with [`clear_all`](Self::clear_all)
    /// - the underlying I/O or serialization error
    pub fn save(&self) -> Result<()> {
        let dir = self.config.vector_store_dir.as_deref().ok_or_else(|| {
            KnowledgeError::Config("no vector_store_dir configured".to_string())
        })?;
        if self.unreadable_snapshot {
            return Err(KnowledgeError::Persistence(format!(
                "refusing to overwrite the unreadable snapshot in {}; call clear_all to discard it",
                dir.display()
            )));
        }
        self.store.save(dir)?;
        write_json_atomic(
            &dir.join(REGISTRY_FILE),
            &RegistryFileRef { documents: self.sorted_documents() },
        )
    }

    /// Wrap the engine for sharing across tasks.
    pub fn into_shared(self) -> SharedRetrievalEngine {
        Arc::new(Mutex::new(self))
    }

    fn persist(&self) -> bool {
        let Some(dir) = self.config.vector_store_dir.as_deref() else {
            return false;
        };
        match self.save() {
            Ok(()) => true,
            Err(e) => {
                error!(path = %dir.display(), error = %e, "failed to persist knowledge base");
                false
            }
        }
    }

    fn sorted_documents(&self) -> Vec<&Document> {
        let mut documents: Vec<&Document> = self.documents.values().collect();
        documents.sort_by(|a, b| a.upload_time.cmp(&b.upload_time).then_with(|| a.name.cmp(&b.name)));
        documents
    }
}

fn file_size(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(KnowledgeError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Builder for constructing a [`RetrievalEngine`].
///
/// Only the embedding provider is required. The config defaults to
/// [`KnowledgeConfig::default()`], the processor to [`TextDocumentProcessor`], and the
/// chunker to the config's `chunking_strategy`.
///
/// # Example
///
/// ```rust,ignore
/// let engine = RetrievalEngine::builder()
///     .config(KnowledgeConfig::builder().in_memory().build()?)
///     .embedding_provider(Arc::new(embedder))
///     .chunker(Arc::new(RecursiveChunker::new(256, 32)))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RetrievalEngineBuilder {
    config: Option<KnowledgeConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    document_processor: Option<Arc<dyn DocumentProcessor>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl RetrievalEngineBuilder {
    pub fn config(mut self, config: KnowledgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn document_processor(mut self, processor: Arc<dyn DocumentProcessor>) -> Self {
        self.document_processor = Some(processor);
        self
    }

    /// Override the chunker built from the config's strategy.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Build the [`RetrievalEngine`], loading any saved state from the store directory.
    ///
    /// Saved state that cannot be read is logged and replaced by an empty store. The engine
    /// then leaves the files on disk untouched until [`RetrievalEngine::clear_all`] is called.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::Config`] if the embedding provider is missing, reports zero
    ///   dimensions, or the config is invalid
    /// - [`KnowledgeError::DimensionMismatch`] if the saved store has another dimension
    pub fn build(self) -> Result<RetrievalEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            KnowledgeError::Config("embedding_provider is required".to_string())
        })?;
        let document_processor =
            self.document_processor.unwrap_or_else(|| Arc::new(TextDocumentProcessor::new()));
        let chunker = self
            .chunker
            .unwrap_or_else(|| config.chunking_strategy.build(config.chunk_size, config.chunk_overlap));

        let mut store = VectorStore::new(embedding_provider.dimensions())?;
        let mut documents = HashMap::new();
        let mut unreadable_snapshot = false;
        if let Some(dir) = config.vector_store_dir.as_deref() {
            match store.load(dir) {
                Ok(_) => documents = load_registry(dir, &store),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(path = %dir.display(), error = %e, "saved vector store is unreadable, starting empty");
                    warn!(
                        path = %dir.display(),
                        "changes will not be persisted until clear_all discards the saved state"
                    );
                    store.clear();
                    unreadable_snapshot = true;
                }
            }
        }

        info!(
            dimension = store.dimension(),
            live_vectors = store.live_vectors(),
            documents = documents.len(),
            strategy = %config.chunking_strategy,
            "retrieval engine ready"
        );

        Ok(RetrievalEngine {
            config,
            embedding_provider,
            document_processor,
            chunker,
            store,
            documents,
            unreadable_snapshot,
        })
    }
}

/// Registry entries whose vectors are present in `store`.
fn load_registry(dir: &Path, store: &VectorStore) -> HashMap<Uuid, Document> {
    let path = dir.join(REGISTRY_FILE);
    if !path.exists() {
        return HashMap::new();
    }
    let registry: RegistryFile = match read_json(&path) {
        Ok(registry) => registry,
        Err(e) => {
            error!(path = %path.display(), error = %e, "document registry is unreadable");
            return HashMap::new();
        }
    };
    let total = registry.documents.len();
    let documents: HashMap<Uuid, Document> = registry
        .documents
        .into_iter()
        .filter(|d| store.contains_document(d.id))
        .map(|d| (d.id, d))
        .collect();
    if documents.len() != total {
        warn!(dropped = total - documents.len(), "registry entries without vectors were dropped");
    }
    documents
}
