//! Document knowledge base for ADK-Rust agents.
//!
//! This crate provides:
//! - Paragraph-first and recursive text chunking ([`ParagraphChunker`], [`RecursiveChunker`])
//! - An exact cosine-similarity [`VectorStore`] with document removal and disk snapshots
//! - A [`RetrievalEngine`] that ingests `.txt`/`.md` files, retrieves relevant chunks and
//!   formats them as prompt context
//! - Pluggable [`EmbeddingProvider`] and [`DocumentProcessor`] seams, plus an
//!   OpenAI-compatible embedding client behind the `openai` feature
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use adk_knowledge::{KnowledgeConfig, RetrievalEngine};
//!
//! let mut engine = RetrievalEngine::builder()
//!     .config(KnowledgeConfig::from_env()?)
//!     .embedding_provider(Arc::new(my_embedder))
//!     .build()?;
//!
//! engine.add_document("handbook.md", None).await?;
//! for chunk in engine.retrieve("vacation policy", Some(3)).await {
//!     println!("{:.3} {}", chunk.score, chunk.document_name);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod processor;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, ChunkingStrategy, ParagraphChunker, RecursiveChunker};
pub use config::{KnowledgeConfig, KnowledgeConfigBuilder};
pub use document::{
    Chunk, ChunkMetadata, Document, DocumentSummary, DocumentType, RetrievedChunk,
};
pub use embedding::EmbeddingProvider;
pub use engine::{
    EngineStats, IngestReport, RetrievalEngine, RetrievalEngineBuilder, SharedRetrievalEngine,
};
pub use error::{KnowledgeError, Result};
pub use index::FlatIndex;
pub use processor::{DocumentProcessor, TextDocumentProcessor};
pub use vectorstore::{StoreStats, VectorStore};
