//! # Knowledge Base Example
//!
//! Ingests a few in-memory documents, retrieves chunks for some queries, builds a prompt
//! context string, then removes a document and prints the engine statistics.
//!
//! Uses a bag-of-words `WordHashEmbedder` so it runs with **zero API keys**. Set
//! `KNOWLEDGE_VECTOR_STORE_DIR` to persist the store between runs; by default it stays in
//! memory.
//!
//! Run: `RUST_LOG=adk_knowledge=debug cargo run -p adk-knowledge --example knowledge_basic`

use std::sync::Arc;

use adk_knowledge::{EmbeddingProvider, KnowledgeConfig, RetrievalEngine};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// WordHashEmbedder: each lowercase word adds weight to a hashed bucket, so texts
// sharing vocabulary point in similar directions.
// ---------------------------------------------------------------------------

struct WordHashEmbedder {
    dimensions: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for WordHashEmbedder {
    async fn embed(&self, text: &str) -> adk_knowledge::Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
            embedding[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

const DOCUMENTS: [(&str, &str); 3] = [
    (
        "rust.md",
        "# Rust\n\nRust is a systems programming language focused on **safety**, speed and \
         concurrency.\n\nIt achieves memory safety without a garbage collector through its \
         ownership system and the borrow checker.",
    ),
    (
        "python.txt",
        "Python is a high-level, interpreted programming language known for its readability.\n\n\
         It is widely used in data science, web development and automation.",
    ),
    (
        "rag.txt",
        "Retrieval-augmented generation combines a retrieval system with a language model.\n\n\
         Documents are chunked, embedded and stored in a vector index. At query time the most \
         relevant chunks are retrieved and passed to the model as context.",
    ),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // -- 1. Configure: environment overrides, in memory unless a directory is given ----
    let mut config = KnowledgeConfig::from_env()?;
    if std::env::var_os("KNOWLEDGE_VECTOR_STORE_DIR").is_none() {
        config.vector_store_dir = None;
    }
    config.chunk_size = 120;
    config.chunk_overlap = 20;
    config.top_k = 3;
    config.validate()?;

    let mut engine = RetrievalEngine::builder()
        .config(config)
        .embedding_provider(Arc::new(WordHashEmbedder { dimensions: 256 }))
        .build()?;

    // -- 2. Ingest -------------------------------------------------------------------
    for (name, body) in DOCUMENTS {
        match engine.add_document(name, Some(body.as_bytes())).await {
            Ok(report) => println!("{}", report.message()),
            Err(e) => println!("Skipped {name}: {e}"),
        }
    }

    // -- 3. Retrieve -----------------------------------------------------------------
    for query in ["memory safety without garbage collection", "data science", "vector index"] {
        println!("\nQuery: \"{query}\"");
        for (i, chunk) in engine.retrieve(query, None).await.iter().enumerate() {
            let preview: String = chunk.text.chars().take(70).collect();
            println!("  {}. [score={:.4}] {} | {}", i + 1, chunk.score, chunk.document_name, preview);
        }
    }

    // -- 4. Prompt context -----------------------------------------------------------
    let context = engine.get_context_string("how does rust manage memory", Some(400)).await;
    println!("\nContext:\n{context}");

    // -- 5. Remove and report --------------------------------------------------------
    if let Some(python) = engine.get_document_list().into_iter().find(|d| d.name == "python.txt") {
        println!("\nRemoved python.txt: {}", engine.remove_document(python.id));
    }
    for summary in engine.get_document_list() {
        println!("  {} ({}, {} chunks, {} bytes)", summary.name, summary.doc_type, summary.chunk_count, summary.size_bytes);
    }
    println!("\nStats: {}", serde_json::to_string_pretty(&engine.get_stats())?);

    Ok(())
}
