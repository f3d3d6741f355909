//! End-to-end tests for the retrieval engine.

mod common;

use std::path::Path;
use std::sync::Arc;

use adk_knowledge::{
    Chunker, KnowledgeConfig, KnowledgeError, RecursiveChunker, RetrievalEngine,
};
use common::{FailingEmbedder, HashEmbedder};

const DIM: usize = 64;

const HANDBOOK: &str = "Employees accrue vacation days every month they work.\n\n\
    Remote work is allowed on Tuesdays and Thursdays with manager approval.\n\n\
    Expense reports must be filed within thirty days of purchase.";

fn config(chunk_size: usize, chunk_overlap: usize) -> KnowledgeConfig {
    KnowledgeConfig::builder()
        .in_memory()
        .chunk_size(chunk_size)
        .chunk_overlap(chunk_overlap)
        .build()
        .unwrap()
}

fn engine_with(config: KnowledgeConfig) -> RetrievalEngine {
    RetrievalEngine::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedder::new(DIM)))
        .build()
        .unwrap()
}

fn persistent_engine(dir: &Path) -> adk_knowledge::Result<RetrievalEngine> {
    RetrievalEngine::builder()
        .config(
            KnowledgeConfig::builder()
                .vector_store_dir(dir)
                .chunk_size(60)
                .chunk_overlap(10)
                .build()?,
        )
        .embedding_provider(Arc::new(HashEmbedder::new(DIM)))
        .build()
}

#[tokio::test]
async fn three_paragraphs_become_retrievable_chunks() {
    let mut engine = engine_with(config(50, 10));
    let report = engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();

    assert!(report.chunk_count >= 2);
    assert_eq!(report.message(), format!("Added 'handbook.txt' ({} chunks)", report.chunk_count));

    let document = engine.get_document(report.document_id).unwrap();
    assert_eq!(document.chunks.len(), report.chunk_count);
    assert!(document.chunks.iter().all(|c| c.document_id == report.document_id));
    assert!(document.chunks.iter().all(|c| c.text.chars().count() <= 60));

    let first = &document.chunks[0];
    let results = engine.retrieve(&first.text, Some(3)).await;
    assert_eq!(results[0].id, first.id);
    assert_eq!(results[0].document_name, "handbook.txt");
    assert!((results[0].score - 1.0).abs() < 1e-4);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn empty_file_is_rejected_and_registry_unchanged() {
    let mut engine = engine_with(config(512, 50));
    let err = engine.add_document("empty.txt", Some(b"".as_slice())).await.unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("No text content"));
    assert!(engine.get_document_list().is_empty());
    assert_eq!(engine.get_stats().store.vector_count, 0);
}

#[tokio::test]
async fn duplicate_content_is_rejected() {
    let mut engine = engine_with(config(512, 50));
    engine.add_document("notes.md", Some(b"# Notes\n\nSame text.".as_slice())).await.unwrap();
    let err = engine
        .add_document("notes.md", Some(b"# Notes\n\nSame text.".as_slice()))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Document already exists");
    assert_eq!(engine.get_document_list().len(), 1);
    assert_eq!(engine.store().size(), 1);
}

#[tokio::test]
async fn file_type_and_size_are_validated_first() {
    let config = KnowledgeConfig::builder().in_memory().max_file_size_mb(1).build().unwrap();
    let mut engine = engine_with(config);

    let err = engine.add_document("slides.pptx", Some(b"data".as_slice())).await.unwrap_err();
    assert!(err.to_string().starts_with("Invalid file type. Allowed:"));

    let oversized = vec![b'a'; 1024 * 1024 + 1];
    let err = engine.add_document("big.txt", Some(oversized.as_slice())).await.unwrap_err();
    assert_eq!(err.to_string(), "File too large. Max size: 1MB");

    let err = engine.add_document("/no/such/dir/missing.txt", None).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::NotFound(_)));

    assert!(engine.get_document_list().is_empty());
}

#[tokio::test]
async fn reads_documents_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guide.md");
    std::fs::write(&path, "## Install\n\nRun the **installer** and follow the prompts.").unwrap();

    let mut engine = engine_with(config(512, 50));
    let report = engine.add_document(&path, None).await.unwrap();

    let document = engine.get_document(report.document_id).unwrap();
    assert_eq!(document.name, "guide.md");
    assert_eq!(document.content, "Install\n\nRun the installer and follow the prompts.");
}

#[tokio::test]
async fn retrieve_on_empty_engine_returns_nothing() {
    let engine = engine_with(config(512, 50));
    assert!(engine.retrieve("anything", None).await.is_empty());
    assert_eq!(engine.get_context_string("anything", None).await, "");
}

#[tokio::test]
async fn context_string_respects_budget() {
    let mut engine = engine_with(config(50, 10));
    engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();

    let full = engine.get_context_string("vacation", Some(10_000)).await;
    assert!(full.starts_with("[Source: handbook.txt]: "));
    assert!(full.matches("[Source: handbook.txt]").count() >= 2);

    for budget in [1, 40, 80, 120, 200] {
        let context = engine.get_context_string("vacation", Some(budget)).await;
        assert!(context.chars().count() <= budget, "budget {budget}: {context:?}");
    }
    assert_eq!(engine.get_context_string("vacation", Some(1)).await, "");
}

#[tokio::test]
async fn remove_document_drops_every_chunk() {
    let mut engine = engine_with(config(50, 10));
    let handbook = engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
    let other = engine
        .add_document("other.txt", Some(b"Completely unrelated content.".as_slice()))
        .await
        .unwrap();
    let size_before = engine.store().size();

    assert!(engine.remove_document(handbook.document_id));
    assert!(!engine.remove_document(handbook.document_id));

    let listed: Vec<_> = engine.get_document_list().into_iter().map(|d| d.id).collect();
    assert_eq!(listed, vec![other.document_id]);
    assert_eq!(engine.store().size(), size_before);
    assert_eq!(engine.store().live_vectors(), other.chunk_count);

    let results = engine.retrieve("vacation days", Some(10)).await;
    assert!(results.iter().all(|r| r.document_id == other.document_id));
}

#[tokio::test]
async fn clear_all_resets_everything() {
    let mut engine = engine_with(config(50, 10));
    engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();

    assert!(engine.clear_all());
    let stats = engine.get_stats();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.store.vector_count, 0);
    assert_eq!(stats.store.document_count, 0);
    assert!(engine.retrieve("vacation", None).await.is_empty());
}

#[tokio::test]
async fn similarity_threshold_filters_weak_matches() {
    let config = KnowledgeConfig::builder()
        .in_memory()
        .chunk_size(50)
        .chunk_overlap(10)
        .similarity_threshold(0.99)
        .build()
        .unwrap();
    let mut engine = engine_with(config);
    let report = engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
    let target = engine.get_document(report.document_id).unwrap().chunks[1].clone();

    let results = engine.retrieve(&target.text, Some(10)).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, target.id);
}

#[tokio::test]
async fn injected_chunker_overrides_strategy() {
    let chunker = Arc::new(RecursiveChunker::new(30, 0));
    let expected = chunker.split_text(HANDBOOK).len();
    let mut engine = RetrievalEngine::builder()
        .config(config(512, 50))
        .embedding_provider(Arc::new(HashEmbedder::new(DIM)))
        .chunker(chunker)
        .build()
        .unwrap();

    let report = engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
    assert_eq!(report.chunk_count, expected);
    assert!(expected > 3);
}

#[tokio::test]
async fn embedding_failure_leaves_engine_unchanged() {
    let mut engine = RetrievalEngine::builder()
        .config(config(512, 50))
        .embedding_provider(Arc::new(FailingEmbedder::new(DIM)))
        .build()
        .unwrap();

    let err = engine.add_document("a.txt", Some(b"some text".as_slice())).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Embedding { .. }));
    assert!(engine.get_document_list().is_empty());
    assert_eq!(engine.store().size(), 0);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let report = {
        let mut engine = persistent_engine(dir.path()).unwrap();
        let report = engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
        assert!(report.persisted);
        engine
            .add_document("other.txt", Some(b"Second document body.".as_slice()))
            .await
            .unwrap();
        report
    };
    assert!(dir.path().join("index.json").exists());
    assert!(dir.path().join("metadata.json").exists());
    assert!(dir.path().join("documents.json").exists());

    let mut engine = persistent_engine(dir.path()).unwrap();
    assert_eq!(engine.get_document_list().len(), 2);
    let first = engine.get_document(report.document_id).unwrap().chunks[0].clone();
    let results = engine.retrieve(&first.text, Some(1)).await;
    assert_eq!(results[0].id, first.id);

    assert!(engine.remove_document(report.document_id));
    drop(engine);

    let engine = persistent_engine(dir.path()).unwrap();
    assert_eq!(engine.get_document_list().len(), 1);
    assert!(engine.get_document(report.document_id).is_none());
}

#[tokio::test]
async fn unreadable_snapshot_is_kept_until_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = persistent_engine(dir.path()).unwrap();
    engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
    drop(engine);
    std::fs::remove_file(dir.path().join("metadata.json")).unwrap();
    let saved_index = std::fs::read(dir.path().join("index.json")).unwrap();

    let mut engine = persistent_engine(dir.path()).unwrap();
    assert!(engine.get_document_list().is_empty());
    assert_eq!(engine.store().live_vectors(), 0);

    let report = engine.add_document("other.txt", Some(b"A fresh document.".as_slice())).await.unwrap();
    assert!(!report.persisted);
    assert!(matches!(engine.save(), Err(KnowledgeError::Persistence(_))));
    assert_eq!(std::fs::read(dir.path().join("index.json")).unwrap(), saved_index);
    assert!(!dir.path().join("metadata.json").exists());

    assert!(engine.clear_all());
    assert!(dir.path().join("metadata.json").exists());
    drop(engine);

    let engine = persistent_engine(dir.path()).unwrap();
    assert_eq!(engine.store().live_vectors(), 0);
    assert!(engine.save().is_ok());
}

#[tokio::test]
async fn restart_with_other_dimension_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = persistent_engine(dir.path()).unwrap();
    engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
    drop(engine);

    let err = RetrievalEngine::builder()
        .config(KnowledgeConfig::builder().vector_store_dir(dir.path()).build().unwrap())
        .embedding_provider(Arc::new(HashEmbedder::new(DIM * 2)))
        .build()
        .err()
        .unwrap();
    assert!(err.is_fatal());
    assert!(matches!(err, KnowledgeError::DimensionMismatch { expected: 128, actual: 64 }));
}

#[tokio::test]
async fn retrieval_errors_yield_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = persistent_engine(dir.path()).unwrap();
    engine.add_document("handbook.txt", Some(HANDBOOK.as_bytes())).await.unwrap();
    drop(engine);

    let engine = RetrievalEngine::builder()
        .config(
            KnowledgeConfig::builder()
                .vector_store_dir(dir.path())
                .chunk_size(60)
                .chunk_overlap(10)
                .build()
                .unwrap(),
        )
        .embedding_provider(Arc::new(FailingEmbedder::new(DIM)))
        .build()
        .unwrap();
    assert!(engine.store().live_vectors() > 0);
    assert!(engine.retrieve("vacation", None).await.is_empty());
    assert_eq!(engine.get_context_string("vacation", None).await, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_engine_serialises_writers() {
    let shared = engine_with(config(512, 50)).into_shared();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            let body = format!("Document number {i} has its own body.");
            let mut engine = engine.lock().await;
            engine.add_document(format!("doc{i}.txt"), Some(body.as_bytes())).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let engine = shared.lock().await;
    assert_eq!(engine.get_document_list().len(), 8);
    assert_eq!(engine.store().size(), 8);
    assert_eq!(engine.get_stats().store.document_count, 8);
}
