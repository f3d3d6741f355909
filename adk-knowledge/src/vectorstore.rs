//! Vector store holding normalised embeddings and their chunk metadata.
//!
//! [`VectorStore`] pairs a [`FlatIndex`] with a slot id → [`ChunkMetadata`] map and the
//! counters needed to persist and restore both. Every vector is L2-normalised on insert, so
//! search scores are cosine similarities in `[-1, 1]`.
//!
//! Mutating methods take `&mut self`; callers sharing a store across tasks must serialise
//! writes themselves (for example behind a `tokio::sync::Mutex`).
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_knowledge::VectorStore;
//!
//! let mut store = VectorStore::new(384)?;
//! store.add(embeddings, metadata)?;
//! let hits = store.search(&query_embedding, 5)?;
//! store.save("data/vector_store")?;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::ChunkMetadata;
use crate::embedding::normalize_in_place;
use crate::error::{KnowledgeError, Result};
use crate::index::{FlatIndex, IndexSnapshot};

/// File holding the serialized index inside a store directory.
pub const INDEX_FILE: &str = "index.json";
/// File holding metadata and counters inside a store directory.
pub const METADATA_FILE: &str = "metadata.json";

/// An exact cosine-similarity vector store with typed metadata and disk snapshots.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    index: FlatIndex,
    metadata: BTreeMap<u64, ChunkMetadata>,
    next_id: u64,
    doc_count: usize,
    last_updated: Option<DateTime<Utc>>,
}

/// A point-in-time summary of a [`VectorStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreStats {
    /// Vectors ever inserted (the next slot id).
    pub vector_count: u64,
    /// Vectors currently searchable.
    pub live_vectors: usize,
    /// Distinct documents currently represented.
    pub document_count: usize,
    pub dimension: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct MetadataFileRef<'a> {
    metadata: &'a BTreeMap<u64, ChunkMetadata>,
    next_id: u64,
    doc_count: usize,
    dimension: usize,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct MetadataFile {
    metadata: BTreeMap<u64, ChunkMetadata>,
    next_id: u64,
    doc_count: usize,
    dimension: usize,
    last_updated: Option<DateTime<Utc>>,
}

impl VectorStore {
    /// Create an empty store for embeddings of `dimension` components.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::Config`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        Ok(Self {
            dimension,
            index: FlatIndex::new(dimension)?,
            metadata: BTreeMap::new(),
            next_id: 0,
            doc_count: 0,
            last_updated: None,
        })
    }

    /// Add a batch of vectors with one metadata record each.
    ///
    /// Vectors are normalised and assigned consecutive slot ids starting at the current
    /// `next_id`. The whole batch is validated before anything is stored, so a failed call
    /// leaves the store untouched. An empty batch is a no-op.
    ///
    /// Returns the number of vectors added.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::LengthMismatch`] if `vectors` and `metadata` differ in length
    /// - [`KnowledgeError::DimensionMismatch`] if a vector has the wrong dimension
    /// - [`KnowledgeError::Validation`] if a vector contains NaN or infinite values
    pub fn add(&mut self, mut vectors: Vec<Vec<f32>>, metadata: Vec<ChunkMetadata>) -> Result<usize> {
        if vectors.len() != metadata.len() {
            warn!(vectors = vectors.len(), metadata = metadata.len(), "rejected mismatched batch");
            return Err(KnowledgeError::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(0);
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(KnowledgeError::validation("embedding contains non-finite values"));
            }
        }

        vectors.iter_mut().for_each(|v| normalize_in_place(v));
        let count = vectors.len();
        let ids: Vec<u64> = (self.next_id..self.next_id + count as u64).collect();
        self.index.add_with_ids(&ids, &vectors)?;
        self.metadata.extend(ids.into_iter().zip(metadata));
        self.next_id += count as u64;
        self.refresh_doc_count();
        self.last_updated = Some(Utc::now());

        info!(added = count, total = self.next_id, "added vectors to store");
        Ok(count)
    }

    /// Add a single vector, as a one-element batch.
    pub fn add_one(&mut self, vector: Vec<f32>, metadata: ChunkMetadata) -> Result<usize> {
        self.add(vec![vector], vec![metadata])
    }

    /// The `top_k` entries most similar to `query`, best first.
    ///
    /// `top_k` is clamped to the number of live vectors. An empty store returns no results
    /// for any query.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::DimensionMismatch`] if `query` has the wrong dimension.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(ChunkMetadata, f32)>> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;

        let mut query = query.to_vec();
        normalize_in_place(&mut query);
        let hits = self.index.search(&query, top_k);
        debug!(top_k, hit_count = hits.len(), "vector search");

        Ok(hits
            .into_iter()
            .filter_map(|(slot, score)| {
                self.metadata.get(&slot).map(|meta| (meta.clone(), score.clamp(-1.0, 1.0)))
            })
            .collect())
    }

    /// Remove every vector and metadata record belonging to `document_id`.
    ///
    /// Returns the number of entries removed. Slot ids are never reused, so
    /// [`size`](Self::size) is unchanged.
    pub fn remove_by_document(&mut self, document_id: Uuid) -> usize {
        let slots: Vec<u64> = self
            .metadata
            .iter()
            .filter(|(_, meta)| meta.document_id == document_id)
            .map(|(slot, _)| *slot)
            .collect();
        if slots.is_empty() {
            return 0;
        }

        for slot in &slots {
            self.metadata.remove(slot);
        }
        let removed = self.index.remove_ids(&slots);
        if removed != slots.len() {
            warn!(%document_id, metadata = slots.len(), vectors = removed, "index and metadata disagreed");
        }
        self.refresh_doc_count();
        self.last_updated = Some(Utc::now());

        info!(%document_id, removed = slots.len(), "removed document from store");
        slots.len()
    }

    /// Reset the store to empty, including the slot id counter.
    pub fn clear(&mut self) {
        self.index.clear();
        self.metadata.clear();
        self.next_id = 0;
        self.doc_count = 0;
        self.last_updated = Some(Utc::now());
        info!("vector store cleared");
    }

    /// Write the index and metadata snapshots into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::Io`] or [`KnowledgeError::Serialization`] on failure.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        write_json_atomic(&dir.join(INDEX_FILE), &self.index.to_snapshot())?;
        write_json_atomic(
            &dir.join(METADATA_FILE),
            &MetadataFileRef {
                metadata: &self.metadata,
                next_id: self.next_id,
                doc_count: self.doc_count,
                dimension: self.dimension,
                last_updated: self.last_updated,
            },
        )?;
        info!(path = %dir.display(), vectors = self.index.len(), "vector store saved");
        Ok(())
    }

    /// Replace this store's state with the snapshot saved in `dir`.
    ///
    /// Returns `Ok(false)` if `dir` holds no saved store. The current state is only
    /// replaced once the whole snapshot has been read and validated.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::DimensionMismatch`] if the snapshot was saved with another dimension
    /// - [`KnowledgeError::Persistence`] if the index and metadata disagree
    /// - [`KnowledgeError::Io`] or [`KnowledgeError::Serialization`] if a file cannot be read
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<bool> {
        let dir = dir.as_ref();
        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            warn!(path = %dir.display(), "no saved vector store found");
            return Ok(false);
        }
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Err(KnowledgeError::Persistence(format!(
                "{} exists but {} is missing",
                index_path.display(),
                metadata_path.display()
            )));
        }

        let saved: MetadataFile = read_json(&metadata_path)?;
        if saved.dimension != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: saved.dimension,
            });
        }
        let snapshot: IndexSnapshot = read_json(&index_path)?;
        if snapshot.dimension != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: snapshot.dimension,
            });
        }
        let index = FlatIndex::from_snapshot(snapshot)?;

        if index.len() != saved.metadata.len()
            || saved.metadata.keys().any(|slot| !index.contains(*slot))
        {
            return Err(KnowledgeError::Persistence(format!(
                "index holds {} vectors but metadata describes {} different entries",
                index.len(),
                saved.metadata.len()
            )));
        }
        if saved.metadata.keys().next_back().is_some_and(|max| *max >= saved.next_id) {
            return Err(KnowledgeError::Persistence(
                "next_id is behind the saved slot ids".to_string(),
            ));
        }

        self.index = index;
        self.metadata = saved.metadata;
        self.next_id = saved.next_id;
        self.last_updated = saved.last_updated;
        self.refresh_doc_count();
        if self.doc_count != saved.doc_count {
            debug!(saved = saved.doc_count, actual = self.doc_count, "recomputed document count");
        }

        info!(path = %dir.display(), vectors = self.index.len(), "vector store loaded");
        Ok(true)
    }

    /// Vectors ever inserted; slot ids are never reused, so removal does not lower this.
    pub fn size(&self) -> u64 {
        self.next_id
    }

    /// Vectors currently searchable.
    pub fn live_vectors(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Distinct documents currently represented in the store.
    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Whether any live vector belongs to `document_id`.
    pub fn contains_document(&self, document_id: Uuid) -> bool {
        self.metadata.values().any(|m| m.document_id == document_id)
    }

    /// Metadata stored under a slot id.
    pub fn metadata(&self, slot: u64) -> Option<&ChunkMetadata> {
        self.metadata.get(&slot)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            vector_count: self.next_id,
            live_vectors: self.index.len(),
            document_count: self.doc_count,
            dimension: self.dimension,
            last_updated: self.last_updated,
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn refresh_doc_count(&mut self) {
        self.doc_count =
            self.metadata.values().map(|m| m.document_id).collect::<HashSet<_>>().len();
    }
}

/// Serialize `value` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(File::create(&tmp)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
