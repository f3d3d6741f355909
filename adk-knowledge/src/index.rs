//! Exact inner-product index keyed by stable slot ids.
//!
//! [`FlatIndex`] keeps vectors in one contiguous row-major buffer and maps each slot id to
//! its row, so removal is an O(1) swap-remove and a removed vector can never be returned by
//! a later search.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::embedding::dot;
use crate::error::{KnowledgeError, Result};

/// A brute-force inner-product index with id-mapped rows.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<u64>,
    data: Vec<f32>,
    rows: HashMap<u64, usize>,
}

/// Serialized form of a [`FlatIndex`], written to `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexSnapshot {
    pub dimension: usize,
    pub ids: Vec<u64>,
    pub vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Create an empty index for vectors of `dimension` components.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::Config`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(KnowledgeError::Config("index dimension must be greater than zero".into()));
        }
        Ok(Self { dimension, ids: Vec::new(), data: Vec::new(), rows: HashMap::new() })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors currently indexed.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.rows.contains_key(&id)
    }

    /// The stored vector for `id`.
    pub fn get(&self, id: u64) -> Option<&[f32]> {
        let row = *self.rows.get(&id)?;
        Some(&self.data[row * self.dimension..(row + 1) * self.dimension])
    }

    /// Slot ids in row order.
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// Insert vectors under the given ids. Either every vector is inserted or none is.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::LengthMismatch`] if `ids` and `vectors` differ in length
    /// - [`KnowledgeError::DimensionMismatch`] if any vector has the wrong length
    /// - [`KnowledgeError::Validation`] if an id is already present or repeated
    pub fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(KnowledgeError::LengthMismatch {
                vectors: vectors.len(),
                metadata: ids.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|&&id| self.rows.contains_key(&id) || !seen.insert(id)) {
            return Err(KnowledgeError::validation(format!("slot id {dup} is already indexed")));
        }

        self.ids.reserve(ids.len());
        self.data.reserve(ids.len() * self.dimension);
        for (&id, vector) in ids.iter().zip(vectors) {
            self.rows.insert(id, self.ids.len());
            self.ids.push(id);
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Remove the vector stored under `id`. Returns `false` if it was not present.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(row) = self.rows.remove(&id) else {
            return false;
        };
        let d = self.dimension;
        let last = self.ids.len() - 1;
        if row != last {
            let moved = self.ids[last];
            self.ids[row] = moved;
            self.data.copy_within(last * d..(last + 1) * d, row * d);
            self.rows.insert(moved, row);
        }
        self.ids.pop();
        self.data.truncate(last * d);
        true
    }

    /// Remove every id in `ids`, returning how many were present.
    pub fn remove_ids(&mut self, ids: &[u64]) -> usize {
        ids.iter().filter(|&&id| self.remove(id)).count()
    }

    /// The `k` highest inner products with `query`, best first.
    ///
    /// Ties are broken by ascending slot id so rankings are reproducible. `query` must have
    /// [`dimension`](Self::dimension) components; callers validate this.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let k = k.min(self.len());
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(u64, f32)> = self
            .ids
            .iter()
            .zip(self.data.chunks_exact(self.dimension))
            .map(|(&id, row)| (id, dot(row, query)))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank_order);
        scored
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.data.clear();
        self.rows.clear();
    }

    pub(crate) fn to_snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            dimension: self.dimension,
            ids: self.ids.clone(),
            vectors: self.data.chunks_exact(self.dimension).map(<[f32]>::to_vec).collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        let mut index = Self::new(snapshot.dimension)
            .map_err(|_| KnowledgeError::Persistence("saved index has dimension 0".into()))?;
        index.add_with_ids(&snapshot.ids, &snapshot.vectors).map_err(|e| {
            KnowledgeError::Persistence(format!("saved index is inconsistent: {e}"))
        })?;
        Ok(index)
    }
}

fn rank_order(a: &(u64, f32), b: &(u64, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(vectors: &[(u64, [f32; 2])]) -> FlatIndex {
        let mut index = FlatIndex::new(2).unwrap();
        let ids: Vec<u64> = vectors.iter().map(|(id, _)| *id).collect();
        let vecs: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.to_vec()).collect();
        index.add_with_ids(&ids, &vecs).unwrap();
        index
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(FlatIndex::new(0).is_err());
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let index = index_with(&[(0, [1.0, 0.0]), (1, [0.0, 1.0]), (2, [0.6, 0.8])]);
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 2);
        assert!((hits[1].1 - 0.6).abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_slot_id() {
        let index = index_with(&[(7, [1.0, 0.0]), (3, [1.0, 0.0]), (5, [1.0, 0.0])]);
        let ids: Vec<u64> = index.search(&[1.0, 0.0], 3).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn removal_swaps_last_row_into_place() {
        let mut index = index_with(&[(0, [1.0, 0.0]), (1, [0.0, 1.0]), (2, [0.6, 0.8])]);
        assert!(index.remove(0));
        assert!(!index.remove(0));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(2), Some(&[0.6, 0.8][..]));
        assert_eq!(index.get(1), Some(&[0.0, 1.0][..]));
        let ids: Vec<u64> = index.search(&[1.0, 0.0], 5).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn failed_batch_inserts_nothing() {
        let mut index = index_with(&[(0, [1.0, 0.0])]);
        let err = index.add_with_ids(&[1, 0], &[vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(index.len(), 1);

        let err = index.add_with_ids(&[4], &[vec![1.0, 2.0, 3.0]]).unwrap_err();
        assert!(matches!(err, KnowledgeError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn snapshot_round_trip_preserves_rows() {
        let index = index_with(&[(4, [1.0, 0.0]), (9, [0.0, 1.0])]);
        let restored = FlatIndex::from_snapshot(index.to_snapshot()).unwrap();
        assert_eq!(restored.ids(), &[4, 9]);
        assert_eq!(restored.get(9), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn inconsistent_snapshot_is_a_persistence_error() {
        let snapshot = IndexSnapshot { dimension: 2, ids: vec![1, 2], vectors: vec![vec![1.0, 0.0]] };
        assert!(matches!(FlatIndex::from_snapshot(snapshot), Err(KnowledgeError::Persistence(_))));
    }
}
