//! Shared test fixtures: deterministic embedding providers.

#![allow(dead_code)]

use adk_knowledge::{EmbeddingProvider, KnowledgeError, Result};
use async_trait::async_trait;

/// Pseudo-random embedding seeded by an FNV-1a hash of the text.
///
/// Identical texts always map to identical vectors; different texts map to nearly
/// orthogonal ones in high dimensions.
pub fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut state = text
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
    if state == 0 {
        state = 0x9e37_79b9_7f4a_7c15;
    }
    (0..dimensions)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect()
}

/// An [`EmbeddingProvider`] backed by [`hash_embedding`].
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_embedding(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// An [`EmbeddingProvider`] whose backend is always down.
#[derive(Debug, Clone, Copy)]
pub struct FailingEmbedder {
    dimensions: usize,
}

impl FailingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(KnowledgeError::embedding("failing", "backend unavailable"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
