// crates/molt-core/src/embedding.rs

use async_trait::async_trait;

use crate::error::MoltError;
use crate::traits::Embedder;

/// Deterministic pseudo-embedding, L2-normalized.
///
/// SHA-256 runs in counter mode over the text: block `n` hashes
/// `text || n` and yields eight signed 32-bit lanes, each scaled to [-1, 1].
/// Identical text always yields an identical vector. No ML model required.
pub fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};

    let mut raw: Vec<f32> = Vec::with_capacity(dimensions);
    let mut block = 0u64;
    while raw.len() < dimensions {
        let digest = Sha256::new()
            .chain_update(text.as_bytes())
            .chain_update(block.to_le_bytes())
            .finalize();
        for lane in digest.chunks_exact(4) {
            if raw.len() == dimensions {
                break;
            }
            let word = i32::from_le_bytes([lane[0], lane[1], lane[2], lane[3]]);
            raw.push((word as f64 / i32::MAX as f64) as f32);
        }
        block += 1;
    }

    let norm = l2_norm(&raw);
    if norm > 0.0 {
        raw.iter_mut().for_each(|v| *v = (*v as f64 / norm) as f32);
    }
    raw
}

/// L2 norm, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine similarity between two vectors.
///
/// Vectors of unequal length are truncated to the shorter one. A zero-norm
/// side yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

/// `Embedder` backed by [`hash_embedding`].
///
/// The model tag salts every input, so two embedders with different tags
/// behave like two different model versions.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        hash_embedding(&format!("{}:{}", self.model, text), self.dimension)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoltError> {
        if self.dimension == 0 {
            return Err(MoltError::Embedding("dimension must be non-zero".to_string()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
