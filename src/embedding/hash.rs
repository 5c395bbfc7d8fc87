//! Deterministic feature-hashing embedder.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reportportal_sync_core::embedding::{l2_normalize, Embedder};
use sha2::{Digest, Sha256};

/// Maps each lowercase alphanumeric token to a bucket and a sign derived
/// from its SHA-256 digest, then L2-normalizes the counts.
///
/// Useful offline and in tests: identical text always yields the same
/// vector and overlapping vocabularies score high under cosine similarity.
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model: format!("hash-{}", dims),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dims == 0 {
            bail!("hash embedder requires dims > 0");
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportportal_sync_core::embedding::cosine_similarity;

    #[tokio::test]
    async fn same_text_same_vector() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["Login test failed".to_string(), "login TEST failed".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(vectors[0].len(), 64);
    }

    #[tokio::test]
    async fn shared_tokens_score_higher() {
        let embedder = HashEmbedder::new(256);
        let texts = vec![
            "checkout payment timeout".to_string(),
            "payment timeout in checkout flow".to_string(),
            "user profile avatar upload".to_string(),
        ];
        let v = embedder.embed(&texts).await.unwrap();
        assert!(cosine_similarity(&v[0], &v[1]) > cosine_similarity(&v[0], &v[2]));
    }

    #[tokio::test]
    async fn zero_dims_is_an_error() {
        let embedder = HashEmbedder::new(0);
        assert!(embedder.embed(&["x".to_string()]).await.is_err());
    }
}
