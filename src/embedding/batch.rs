//! Batch slicing with the halve-and-retry-once fallback.

use anyhow::{bail, Result};
use reportportal_sync_core::embedding::Embedder;

/// Result of [`embed_batched`]. `vectors[i]` is `None` when text `i`
/// could not be embedded.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub vectors: Vec<Option<Vec<f32>>>,
    /// Provider calls made, including retries.
    pub batches: u64,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn failed(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_none()).count()
    }
}

/// Embed `texts` in slices of at most `batch_size`.
///
/// A failing slice is split in two and each half is tried once more.
/// Texts in a half that fails again come back as `None`; the rest of the
/// input is unaffected.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        vectors: Vec::with_capacity(texts.len()),
        ..BatchOutcome::default()
    };

    for chunk in texts.chunks(batch_size.max(1)) {
        outcome.batches += 1;
        match embed_checked(embedder, chunk).await {
            Ok(vectors) => outcome.vectors.extend(vectors.into_iter().map(Some)),
            Err(e) => {
                tracing::warn!(
                    size = chunk.len(),
                    error = %e,
                    "embedding batch failed, retrying in halves"
                );
                let mid = chunk.len().div_ceil(2);
                let (left, right) = chunk.split_at(mid);
                for half in [left, right] {
                    if half.is_empty() {
                        continue;
                    }
                    outcome.batches += 1;
                    match embed_checked(embedder, half).await {
                        Ok(vectors) => outcome.vectors.extend(vectors.into_iter().map(Some)),
                        Err(e) => {
                            outcome.errors.push(e.to_string());
                            outcome.vectors.extend(half.iter().map(|_| None));
                        }
                    }
                }
            }
        }
    }

    outcome
}

async fn embed_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts).await?;
    if vectors.len() != texts.len() {
        bail!(
            "embedding provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dims()) {
        bail!(
            "embedding dimension mismatch: expected {}, got {}",
            embedder.dims(),
            bad.len()
        );
    }
    Ok(vectors)
}
