//! Embedding backends.
//!
//! Everything that turns text into vectors goes through [`Embedder`], and
//! every call the indexing core makes goes through [`embed_batched`], which
//! checks what the backend hands back before it can reach the index.

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Dimension of the default embedding space (all-MiniLM-L6-v2 sized).
pub const DEFAULT_DIMENSION: usize = 384;

/// Default number of texts sent to a backend per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

pub trait Embedder: Send + Sync {
    /// Identifier recorded in status output.
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed `texts`, returning one vector per input in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size` and validate the output.
///
/// A short or long response is reported as [`Error::EmbeddingUnavailable`];
/// a vector of the wrong length as [`Error::DimensionMismatch`].
pub fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let expected = embedder.dimension();
    let mut vectors = Vec::with_capacity(texts.len());

    for (n, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        trace!(batch = n, size = batch.len(), "embedding batch");
        let out = embedder.embed(batch)?;
        if out.len() != batch.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "{} returned {} vectors for {} inputs",
                embedder.model_name(),
                out.len(),
                batch.len()
            )));
        }
        if let Some(bad) = out.iter().find(|v| v.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        vectors.extend(out);
    }

    debug!(
        model = embedder.model_name(),
        count = vectors.len(),
        "embedded texts"
    );
    Ok(vectors)
}

/// Deterministic feature-hashing embedder.
///
/// Each lower-cased alphanumeric token is hashed with blake3 into a signed
/// bucket, and the resulting vector is L2-normalized. There is no model to
/// download, and the same text maps to the same vector on every machine,
/// which keeps the index usable offline and in tests. Texts that share
/// words land close together; it does not capture meaning beyond that.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const MODEL_NAME: &'static str = "hash";

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];

        for token in tokens(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
                bytes[6], bytes[7],
            ]) % self.dimension as u64;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket as usize] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::squared_l2;

    /// Returns vectors of a fixed length regardless of what it claims.
    struct Lying {
        claimed: usize,
        actual: usize,
        drop_one: bool,
    }

    impl Embedder for Lying {
        fn model_name(&self) -> &str {
            "lying"
        }

        fn dimension(&self) -> usize {
            self.claimed
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let n = texts.len() - usize::from(self.drop_one);
            Ok(vec![vec![0.0; self.actual]; n])
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(64);
        let a = e.embed_one("Rust is a systems language");
        let b = e.embed_one("rust IS a systems, language!");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embedder_empty_text_is_zero_vector() {
        let e = HashEmbedder::new(16);
        assert_eq!(e.embed_one("  ... "), vec![0.0; 16]);
    }

    #[test]
    fn shared_words_are_closer() {
        let e = HashEmbedder::new(DEFAULT_DIMENSION);
        let query = e.embed_one("gamma delta epsilon");
        let near = e.embed_one("gamma delta epsilon zeta");
        let far = e.embed_one("completely unrelated words here");
        assert!(squared_l2(&query, &near) < squared_l2(&query, &far));
    }

    #[test]
    fn batched_splits_and_keeps_order() {
        let e = HashEmbedder::new(32);
        let input = texts(&["one", "two", "three", "four", "five"]);
        let out = embed_batched(&e, &input, 2).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[3], e.embed_one("four"));
    }

    #[test]
    fn batched_rejects_wrong_dimension() {
        let e = Lying {
            claimed: 8,
            actual: 4,
            drop_one: false,
        };
        let err = embed_batched(&e, &texts(&["a"]), 8).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[test]
    fn batched_rejects_missing_vectors() {
        let e = Lying {
            claimed: 4,
            actual: 4,
            drop_one: true,
        };
        let err = embed_batched(&e, &texts(&["a", "b"]), 8).unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }

    #[test]
    fn batched_empty_input() {
        let e = HashEmbedder::new(8);
        assert!(embed_batched(&e, &[], 4).unwrap().is_empty());
    }
}
