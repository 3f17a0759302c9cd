//! Embedding generation for semantic memory.
//!
//! The provider is a plug point: real deployments swap in an external
//! embedding service. The default is fully deterministic so identical
//! content always lands at the same point on the unit sphere.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::vector::VECTOR_DIMENSION;

/// Trait for embedding providers.
pub trait EmbeddingProvider {
    /// Embed raw content bytes into a unit vector.
    fn embed(&self, bytes: &[u8]) -> [f32; VECTOR_DIMENSION];

    /// Provider name, for logs.
    fn name(&self) -> &'static str;
}

/// Deterministic default: a multiplicative rolling hash of the content
/// seeds a PRNG, which fills the components; the result is normalized.
pub struct HashEmbedding;

impl EmbeddingProvider for HashEmbedding {
    fn embed(&self, bytes: &[u8]) -> [f32; VECTOR_DIMENSION] {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in bytes {
            hash = hash.wrapping_mul(0x0100_0000_01b3).wrapping_add(b as u64);
        }

        let mut rng = StdRng::seed_from_u64(hash);
        let mut dims = [0.0f32; VECTOR_DIMENSION];
        for d in &mut dims {
            *d = rng.gen_range(-1.0f32..1.0f32);
        }

        let norm = crate::types::vector::magnitude(&dims);
        if norm == 0.0 {
            // 128 uniform draws never sum to zero in practice; keep a
            // defined output anyway.
            dims[0] = 1.0;
            return dims;
        }
        for d in &mut dims {
            *d /= norm;
        }
        dims
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::vector::magnitude;

    #[test]
    fn deterministic_per_content() {
        let a = HashEmbedding.embed(b"User prefers concise answers");
        let b = HashEmbedding.embed(b"User prefers concise answers");
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_differs() {
        let a = HashEmbedding.embed(b"alpha");
        let b = HashEmbedding.embed(b"beta");
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_unit() {
        for content in [&b"x"[..], b"", b"a longer piece of content with many words"] {
            let dims = HashEmbedding.embed(content);
            assert!((magnitude(&dims) - 1.0).abs() < 1e-5);
        }
    }
}
