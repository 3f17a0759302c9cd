//! The fixed-dimension vector record.

use super::error::{MemoraError, MemoraResult};

/// Global vector dimension.
pub const VECTOR_DIMENSION: usize = 128;

/// Tolerance for the unit-norm invariant: all stored vectors satisfy
/// `|‖v‖ − 1| < UNIT_NORM_TOLERANCE`.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-5;

/// A fixed-dimension feature vector keyed by node id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    /// Id of the node this vector belongs to.
    pub id: u64,
    /// Unit-normalized components.
    pub dims: [f32; VECTOR_DIMENSION],
}

impl Vector {
    /// Create a vector, validating the unit-norm invariant.
    pub fn new(id: u64, dims: [f32; VECTOR_DIMENSION]) -> MemoraResult<Self> {
        let norm = magnitude(&dims);
        if (norm - 1.0).abs() >= UNIT_NORM_TOLERANCE {
            return Err(MemoraError::NotNormalized { norm });
        }
        Ok(Self { id, dims })
    }

    /// Create a vector from a slice, validating dimension and norm.
    pub fn from_slice(id: u64, dims: &[f32]) -> MemoraResult<Self> {
        if dims.len() != VECTOR_DIMENSION {
            return Err(MemoraError::DimensionMismatch {
                expected: VECTOR_DIMENSION,
                got: dims.len(),
            });
        }
        let mut fixed = [0.0f32; VECTOR_DIMENSION];
        fixed.copy_from_slice(dims);
        Self::new(id, fixed)
    }

    /// Normalize arbitrary components into a valid vector. Fails on a
    /// zero (non-normalizable) input.
    pub fn normalized(id: u64, mut dims: [f32; VECTOR_DIMENSION]) -> MemoraResult<Self> {
        let norm = magnitude(&dims);
        if norm == 0.0 || !norm.is_finite() {
            return Err(MemoraError::NotNormalized { norm });
        }
        for d in &mut dims {
            *d /= norm;
        }
        Ok(Self { id, dims })
    }
}

/// Euclidean magnitude of a raw component array.
pub fn magnitude(dims: &[f32; VECTOR_DIMENSION]) -> f32 {
    dims.iter().map(|d| d * d).sum::<f32>().sqrt()
}

/// Dot product. Equals cosine similarity on unit vectors.
pub fn dot(a: &[f32; VECTOR_DIMENSION], b: &[f32; VECTOR_DIMENSION]) -> f32 {
    let mut acc = 0.0f32;
    for i in 0..VECTOR_DIMENSION {
        acc += a[i] * b[i];
    }
    acc
}
