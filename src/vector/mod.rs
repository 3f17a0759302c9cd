//! Approximate nearest-neighbor index over unit vectors.

pub mod hnsw;

pub use hnsw::{HnswConfig, HnswIndex};
