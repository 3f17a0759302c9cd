//! Hybrid query composition over the graph and vector indices.

use crate::graph::GraphIndex;
use crate::types::{MemoraError, MemoraResult, Node};
use crate::vector::HnswIndex;

/// Result of a hybrid query: both result sets, composed as a union.
/// No rank fusion happens here; callers that want fusion compose at
/// the memory layer.
#[derive(Debug, Clone)]
pub struct HybridResult {
    /// BFS reachable set from the seed, in BFS order.
    pub related_nodes: Vec<Node>,
    /// Top-k ids with cosine similarity, descending.
    pub similar_vectors: Vec<(u64, f32)>,
}

/// Bounded-depth traversal. Delegates to the graph BFS.
pub fn related(graph: &GraphIndex, id: u64, depth: u32) -> MemoraResult<Vec<Node>> {
    graph.query_related(id, depth)
}

/// Top-k similarity for a stored vector id.
pub fn similar(vectors: &HnswIndex, id: u64, k: usize) -> MemoraResult<Vec<(u64, f32)>> {
    vectors.query_similar(id, k)
}

/// Graph BFS and vector top-k, run independently over the same seed.
/// The seed must exist as a node; a missing vector contributes an
/// empty similarity set rather than an error.
pub fn hybrid(
    graph: &GraphIndex,
    vectors: &HnswIndex,
    id: u64,
    depth: u32,
    k: usize,
) -> MemoraResult<HybridResult> {
    if graph.get_node(id).is_none() {
        return Err(MemoraError::NodeNotFound(id));
    }
    let related_nodes = graph.query_related(id, depth)?;
    let similar_vectors = match vectors.query_similar(id, k) {
        Ok(hits) => hits,
        Err(MemoraError::VectorNotFound(_)) => Vec::new(),
        Err(err) => return Err(err),
    };
    Ok(HybridResult {
        related_nodes,
        similar_vectors,
    })
}
