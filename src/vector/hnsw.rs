//! Hierarchical navigable small-world index.
//!
//! Cosine similarity on unit vectors equals dot product, so every
//! comparison here is a dot product and "nearest" means highest score.
//! Level draws and tie-breaks run through a seeded PRNG and total
//! orderings: identical insert sequences with the same seed produce
//! identical graphs.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::vector::{dot, VECTOR_DIMENSION};
use crate::types::{MemoraError, MemoraResult, Vector};

/// Hard cap on the level draw.
const MAX_LEVEL: usize = 16;

/// HNSW tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Target degree per node (layers >= 1); layer 0 allows `2 * m`.
    pub m: usize,
    /// Beam width while building.
    pub ef_construction: usize,
    /// Beam width while querying; raised to `k` when smaller.
    pub ef_search: usize,
    /// PRNG seed for level draws.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: 42,
        }
    }
}

/// A candidate scored by dot product. The ordering is total: score
/// first, then ascending id, so heap order never depends on insertion
/// history.
#[derive(Debug, Clone, Copy)]
struct Scored {
    id: u64,
    score: f32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.score.to_bits() == other.score.to_bits()
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// The index. Layer 0 holds every vector; higher layers thin out with
/// geometric probability `1/ln(m)` per level.
pub struct HnswIndex {
    config: HnswConfig,
    rng: StdRng,
    /// Stored unit vectors by id.
    vectors: HashMap<u64, [f32; VECTOR_DIMENSION]>,
    /// Adjacency per layer; `layers[l]` maps id -> ordered neighbor list.
    layers: Vec<HashMap<u64, Vec<u64>>>,
    /// Top layer each id participates in.
    node_levels: HashMap<u64, usize>,
    entry_point: Option<u64>,
    entry_level: usize,
    /// Level decay factor `1 / ln(m)`.
    level_mult: f64,
}

impl HnswIndex {
    /// Create an empty index from config.
    pub fn new(config: &HnswConfig) -> Self {
        let m = config.m.max(2);
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            level_mult: 1.0 / (m as f64).ln(),
            config: HnswConfig {
                m,
                ..config.clone()
            },
            vectors: HashMap::new(),
            layers: vec![HashMap::new()],
            node_levels: HashMap::new(),
            entry_point: None,
            entry_level: 0,
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Fetch a stored vector.
    pub fn get(&self, id: u64) -> Option<&[f32; VECTOR_DIMENSION]> {
        self.vectors.get(&id)
    }

    /// Stored vectors sorted by id. Used by the snapshot writer.
    pub fn sorted_vectors(&self) -> Vec<Vector> {
        let mut vectors: Vec<Vector> = self
            .vectors
            .iter()
            .map(|(&id, &dims)| Vector { id, dims })
            .collect();
        vectors.sort_by_key(|v| v.id);
        vectors
    }

    /// Insert a unit vector. Re-inserting an existing id unlinks the
    /// old node and relinks it with the new components.
    pub fn insert(&mut self, vector: Vector) -> MemoraResult<()> {
        let norm = crate::types::vector::magnitude(&vector.dims);
        if (norm - 1.0).abs() >= crate::types::vector::UNIT_NORM_TOLERANCE {
            return Err(MemoraError::NotNormalized { norm });
        }

        if self.vectors.contains_key(&vector.id) {
            self.unlink(vector.id);
        }

        let id = vector.id;
        let query = vector.dims;
        self.vectors.insert(id, query);

        let level = self.random_level();
        while self.layers.len() <= level {
            self.layers.push(HashMap::new());
        }
        self.node_levels.insert(id, level);
        for layer in self.layers[..=level].iter_mut() {
            layer.entry(id).or_default();
        }

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(id);
            self.entry_level = level;
            return Ok(());
        };

        // Greedy descent through the layers above the insert level.
        for layer_idx in ((level + 1)..=self.entry_level).rev() {
            ep = self.greedy_step(&query, ep, layer_idx);
        }

        // Beam search + connect from the insert level down to 0.
        for layer_idx in (0..=level.min(self.entry_level)).rev() {
            let nearest = self.search_layer(&query, &[ep], self.config.ef_construction, layer_idx);
            let selected: Vec<u64> = nearest
                .iter()
                .take(self.config.m)
                .map(|s| s.id)
                .collect();
            for &neighbor in &selected {
                self.link(id, neighbor, layer_idx);
            }
            if let Some(best) = nearest.first() {
                ep = best.id;
            }
        }

        if level > self.entry_level {
            self.entry_point = Some(id);
            self.entry_level = level;
        }
        Ok(())
    }

    /// Top-k most similar to the stored vector `id`, excluding the
    /// probe itself. Descending similarity, ties by ascending id.
    pub fn query_similar(&self, id: u64, k: usize) -> MemoraResult<Vec<(u64, f32)>> {
        let query = *self.vectors.get(&id).ok_or(MemoraError::VectorNotFound(id))?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut results = self.query_similar_by_vector(&query, k + 1);
        results.retain(|(found, _)| *found != id);
        results.truncate(k);
        Ok(results)
    }

    /// Top-k most similar to an arbitrary unit query vector.
    pub fn query_similar_by_vector(
        &self,
        query: &[f32; VECTOR_DIMENSION],
        k: usize,
    ) -> Vec<(u64, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        for layer_idx in (1..=self.entry_level).rev() {
            ep = self.greedy_step(query, ep, layer_idx);
        }

        let ef = self.config.ef_search.max(k);
        let mut nearest = self.search_layer(query, &[ep], ef, 0);
        nearest.truncate(k);
        nearest.into_iter().map(|s| (s.id, s.score)).collect()
    }

    /// Draw an insertion level from a truncated exponential.
    fn random_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let level = (-u.ln() * self.level_mult) as usize;
        level.min(MAX_LEVEL)
    }

    /// Greedy hill-climb on one layer: move to the best-scoring
    /// neighbor until no neighbor improves.
    fn greedy_step(&self, query: &[f32; VECTOR_DIMENSION], start: u64, layer_idx: usize) -> u64 {
        let mut current = start;
        let mut current_score = self.score(query, current);
        loop {
            let mut improved = false;
            for &neighbor in self.neighbors(current, layer_idx) {
                let score = self.score(query, neighbor);
                if score > current_score
                    || (score == current_score && neighbor < current)
                {
                    current = neighbor;
                    current_score = score;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded-beam search on one layer. Returns up to `ef` results
    /// sorted descending by score, ties by ascending id.
    fn search_layer(
        &self,
        query: &[f32; VECTOR_DIMENSION],
        entries: &[u64],
        ef: usize,
        layer_idx: usize,
    ) -> Vec<Scored> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
        let mut results: BinaryHeap<std::cmp::Reverse<Scored>> = BinaryHeap::new();

        for &entry in entries {
            if !visited.insert(entry) {
                continue;
            }
            let scored = Scored {
                id: entry,
                score: self.score(query, entry),
            };
            candidates.push(scored);
            results.push(std::cmp::Reverse(scored));
        }

        while let Some(candidate) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::MIN);
            if results.len() >= ef && candidate.score < worst {
                break;
            }
            for &neighbor in self.neighbors(candidate.id, layer_idx) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored = Scored {
                    id: neighbor,
                    score: self.score(query, neighbor),
                };
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::MIN);
                if results.len() < ef || scored.score > worst {
                    candidates.push(scored);
                    results.push(std::cmp::Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    /// Connect two nodes bidirectionally on a layer, enforcing the
    /// degree bound on both by dropping the farthest neighbor.
    fn link(&mut self, a: u64, b: u64, layer_idx: usize) {
        if a == b {
            return;
        }
        let cap = self.degree_cap(layer_idx);
        for (node, peer) in [(a, b), (b, a)] {
            let node_vec = self.vectors[&node];
            let list = self.layers[layer_idx].entry(node).or_default();
            if list.contains(&peer) {
                continue;
            }
            list.push(peer);
            if list.len() > cap {
                // Recompute which neighbor is farthest from `node`.
                let list_copy = list.clone();
                let mut scored: Vec<Scored> = list_copy
                    .iter()
                    .map(|&n| Scored {
                        id: n,
                        score: dot(&node_vec, &self.vectors[&n]),
                    })
                    .collect();
                scored.sort_by(|x, y| y.cmp(x));
                scored.truncate(cap);
                let kept: HashSet<u64> = scored.iter().map(|s| s.id).collect();
                if let Some(list) = self.layers[layer_idx].get_mut(&node) {
                    list.retain(|n| kept.contains(n));
                }
            }
        }
    }

    /// Remove a node from every layer before re-insert. Degree
    /// pruning can leave asymmetric links, so every adjacency list is
    /// swept, not just the removed node's own neighbors.
    fn unlink(&mut self, id: u64) {
        for layer in &mut self.layers {
            layer.remove(&id);
            for list in layer.values_mut() {
                list.retain(|&n| n != id);
            }
        }
        self.node_levels.remove(&id);
        self.vectors.remove(&id);

        if self.entry_point == Some(id) {
            // Deterministic re-pick: highest level, lowest id.
            let next = self
                .node_levels
                .iter()
                .map(|(&n, &l)| (l, std::cmp::Reverse(n)))
                .max()
                .map(|(l, std::cmp::Reverse(n))| (n, l));
            match next {
                Some((n, l)) => {
                    self.entry_point = Some(n);
                    self.entry_level = l;
                }
                None => {
                    self.entry_point = None;
                    self.entry_level = 0;
                }
            }
        }
    }

    fn degree_cap(&self, layer_idx: usize) -> usize {
        if layer_idx == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    fn neighbors(&self, id: u64, layer_idx: usize) -> &[u64] {
        self.layers
            .get(layer_idx)
            .and_then(|layer| layer.get(&id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn score(&self, query: &[f32; VECTOR_DIMENSION], id: u64) -> f32 {
        dot(query, &self.vectors[&id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_unit(rng: &mut StdRng) -> [f32; VECTOR_DIMENSION] {
        let mut dims = [0.0f32; VECTOR_DIMENSION];
        for d in &mut dims {
            *d = rng.gen_range(-1.0..1.0);
        }
        let norm = crate::types::vector::magnitude(&dims);
        for d in &mut dims {
            *d /= norm;
        }
        dims
    }

    fn axis_unit(axis: usize) -> [f32; VECTOR_DIMENSION] {
        let mut dims = [0.0f32; VECTOR_DIMENSION];
        dims[axis] = 1.0;
        dims
    }

    fn build_index(count: u64, seed: u64) -> HnswIndex {
        let config = HnswConfig {
            seed,
            ..HnswConfig::default()
        };
        let mut index = HnswIndex::new(&config);
        let mut data_rng = StdRng::seed_from_u64(seed);
        for id in 0..count {
            let dims = random_unit(&mut data_rng);
            index.insert(Vector { id, dims }).unwrap();
        }
        index
    }

    #[test]
    fn insert_and_get() {
        let mut index = HnswIndex::new(&HnswConfig::default());
        index.insert(Vector { id: 1, dims: axis_unit(0) }).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(1).unwrap()[0], 1.0);
        assert!(index.get(2).is_none());
    }

    #[test]
    fn rejects_non_unit() {
        let mut index = HnswIndex::new(&HnswConfig::default());
        let mut dims = axis_unit(0);
        dims[0] = 0.5;
        assert!(matches!(
            index.insert(Vector { id: 1, dims }),
            Err(MemoraError::NotNormalized { .. })
        ));
    }

    #[test]
    fn nearest_axis_found() {
        let mut index = HnswIndex::new(&HnswConfig::default());
        for axis in 0..8usize {
            index
                .insert(Vector { id: axis as u64, dims: axis_unit(axis) })
                .unwrap();
        }
        let hits = index.query_similar_by_vector(&axis_unit(3), 1);
        assert_eq!(hits[0].0, 3);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn query_similar_excludes_probe() {
        let index = build_index(50, 7);
        let hits = index.query_similar(0, 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|(id, _)| *id != 0));
        // Descending similarity.
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn k_zero_is_empty() {
        let index = build_index(10, 7);
        assert!(index.query_similar(0, 0).unwrap().is_empty());
        assert!(index.query_similar_by_vector(&axis_unit(0), 0).is_empty());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let index = build_index(10, 7);
        assert!(matches!(
            index.query_similar(99, 3),
            Err(MemoraError::VectorNotFound(99))
        ));
    }

    #[test]
    fn identical_seeds_identical_results() {
        let a = build_index(1000, 42);
        let b = build_index(1000, 42);
        let hits_a = a.query_similar(0, 5).unwrap();
        let hits_b = b.query_similar(0, 5).unwrap();
        assert_eq!(hits_a, hits_b);
    }

    #[test]
    fn reinsert_replaces_vector() {
        let mut index = build_index(20, 9);
        index.insert(Vector { id: 3, dims: axis_unit(7) }).unwrap();
        assert_eq!(index.len(), 20);
        assert_eq!(index.get(3).unwrap()[7], 1.0);
        let hits = index.query_similar_by_vector(&axis_unit(7), 1);
        assert_eq!(hits[0].0, 3);
    }

    #[test]
    fn recall_against_brute_force() {
        let index = build_index(500, 11);
        let mut query_rng = StdRng::seed_from_u64(99);
        let query = random_unit(&mut query_rng);

        let mut exact: Vec<(u64, f32)> = (0..500u64)
            .map(|id| (id, dot(&query, index.get(id).unwrap())))
            .collect();
        exact.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let exact_top: HashSet<u64> = exact[..10].iter().map(|(id, _)| *id).collect();

        let approx = index.query_similar_by_vector(&query, 10);
        let found = approx.iter().filter(|(id, _)| exact_top.contains(id)).count();
        // HNSW with default parameters should recall most of the true top-10.
        assert!(found >= 7, "recall too low: {found}/10");
    }

    #[test]
    fn entry_point_survives_reinsert_of_entry() {
        let mut index = build_index(30, 5);
        let entry = index.entry_point.unwrap();
        let mut rng = StdRng::seed_from_u64(1234);
        let dims = random_unit(&mut rng);
        index.insert(Vector { id: entry, dims }).unwrap();
        assert_eq!(index.len(), 30);
        assert!(index.entry_point.is_some());
        assert!(!index.query_similar_by_vector(&dims, 3).is_empty());
    }
}
