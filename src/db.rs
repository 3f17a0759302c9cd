//! The database facade: owns the log, snapshot manager, and both
//! indices; coordinates insert -> log -> index, snapshot triggers, and
//! restore. Single-threaded by construction — callers marshal work
//! onto one owning thread.

use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;
use crate::graph::GraphIndex;
use crate::log::{AppendLog, LogEntry};
use crate::memory::{
    HashEmbedding, MemoryManager, MemoryQuery, MemoryQueryResult, MemoryStatistics,
};
use crate::query::{self, HybridResult};
use crate::snapshot::{SnapshotManager, SnapshotManifest};
use crate::types::vector::VECTOR_DIMENSION;
use crate::types::{
    is_concept_id, Edge, EdgeKind, Memory, MemoraError, MemoraResult, MemoryOptions, MemoryType,
    Node, Session, Vector,
};
use crate::vector::HnswIndex;

/// Counters returned by [`Database::get_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub vector_count: usize,
    /// Sequence number of the last committed log entry.
    pub last_seq: u64,
}

/// The storage engine behind the facade. The memory manager borrows
/// it per call; nothing else holds a reference across calls.
pub struct Storage {
    pub(crate) config: DatabaseConfig,
    pub(crate) log: AppendLog,
    pub(crate) snapshots: SnapshotManager,
    pub(crate) graph: GraphIndex,
    pub(crate) vectors: HnswIndex,
    writes_since_snapshot: u64,
    corrupted: bool,
    /// Set after a slow append; writes are refused until it passes.
    backpressure_until: Option<Instant>,
    last_slow_latency_ms: u64,
}

impl Storage {
    /// Open the storage engine: validate the log, restore the latest
    /// usable snapshot, replay the tail. Returns the memory-content
    /// entries found in the replayed tail for the memory layer.
    pub(crate) fn open(config: DatabaseConfig) -> MemoraResult<(Self, Vec<(u64, String)>)> {
        let log = AppendLog::open(&config.data_path, config.log.fsync_window_ms)?;
        let snapshots = SnapshotManager::open(&config.data_path)?;

        let mut storage = Self {
            log,
            snapshots,
            graph: GraphIndex::new(),
            vectors: HnswIndex::new(&config.hnsw),
            writes_since_snapshot: 0,
            corrupted: false,
            backpressure_until: None,
            last_slow_latency_ms: 0,
            config,
        };
        let tail_contents = storage.restore()?;
        Ok((storage, tail_contents))
    }

    /// Load the newest snapshot whose sidecars are all present, then
    /// replay the log after its cursor.
    fn restore(&mut self) -> MemoraResult<Vec<(u64, String)>> {
        let mut cursor = 0u64;

        if self.config.enable_persistent_indexes {
            for snapshot_id in self.snapshots.list_snapshots()?.into_iter().rev() {
                let manifest = match self.snapshots.load_snapshot(snapshot_id) {
                    Ok(manifest) => manifest,
                    Err(err) => {
                        log::warn!("restore: snapshot {snapshot_id} manifest unreadable: {err}");
                        continue;
                    }
                };
                match self.load_manifest(&manifest) {
                    Ok(()) => {
                        cursor = manifest.log_cursor;
                        log::info!(
                            "restored snapshot {snapshot_id} (cursor {cursor}), replaying tail"
                        );
                        break;
                    }
                    Err(err) => {
                        // Fall back to the prior snapshot; indices may
                        // hold partial state, so reset them first.
                        log::warn!("restore: snapshot {snapshot_id} failed, falling back: {err}");
                        self.graph = GraphIndex::new();
                        self.vectors = HnswIndex::new(&self.config.hnsw);
                    }
                }
            }
        }

        let mut tail_contents = Vec::new();
        let tail = self.log.tail_after(cursor)?;
        for item in tail {
            let (_, entry) = item?;
            match entry {
                LogEntry::Node(node) => self.graph.insert_node(node),
                LogEntry::Edge(edge) => self.graph.insert_edge(edge)?,
                LogEntry::Vector(vector) => self.vectors.insert(vector)?,
                LogEntry::MemoryContent { memory_id, content } => {
                    tail_contents.push((memory_id, content));
                }
            }
        }
        Ok(tail_contents)
    }

    fn load_manifest(&mut self, manifest: &SnapshotManifest) -> MemoraResult<()> {
        let nodes = self.snapshots.load_nodes(manifest)?;
        let edges = self.snapshots.load_edges(manifest)?;
        let vectors = self.snapshots.load_vectors(manifest)?;
        for node in nodes {
            self.graph.insert_node(node);
        }
        for edge in edges {
            self.graph.insert_edge(edge)?;
        }
        for vector in vectors {
            self.vectors.insert(vector)?;
        }
        Ok(())
    }

    /// Admission control: refuse writes after corruption, and while
    /// the backpressure window from the last slow append is open.
    fn check_admission(&mut self) -> MemoraResult<()> {
        if self.corrupted {
            return Err(MemoraError::Corruption {
                offset: 0,
                detail: "core is read-only after corruption".to_string(),
            });
        }
        if let Some(until) = self.backpressure_until {
            if Instant::now() < until {
                return Err(MemoraError::Backpressure {
                    last_latency_ms: self.last_slow_latency_ms,
                });
            }
            self.backpressure_until = None;
        }
        Ok(())
    }

    /// Append one entry, tracking latency for admission control.
    fn append(&mut self, entry: &LogEntry) -> MemoraResult<u64> {
        self.check_admission()?;
        let seq = match self.log.append(entry) {
            Ok(seq) => seq,
            Err(err) => {
                if matches!(err, MemoraError::Corruption { .. }) {
                    self.corrupted = true;
                }
                return Err(err);
            }
        };

        let latency = self.log.last_append_latency();
        let watermark = Duration::from_millis(self.config.log.backpressure_high_watermark_ms);
        if self.config.log.backpressure_high_watermark_ms > 0 && latency > watermark {
            // One watermark-length cool-down, then admit a probe write.
            self.last_slow_latency_ms = latency.as_millis() as u64;
            self.backpressure_until = Some(Instant::now() + watermark);
            log::warn!(
                "log append took {}ms, engaging backpressure",
                self.last_slow_latency_ms
            );
        }

        self.writes_since_snapshot += 1;
        Ok(seq)
    }

    /// Log-first node insert. Overwrite of an existing id is legal.
    pub(crate) fn insert_node(&mut self, node: Node) -> MemoraResult<u64> {
        let seq = self.append(&LogEntry::Node(node))?;
        self.graph.insert_node(node);
        Ok(seq)
    }

    /// Log-first edge insert. Both endpoints must already be present.
    pub(crate) fn insert_edge(&mut self, edge: Edge) -> MemoraResult<u64> {
        if edge.from == edge.to {
            return Err(MemoraError::SelfEdge(edge.from));
        }
        if self.graph.get_node(edge.from).is_none() {
            return Err(MemoraError::NodeNotFound(edge.from));
        }
        if self.graph.get_node(edge.to).is_none() {
            return Err(MemoraError::NodeNotFound(edge.to));
        }
        let seq = self.append(&LogEntry::Edge(edge))?;
        self.graph.insert_edge(edge)?;
        Ok(seq)
    }

    /// Log-first vector insert. Orphan vectors (no backing node) are
    /// legal but logged.
    pub(crate) fn insert_vector(&mut self, vector: Vector) -> MemoraResult<u64> {
        let norm = crate::types::vector::magnitude(&vector.dims);
        if (norm - 1.0).abs() >= crate::types::vector::UNIT_NORM_TOLERANCE {
            return Err(MemoraError::NotNormalized { norm });
        }
        if self.graph.get_node(vector.id).is_none() {
            log::warn!("vector {} has no backing node", vector.id);
        }
        let seq = self.append(&LogEntry::Vector(vector))?;
        self.vectors.insert(vector)?;
        Ok(seq)
    }

    /// Log-first content append. Empty content is the forget tombstone.
    pub(crate) fn append_content(&mut self, memory_id: u64, content: &str) -> MemoraResult<u64> {
        self.append(&LogEntry::MemoryContent {
            memory_id,
            content: content.to_string(),
        })
    }

    /// Index-only node restore used by recovery; does not touch the log.
    pub(crate) fn restore_node(&mut self, node: Node) {
        self.graph.insert_node(node);
    }

    /// Index-only vector restore used by recovery; does not touch the log.
    pub(crate) fn restore_vector(&mut self, vector: Vector) -> MemoraResult<()> {
        self.vectors.insert(vector)
    }

    /// Write a snapshot of the current committed state.
    pub(crate) fn create_snapshot(
        &mut self,
        contents: &[crate::snapshot::ContentBlob],
    ) -> MemoraResult<SnapshotManifest> {
        if self.corrupted {
            return Err(MemoraError::Corruption {
                offset: 0,
                detail: "core is read-only after corruption".to_string(),
            });
        }
        self.log.fsync()?;
        let cursor = self.log.last_seq();
        let manifest = self.snapshots.create_snapshot(
            &self.graph.sorted_nodes(),
            &self.graph.sorted_edges(),
            &self.vectors.sorted_vectors(),
            contents,
            cursor,
        )?;
        self.writes_since_snapshot = 0;
        Ok(manifest)
    }

    pub(crate) fn writes_since_snapshot(&self) -> u64 {
        self.writes_since_snapshot
    }

    pub(crate) fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            vector_count: self.vectors.len(),
            last_seq: self.log.last_seq(),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_backpressure(&mut self, latency_ms: u64, window: Duration) {
        self.last_slow_latency_ms = latency_ms;
        self.backpressure_until = Some(Instant::now() + window);
    }
}

/// The public database handle. Owns the storage core and the memory
/// manager; all operations run on the caller's (single) thread.
pub struct Database {
    storage: Storage,
    memory: MemoryManager,
}

impl Database {
    /// Open or create a database at `config.data_path`, restoring from
    /// the latest snapshot plus log tail and running memory recovery.
    pub fn open(config: DatabaseConfig) -> MemoraResult<Self> {
        if config.vector_dimension != VECTOR_DIMENSION {
            return Err(MemoraError::InvalidInput(format!(
                "vector_dimension must be {VECTOR_DIMENSION}, got {}",
                config.vector_dimension
            )));
        }
        Self::open_with_embedder(config, Box::new(HashEmbedding))
    }

    /// Open with a custom embedding provider.
    pub fn open_with_embedder(
        config: DatabaseConfig,
        embedder: Box<dyn crate::memory::EmbeddingProvider>,
    ) -> MemoraResult<Self> {
        let (mut storage, tail_contents) = Storage::open(config)?;
        let mut memory = MemoryManager::new(embedder);
        memory.recover(&mut storage, &tail_contents)?;
        Ok(Self { storage, memory })
    }

    // ---- core inserts ----

    /// Insert or overwrite a node. The high-bit id partition is
    /// reserved for the memory layer's concept nodes.
    pub fn insert_node(&mut self, node: Node) -> MemoraResult<()> {
        if is_concept_id(node.id) {
            return Err(MemoraError::ConceptIdReserved(node.id));
        }
        self.storage.insert_node(node)?;
        self.maybe_auto_snapshot();
        Ok(())
    }

    /// Insert a directed edge between existing nodes.
    pub fn insert_edge(&mut self, edge: Edge) -> MemoraResult<()> {
        self.storage.insert_edge(edge)?;
        self.maybe_auto_snapshot();
        Ok(())
    }

    /// Insert or overwrite a unit vector.
    pub fn insert_vector(&mut self, vector: Vector) -> MemoraResult<()> {
        self.storage.insert_vector(vector)?;
        self.maybe_auto_snapshot();
        Ok(())
    }

    /// Batch insert: commits nodes, then edges, then vectors, in that
    /// order, as one contiguous log range. The batch is validated up
    /// front so a bad record is rejected before anything commits.
    pub fn insert_batch(
        &mut self,
        nodes: &[Node],
        edges: &[Edge],
        vectors: &[Vector],
    ) -> MemoraResult<()> {
        for node in nodes {
            if is_concept_id(node.id) {
                return Err(MemoraError::ConceptIdReserved(node.id));
            }
        }
        for edge in edges {
            if edge.from == edge.to {
                return Err(MemoraError::SelfEdge(edge.from));
            }
            let have_from = self.storage.graph.get_node(edge.from).is_some()
                || nodes.iter().any(|n| n.id == edge.from);
            let have_to = self.storage.graph.get_node(edge.to).is_some()
                || nodes.iter().any(|n| n.id == edge.to);
            if !have_from {
                return Err(MemoraError::NodeNotFound(edge.from));
            }
            if !have_to {
                return Err(MemoraError::NodeNotFound(edge.to));
            }
        }
        for vector in vectors {
            let norm = crate::types::vector::magnitude(&vector.dims);
            if (norm - 1.0).abs() >= crate::types::vector::UNIT_NORM_TOLERANCE {
                return Err(MemoraError::NotNormalized { norm });
            }
        }

        for node in nodes {
            self.storage.insert_node(*node)?;
        }
        for edge in edges {
            self.storage.insert_edge(*edge)?;
        }
        for vector in vectors {
            self.storage.insert_vector(*vector)?;
        }
        self.maybe_auto_snapshot();
        Ok(())
    }

    // ---- queries ----

    /// Bounded-depth BFS from a node. Depth 0 is the node itself.
    pub fn query_related(&self, id: u64, depth: u32) -> MemoraResult<Vec<Node>> {
        query::related(&self.storage.graph, id, depth)
    }

    /// Top-k cosine similarity for a stored vector.
    pub fn query_similar(&self, id: u64, k: usize) -> MemoraResult<Vec<(u64, f32)>> {
        query::similar(&self.storage.vectors, id, k)
    }

    /// Top-k cosine similarity for an arbitrary unit query vector.
    pub fn query_similar_by_vector(
        &self,
        dims: &[f32; VECTOR_DIMENSION],
        k: usize,
    ) -> Vec<(u64, f32)> {
        self.storage.vectors.query_similar_by_vector(dims, k)
    }

    /// Independent graph BFS + vector top-k over the same seed.
    pub fn query_hybrid(&self, id: u64, depth: u32, k: usize) -> MemoraResult<HybridResult> {
        query::hybrid(&self.storage.graph, &self.storage.vectors, id, depth, k)
    }

    // ---- snapshots & stats ----

    /// Flush the log and write an immutable snapshot.
    pub fn create_snapshot(&mut self) -> MemoraResult<SnapshotManifest> {
        self.storage.create_snapshot(&self.memory.content_blobs())
    }

    /// Counters read from the in-memory indices.
    pub fn get_stats(&self) -> DatabaseStats {
        self.storage.stats()
    }

    // ---- memory layer ----

    /// Store a typed memory; returns its id.
    pub fn store_memory(
        &mut self,
        memory_type: MemoryType,
        content: &str,
        options: MemoryOptions,
    ) -> MemoraResult<u64> {
        let id = self
            .memory
            .store(&mut self.storage, memory_type, content, options)?;
        self.maybe_auto_snapshot();
        Ok(id)
    }

    /// Read a memory; None when unknown or forgotten.
    pub fn get_memory(&self, id: u64) -> Option<Memory> {
        self.memory.get(id)
    }

    /// Replace a memory's content.
    pub fn update_memory(&mut self, id: u64, content: &str) -> MemoraResult<()> {
        self.memory.update(&mut self.storage, id, content)?;
        self.maybe_auto_snapshot();
        Ok(())
    }

    /// Logically forget a memory. The graph keeps the node and edges.
    pub fn forget_memory(&mut self, id: u64) -> MemoraResult<()> {
        self.memory.forget(&mut self.storage, id)?;
        self.maybe_auto_snapshot();
        Ok(())
    }

    /// Link two memories or concepts.
    pub fn create_relationship(&mut self, from: u64, to: u64, kind: EdgeKind) -> MemoraResult<()> {
        self.memory
            .create_relationship(&mut self.storage, from, to, kind)?;
        self.maybe_auto_snapshot();
        Ok(())
    }

    /// Create a concept anchor node in the reserved id partition.
    pub fn create_concept(&mut self, label: &str) -> MemoraResult<u64> {
        let id = self.memory.create_concept(&mut self.storage, label)?;
        self.maybe_auto_snapshot();
        Ok(id)
    }

    /// Create a session and make it current.
    pub fn create_session(&mut self, user_id: &str, title: &str, context: &str) -> u64 {
        self.memory.create_session(user_id, title, context)
    }

    /// Switch the current session.
    pub fn set_current_session(&mut self, session_id: u64) -> MemoraResult<()> {
        self.memory.set_current_session(session_id)
    }

    /// The current session, when set.
    pub fn get_current_session(&self) -> Option<&Session> {
        self.memory.get_current_session()
    }

    /// Look up a session by id.
    pub fn get_session(&self, session_id: u64) -> Option<&Session> {
        self.memory.get_session(session_id)
    }

    /// Run the memory query pipeline.
    pub fn query_memories(&self, query: &MemoryQuery) -> MemoraResult<MemoryQueryResult> {
        self.memory.query(&self.storage, query)
    }

    /// Aggregate memory-layer statistics.
    pub fn get_statistics(&self) -> MemoryStatistics {
        self.memory.statistics(&self.storage)
    }

    /// Next memory id (exposed for recovery verification).
    pub fn next_memory_id(&self) -> u64 {
        self.memory.next_memory_id()
    }

    fn maybe_auto_snapshot(&mut self) {
        let interval = self.storage.config.auto_snapshot_interval;
        if interval == 0 || self.storage.writes_since_snapshot() < interval {
            return;
        }
        if let Err(err) = self.create_snapshot() {
            // The triggering write already committed; the snapshot
            // retries after the next write.
            log::warn!("auto snapshot failed: {err}");
        }
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }
}
