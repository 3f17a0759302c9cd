//! The semantic memory layer: typed memories, sessions, the embedding
//! cache, and recovery orchestration over the storage core.

pub mod embedding;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::db::Storage;
use crate::snapshot::ContentBlob;
use crate::types::memory::{decode_memory_label, encode_memory_label};
use crate::types::vector::VECTOR_DIMENSION;
use crate::types::{
    is_concept_id, now_micros, Confidence, Edge, EdgeKind, Importance, Memory, MemoraError,
    MemoraResult, MemoryOptions, MemorySource, MemoryType, Node, Session, Vector, CONCEPT_ID_BIT,
};

pub use embedding::{EmbeddingProvider, HashEmbedding};

/// Filter set for [`MemoryManager::query`].
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// When present, seeds the result set with a vector top-k over the
    /// embedded query text.
    pub query_text: Option<String>,
    pub memory_types: Option<Vec<MemoryType>>,
    pub min_confidence: Option<Confidence>,
    pub min_importance: Option<Importance>,
    pub session_id: Option<u64>,
    pub user_id: Option<String>,
    /// Attach BFS-related memories and outgoing relationships.
    pub include_related: bool,
    pub max_depth: u32,
    pub limit: usize,
}

impl MemoryQuery {
    /// A text query with the default limit of 10.
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query_text: Some(query.into()),
            limit: 10,
            max_depth: 1,
            ..Self::default()
        }
    }
}

/// Result of a memory query.
#[derive(Debug, Clone)]
pub struct MemoryQueryResult {
    pub memories: Vec<Memory>,
    /// Parallel to `memories` when the query was seeded by text
    /// similarity; empty otherwise.
    pub similarity_scores: Vec<f32>,
    /// Memory id -> BFS-related memory ids (when `include_related`).
    pub related_memories: HashMap<u64, Vec<u64>>,
    /// Outgoing edges of the surviving memories (when `include_related`).
    pub relationships: Vec<Edge>,
    pub execution_time_ms: f64,
}

/// Aggregate counters for the memory layer.
#[derive(Debug, Clone)]
pub struct MemoryStatistics {
    pub total_memories: usize,
    pub by_type: HashMap<MemoryType, usize>,
    pub by_confidence: HashMap<Confidence, usize>,
    pub session_count: usize,
    pub active_session_count: usize,
    /// Nodes in the concept partition (high id bit set).
    pub concept_node_count: usize,
    pub content_cache_size: usize,
    pub embedding_cache_size: usize,
}

/// Live metadata for a memory. Only type/confidence/importance are
/// durable (packed into the node label); the rest is rebuilt with
/// defaults after recovery.
#[derive(Debug, Clone)]
struct MemoryMeta {
    memory_type: MemoryType,
    confidence: Confidence,
    importance: Importance,
    source: MemorySource,
    session_id: Option<u64>,
    user_id: Option<String>,
    created_at: u64,
}

impl MemoryMeta {
    fn recovered(memory_type: MemoryType, confidence: Confidence, importance: Importance) -> Self {
        Self {
            memory_type,
            confidence,
            importance,
            source: MemorySource::System,
            session_id: None,
            user_id: None,
            created_at: now_micros(),
        }
    }
}

/// The memory manager. Owns the content and embedding caches and all
/// session state; borrows the storage core per call.
pub struct MemoryManager {
    embedder: Box<dyn EmbeddingProvider>,
    content_cache: HashMap<u64, String>,
    embedding_cache: HashMap<u64, [f32; VECTOR_DIMENSION]>,
    meta: HashMap<u64, MemoryMeta>,
    sessions: HashMap<u64, Session>,
    next_memory_id: u64,
    next_session_id: u64,
    next_concept_seq: u64,
    current_session_id: Option<u64>,
}

impl MemoryManager {
    /// Create a manager with the given embedding provider.
    pub fn new(embedder: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            content_cache: HashMap::new(),
            embedding_cache: HashMap::new(),
            meta: HashMap::new(),
            sessions: HashMap::new(),
            next_memory_id: 1,
            next_session_id: 1,
            next_concept_seq: 1,
            current_session_id: None,
        }
    }

    /// Next memory id the manager will allocate.
    pub fn next_memory_id(&self) -> u64 {
        self.next_memory_id
    }

    /// Store a new memory: content to the log, label-packed node into
    /// the graph, optional embedding into the vector index.
    pub fn store(
        &mut self,
        storage: &mut Storage,
        memory_type: MemoryType,
        content: &str,
        options: MemoryOptions,
    ) -> MemoraResult<u64> {
        if content.is_empty() {
            return Err(MemoraError::EmptyContent);
        }
        // Memories share the low id space with user nodes; never claim
        // an id a user node already occupies.
        let mut id = self.next_memory_id;
        while storage.graph.get_node(id).is_some() {
            id += 1;
        }
        if is_concept_id(id) {
            return Err(MemoraError::ConceptIdReserved(id));
        }

        storage.append_content(id, content)?;
        self.content_cache.insert(id, content.to_string());

        let node = encode_memory_label(id, memory_type, options.confidence, options.importance, content);
        storage.insert_node(node)?;

        if options.create_embedding {
            let dims = self.embedder.embed(content.as_bytes());
            let vector = Vector::normalized(id, dims)?;
            storage.insert_vector(vector)?;
            self.embedding_cache.insert(id, vector.dims);
        }

        let session_id = options.session_id.or(self.current_session_id);
        if let Some(sid) = session_id {
            if let Some(session) = self.sessions.get_mut(&sid) {
                session.touch();
            }
        }

        self.meta.insert(
            id,
            MemoryMeta {
                memory_type,
                confidence: options.confidence,
                importance: options.importance,
                source: options.source,
                session_id,
                user_id: options.user_id,
                created_at: now_micros(),
            },
        );
        self.next_memory_id = id + 1;
        Ok(id)
    }

    /// Read a memory. Returns None for unknown ids and for memories
    /// whose content is gone — never placeholder data.
    pub fn get(&self, id: u64) -> Option<Memory> {
        let content = self.content_cache.get(&id)?;
        let meta = self.meta.get(&id)?;
        Some(Memory {
            id,
            memory_type: meta.memory_type,
            confidence: meta.confidence,
            importance: meta.importance,
            source: meta.source,
            content: content.clone(),
            embedding: self.embedding_cache.get(&id).copied(),
            session_id: meta.session_id,
            user_id: meta.user_id.clone(),
            created_at: meta.created_at,
        })
    }

    /// Replace a memory's content. Re-appends the blob, refreshes the
    /// display label, and recomputes the embedding when one exists.
    pub fn update(&mut self, storage: &mut Storage, id: u64, content: &str) -> MemoraResult<()> {
        if content.is_empty() {
            return Err(MemoraError::EmptyContent);
        }
        let meta = self
            .meta
            .get(&id)
            .cloned()
            .ok_or(MemoraError::MemoryNotFound(id))?;

        storage.append_content(id, content)?;
        self.content_cache.insert(id, content.to_string());

        let node =
            encode_memory_label(id, meta.memory_type, meta.confidence, meta.importance, content);
        storage.insert_node(node)?;

        if self.embedding_cache.contains_key(&id) {
            let dims = self.embedder.embed(content.as_bytes());
            let vector = Vector::normalized(id, dims)?;
            storage.insert_vector(vector)?;
            self.embedding_cache.insert(id, vector.dims);
        }

        if let Some(sid) = meta.session_id {
            if let Some(session) = self.sessions.get_mut(&sid) {
                session.touch();
            }
        }
        Ok(())
    }

    /// Logical forget: a durable tombstone plus cache eviction. The
    /// node and its edges stay in the graph.
    pub fn forget(&mut self, storage: &mut Storage, id: u64) -> MemoraResult<()> {
        if !self.meta.contains_key(&id) && !self.content_cache.contains_key(&id) {
            return Err(MemoraError::MemoryNotFound(id));
        }
        // An empty content entry is the tombstone; replay clears the
        // cached blob for the id.
        storage.append_content(id, "")?;
        self.content_cache.remove(&id);
        self.embedding_cache.remove(&id);
        self.meta.remove(&id);
        Ok(())
    }

    /// Link two memories (or concepts) in the graph.
    pub fn create_relationship(
        &mut self,
        storage: &mut Storage,
        from: u64,
        to: u64,
        kind: EdgeKind,
    ) -> MemoraResult<()> {
        storage.insert_edge(Edge::new(from, to, kind))?;
        Ok(())
    }

    /// Create a concept node: a semantic anchor in the reserved
    /// high-bit id partition.
    pub fn create_concept(&mut self, storage: &mut Storage, label: &str) -> MemoraResult<u64> {
        let id = CONCEPT_ID_BIT | self.next_concept_seq;
        storage.insert_node(Node::with_label(id, label))?;
        self.next_concept_seq += 1;
        Ok(id)
    }

    /// Create a session and make it current.
    pub fn create_session(&mut self, user_id: &str, title: &str, context: &str) -> u64 {
        let id = self.next_session_id;
        self.sessions.insert(id, Session::new(id, user_id, title, context));
        self.next_session_id += 1;
        self.current_session_id = Some(id);
        id
    }

    /// Switch the current session.
    pub fn set_current_session(&mut self, session_id: u64) -> MemoraResult<()> {
        if !self.sessions.contains_key(&session_id) {
            return Err(MemoraError::SessionNotFound(session_id));
        }
        self.current_session_id = Some(session_id);
        Ok(())
    }

    /// The current session, when one is set.
    pub fn get_current_session(&self) -> Option<&Session> {
        self.current_session_id
            .and_then(|id| self.sessions.get(&id))
    }

    /// Look up any session by id.
    pub fn get_session(&self, session_id: u64) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Run the query pipeline: similarity seeding or full scan, then
    /// selectivity filters, then optional related-memory attachment.
    pub fn query(&self, storage: &Storage, query: &MemoryQuery) -> MemoraResult<MemoryQueryResult> {
        let started = Instant::now();
        let limit = if query.limit == 0 { 10 } else { query.limit };

        let mut scores: HashMap<u64, f32> = HashMap::new();
        let mut candidates: Vec<u64> = match &query.query_text {
            Some(text) => {
                let dims = self.embedder.embed(text.as_bytes());
                let hits = storage.vectors.query_similar_by_vector(&dims, limit);
                let mut ids = Vec::with_capacity(hits.len());
                for (id, score) in hits {
                    if self.content_cache.contains_key(&id) {
                        scores.insert(id, score);
                        ids.push(id);
                    }
                }
                ids
            }
            None => {
                // Full scan in creation order; selectivity filters follow.
                let mut ids: Vec<u64> = self.meta.keys().copied().collect();
                ids.sort_unstable();
                ids
            }
        };

        candidates.retain(|id| {
            let Some(meta) = self.meta.get(id) else {
                return false;
            };
            if let Some(types) = &query.memory_types {
                if !types.contains(&meta.memory_type) {
                    return false;
                }
            }
            if let Some(min) = query.min_confidence {
                if meta.confidence < min {
                    return false;
                }
            }
            if let Some(min) = query.min_importance {
                if meta.importance < min {
                    return false;
                }
            }
            if let Some(sid) = query.session_id {
                if meta.session_id != Some(sid) {
                    return false;
                }
            }
            if let Some(uid) = &query.user_id {
                if meta.user_id.as_deref() != Some(uid.as_str()) {
                    return false;
                }
            }
            true
        });

        let mut related_memories: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut relationships: Vec<Edge> = Vec::new();
        if query.include_related {
            for &id in &candidates {
                if let Ok(reachable) = storage.graph.query_related(id, query.max_depth) {
                    let related: Vec<u64> = reachable
                        .iter()
                        .map(|n| n.id)
                        .filter(|&rid| rid != id)
                        .collect();
                    if !related.is_empty() {
                        related_memories.insert(id, related);
                    }
                }
                relationships.extend_from_slice(storage.graph.outgoing_edges(id));
            }
        }

        if !scores.is_empty() {
            candidates.sort_by(|a, b| {
                let sa = scores.get(a).copied().unwrap_or(f32::MIN);
                let sb = scores.get(b).copied().unwrap_or(f32::MIN);
                sb.total_cmp(&sa).then(a.cmp(b))
            });
        }
        candidates.truncate(limit);

        let memories: Vec<Memory> = candidates.iter().filter_map(|&id| self.get(id)).collect();
        let similarity_scores: Vec<f32> = if scores.is_empty() {
            Vec::new()
        } else {
            memories
                .iter()
                .map(|m| scores.get(&m.id).copied().unwrap_or(0.0))
                .collect()
        };

        Ok(MemoryQueryResult {
            memories,
            similarity_scores,
            related_memories,
            relationships,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Aggregate counters across the memory layer and graph.
    pub fn statistics(&self, storage: &Storage) -> MemoryStatistics {
        let mut by_type: HashMap<MemoryType, usize> = HashMap::new();
        let mut by_confidence: HashMap<Confidence, usize> = HashMap::new();
        for meta in self.meta.values() {
            *by_type.entry(meta.memory_type).or_insert(0) += 1;
            *by_confidence.entry(meta.confidence).or_insert(0) += 1;
        }
        MemoryStatistics {
            total_memories: self.meta.len(),
            by_type,
            by_confidence,
            session_count: self.sessions.len(),
            active_session_count: self.sessions.values().filter(|s| s.is_active).count(),
            concept_node_count: storage.graph.nodes().filter(|n| is_concept_id(n.id)).count(),
            content_cache_size: self.content_cache.len(),
            embedding_cache_size: self.embedding_cache.len(),
        }
    }

    /// Recovery: reconcile all snapshots, orphaned content files, and
    /// the replayed log tail into the caches, then re-derive the id
    /// counters. `tail_contents` are the memory-content entries with
    /// `seq > log_cursor`, in sequence order.
    pub fn recover(
        &mut self,
        storage: &mut Storage,
        tail_contents: &[(u64, String)],
    ) -> MemoraResult<()> {
        let mut referenced: HashSet<String> = HashSet::new();
        let mut max_seen: u64 = 0;

        // Pass 1: content provenance from every snapshot, oldest first
        // so later manifests win on overlap.
        for snapshot_id in storage.snapshots.list_snapshots()? {
            let manifest = match storage.snapshots.load_snapshot(snapshot_id) {
                Ok(manifest) => manifest,
                Err(err) => {
                    log::warn!("recovery: skipping unreadable snapshot {snapshot_id}: {err}");
                    continue;
                }
            };
            referenced.extend(manifest.memory_content_files.iter().cloned());
            match storage.snapshots.load_memory_contents(&manifest) {
                Ok(blobs) => {
                    for blob in blobs {
                        max_seen = max_seen.max(blob.memory_id);
                        self.absorb_blob(storage, blob)?;
                    }
                }
                Err(err) => {
                    log::warn!("recovery: snapshot {snapshot_id} content unreadable: {err}");
                }
            }
        }

        // Pass 2: orphaned content files from snapshots that crashed
        // before their manifest rename.
        for orphan in storage.snapshots.scan_orphan_content_files(&referenced)? {
            match storage.snapshots.read_memory_content_file(&orphan) {
                Ok(blobs) => {
                    log::warn!(
                        "recovery: loading orphan content file {} ({} blobs)",
                        orphan.display(),
                        blobs.len()
                    );
                    for blob in blobs {
                        max_seen = max_seen.max(blob.memory_id);
                        self.absorb_blob(storage, blob)?;
                    }
                }
                Err(err) => {
                    log::warn!("recovery: orphan file {} unreadable: {err}", orphan.display());
                }
            }
        }

        // Pass 3: the log tail, newest state last so it wins.
        for (memory_id, content) in tail_contents {
            max_seen = max_seen.max(*memory_id);
            if content.is_empty() {
                // Tombstone: the memory was forgotten.
                self.content_cache.remove(memory_id);
                self.embedding_cache.remove(memory_id);
                self.meta.remove(memory_id);
            } else {
                self.absorb_blob(
                    storage,
                    ContentBlob {
                        memory_id: *memory_id,
                        content: content.clone(),
                    },
                )?;
            }
        }

        // Pass 4: id counters. Memory-shaped nodes without content
        // (forgotten) still reserve their ids.
        for node in storage.graph.nodes() {
            if is_concept_id(node.id) {
                self.next_concept_seq = self.next_concept_seq.max((node.id & !CONCEPT_ID_BIT) + 1);
            } else if decode_memory_label(node).is_some() {
                max_seen = max_seen.max(node.id);
            }
        }
        self.next_memory_id = max_seen + 1;

        log::info!(
            "memory recovery complete: {} memories, next id {}",
            self.meta.len(),
            self.next_memory_id
        );
        Ok(())
    }

    /// Fold one recovered blob into the caches, recreating a missing
    /// node or vector with default metadata.
    fn absorb_blob(&mut self, storage: &mut Storage, blob: ContentBlob) -> MemoraResult<()> {
        if blob.content.is_empty() {
            return Ok(());
        }
        let id = blob.memory_id;

        let (memory_type, confidence, importance) = match storage.graph.get_node(id) {
            Some(node) => decode_memory_label(node).unwrap_or((
                MemoryType::Context,
                Confidence::Low,
                Importance::Low,
            )),
            None => {
                // Node lost with the snapshot prefix: recreate it
                // in-memory with default metadata. The next snapshot
                // makes it durable again.
                let node = encode_memory_label(
                    id,
                    MemoryType::Context,
                    Confidence::Low,
                    Importance::Low,
                    &blob.content,
                );
                storage.restore_node(node);
                (MemoryType::Context, Confidence::Low, Importance::Low)
            }
        };

        match storage.vectors.get(id) {
            Some(dims) => {
                self.embedding_cache.insert(id, *dims);
            }
            None => {
                let dims = self.embedder.embed(blob.content.as_bytes());
                let vector = Vector::normalized(id, dims)?;
                storage.restore_vector(vector)?;
                self.embedding_cache.insert(id, vector.dims);
            }
        }

        self.meta
            .entry(id)
            .or_insert_with(|| MemoryMeta::recovered(memory_type, confidence, importance));
        self.content_cache.insert(id, blob.content);
        Ok(())
    }

    /// Current content blobs, sorted by id, for the snapshot writer.
    pub fn content_blobs(&self) -> Vec<ContentBlob> {
        let mut blobs: Vec<ContentBlob> = self
            .content_cache
            .iter()
            .map(|(&memory_id, content)| ContentBlob {
                memory_id,
                content: content.clone(),
            })
            .collect();
        blobs.sort_by_key(|b| b.memory_id);
        blobs
    }
}
