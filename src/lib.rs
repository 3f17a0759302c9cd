//! Memora — hybrid graph + vector database with LLM-oriented semantic
//! memory.
//!
//! The storage core is an append-only, CRC-framed log (the sole source
//! of durable truth), immutable snapshots with sidecar content files,
//! an in-memory graph index, and an HNSW-style vector index. The
//! memory layer adds typed memories, sessions, a deterministic
//! embedding plug point, and crash recovery that reconciles snapshots,
//! orphaned content files, and the log tail.

pub mod config;
pub mod db;
pub mod graph;
pub mod log;
pub mod memory;
pub mod query;
pub mod snapshot;
pub mod types;
pub mod vector;

// Re-export commonly used types at the crate root
pub use config::{DatabaseConfig, LogConfig};
pub use db::{Database, DatabaseStats};
pub use graph::GraphIndex;
pub use log::{AppendLog, LogEntry};
pub use memory::{
    EmbeddingProvider, HashEmbedding, MemoryManager, MemoryQuery, MemoryQueryResult,
    MemoryStatistics,
};
pub use query::HybridResult;
pub use snapshot::{ContentBlob, SnapshotManager, SnapshotManifest};
pub use types::{
    is_concept_id, now_micros, Confidence, Edge, EdgeKind, Importance, Memory, MemoraError,
    MemoraResult, MemoryOptions, MemorySource, MemoryType, Node, Session, Vector, CONCEPT_ID_BIT,
    VECTOR_DIMENSION,
};
pub use vector::{HnswConfig, HnswIndex};
