//! Error types for the Memora storage core.

use thiserror::Error;

/// All errors surfaced by the Memora storage core.
#[derive(Error, Debug)]
pub enum MemoraError {
    /// Malformed input that cannot be committed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Vector dimension mismatch.
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Vector is not unit-normalized.
    #[error("Vector is not unit-normalized (|v| = {norm})")]
    NotNormalized { norm: f32 },

    /// Empty content where content is required.
    #[error("Empty content")]
    EmptyContent,

    /// Self-loop edge not allowed.
    #[error("Self-loop edge not allowed on node {0}")]
    SelfEdge(u64),

    /// Id collides with the reserved concept-node partition.
    #[error("Id {0} lies in the reserved concept-node partition")]
    ConceptIdReserved(u64),

    /// Node not found by id.
    #[error("Node {0} not found")]
    NodeNotFound(u64),

    /// Vector not found by id.
    #[error("Vector {0} not found")]
    VectorNotFound(u64),

    /// Memory not found by id.
    #[error("Memory {0} not found")]
    MemoryNotFound(u64),

    /// Session not found by id.
    #[error("Session {0} not found")]
    SessionNotFound(u64),

    /// Log append latency is above the configured high-water mark; retryable.
    #[error("Write refused: log latency {last_latency_ms}ms above high-water mark")]
    Backpressure { last_latency_ms: u64 },

    /// Unrecoverable on-disk damage; the core refuses further writes.
    #[error("Corruption at offset {offset}: {detail}")]
    Corruption { offset: u64, detail: String },

    /// Snapshot id already taken.
    #[error("Snapshot {0} already exists")]
    SnapshotExists(u64),

    /// Snapshot not found by id.
    #[error("Snapshot {0} not found")]
    SnapshotNotFound(u64),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type for Memora operations.
pub type MemoraResult<T> = Result<T, MemoraError>;
