//! All data types for the Memora storage core.

pub mod edge;
pub mod error;
pub mod memory;
pub mod node;
pub mod vector;

pub use edge::{Edge, EdgeKind};
pub use error::{MemoraError, MemoraResult};
pub use memory::{
    Confidence, Importance, Memory, MemoryOptions, MemorySource, MemoryType, Session,
};
pub use node::{Node, LABEL_SIZE};
pub use vector::{Vector, VECTOR_DIMENSION};

/// Ids with this bit set are reserved for concept nodes created by the
/// memory layer as semantic anchors.
pub const CONCEPT_ID_BIT: u64 = 1 << 63;

/// Maximum length of a session context string.
pub const MAX_SESSION_CONTEXT: usize = 256;

/// Returns true when the id belongs to the concept-node partition.
pub fn is_concept_id(id: u64) -> bool {
    id & CONCEPT_ID_BIT != 0
}

/// Returns the current time as Unix epoch microseconds.
pub fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros() as u64
}
