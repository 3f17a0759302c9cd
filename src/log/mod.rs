//! The append-only, CRC-framed write-ahead log — sole source of
//! durable truth.

pub mod append_log;
pub mod entry;

pub use append_log::{AppendLog, LogIter};
pub use entry::{LogEntry, KIND_EDGE, KIND_MEMORY_CONTENT, KIND_NODE, KIND_VECTOR};
