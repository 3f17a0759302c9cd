//! The tagged log-entry union and its fixed payload layouts.

use crate::types::{Edge, EdgeKind, MemoraError, MemoraResult, Node, Vector, LABEL_SIZE};
use crate::types::vector::VECTOR_DIMENSION;

/// Log entry kind tag: node record.
pub const KIND_NODE: u8 = 1;
/// Log entry kind tag: edge record.
pub const KIND_EDGE: u8 = 2;
/// Log entry kind tag: vector record.
pub const KIND_VECTOR: u8 = 3;
/// Log entry kind tag: memory content blob.
pub const KIND_MEMORY_CONTENT: u8 = 4;

/// On-disk size of a node payload.
pub const NODE_PAYLOAD_SIZE: usize = 8 + LABEL_SIZE;
/// On-disk size of an edge payload.
pub const EDGE_PAYLOAD_SIZE: usize = 8 + 8 + 1;
/// On-disk size of a vector payload.
pub const VECTOR_PAYLOAD_SIZE: usize = 8 + VECTOR_DIMENSION * 4;

/// A single committed write. Discriminated union over the record
/// kinds; each variant has a fixed little-endian payload layout.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Node(Node),
    Edge(Edge),
    Vector(Vector),
    /// Full content of a memory. An empty content marks a logical
    /// forget: replay clears the cached blob for that id.
    MemoryContent { memory_id: u64, content: String },
}

impl LogEntry {
    /// The kind tag written into the frame header.
    pub fn kind(&self) -> u8 {
        match self {
            Self::Node(_) => KIND_NODE,
            Self::Edge(_) => KIND_EDGE,
            Self::Vector(_) => KIND_VECTOR,
            Self::MemoryContent { .. } => KIND_MEMORY_CONTENT,
        }
    }

    /// Serialize the payload (excluding the frame header and CRC).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::Node(node) => {
                let mut buf = Vec::with_capacity(NODE_PAYLOAD_SIZE);
                buf.extend_from_slice(&node.id.to_le_bytes());
                buf.extend_from_slice(&node.label);
                buf
            }
            Self::Edge(edge) => {
                let mut buf = Vec::with_capacity(EDGE_PAYLOAD_SIZE);
                buf.extend_from_slice(&edge.from.to_le_bytes());
                buf.extend_from_slice(&edge.to.to_le_bytes());
                buf.push(edge.kind as u8);
                buf
            }
            Self::Vector(vector) => {
                let mut buf = Vec::with_capacity(VECTOR_PAYLOAD_SIZE);
                buf.extend_from_slice(&vector.id.to_le_bytes());
                for d in &vector.dims {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                buf
            }
            Self::MemoryContent { memory_id, content } => {
                let mut buf = Vec::with_capacity(8 + content.len());
                buf.extend_from_slice(&memory_id.to_le_bytes());
                buf.extend_from_slice(content.as_bytes());
                buf
            }
        }
    }

    /// Parse a payload for the given kind tag. `offset` is the file
    /// position of the frame, used to report corruption.
    pub fn decode_payload(kind: u8, payload: &[u8], offset: u64) -> MemoraResult<Self> {
        let corrupt = |detail: &str| MemoraError::Corruption {
            offset,
            detail: detail.to_string(),
        };

        match kind {
            KIND_NODE => {
                if payload.len() != NODE_PAYLOAD_SIZE {
                    return Err(corrupt("bad node payload length"));
                }
                let id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let mut label = [0u8; LABEL_SIZE];
                label.copy_from_slice(&payload[8..8 + LABEL_SIZE]);
                Ok(Self::Node(Node::from_raw(id, label)))
            }
            KIND_EDGE => {
                if payload.len() != EDGE_PAYLOAD_SIZE {
                    return Err(corrupt("bad edge payload length"));
                }
                let from = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let to = u64::from_le_bytes(payload[8..16].try_into().unwrap());
                let kind = EdgeKind::from_u8(payload[16])
                    .ok_or_else(|| corrupt("unknown edge kind"))?;
                Ok(Self::Edge(Edge::new(from, to, kind)))
            }
            KIND_VECTOR => {
                if payload.len() != VECTOR_PAYLOAD_SIZE {
                    return Err(corrupt("bad vector payload length"));
                }
                let id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let mut dims = [0.0f32; VECTOR_DIMENSION];
                for (i, d) in dims.iter_mut().enumerate() {
                    let at = 8 + i * 4;
                    *d = f32::from_le_bytes(payload[at..at + 4].try_into().unwrap());
                }
                // Replay trusts the insert-time norm check; no re-validation.
                Ok(Self::Vector(Vector { id, dims }))
            }
            KIND_MEMORY_CONTENT => {
                if payload.len() < 8 {
                    return Err(corrupt("bad memory content payload length"));
                }
                let memory_id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let content = std::str::from_utf8(&payload[8..])
                    .map_err(|_| corrupt("memory content is not valid UTF-8"))?
                    .to_string();
                Ok(Self::MemoryContent { memory_id, content })
            }
            other => Err(corrupt(&format!("unknown entry kind {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vector(id: u64) -> Vector {
        let mut dims = [0.0f32; VECTOR_DIMENSION];
        dims[0] = 1.0;
        Vector::new(id, dims).unwrap()
    }

    #[test]
    fn node_payload_roundtrip() {
        let entry = LogEntry::Node(Node::with_label(42, "hello"));
        let payload = entry.encode_payload();
        assert_eq!(payload.len(), NODE_PAYLOAD_SIZE);
        let decoded = LogEntry::decode_payload(entry.kind(), &payload, 0).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn edge_payload_roundtrip() {
        let entry = LogEntry::Edge(Edge::new(1, 2, EdgeKind::Related));
        let payload = entry.encode_payload();
        assert_eq!(payload.len(), EDGE_PAYLOAD_SIZE);
        let decoded = LogEntry::decode_payload(entry.kind(), &payload, 0).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn vector_payload_roundtrip() {
        let entry = LogEntry::Vector(unit_vector(5));
        let payload = entry.encode_payload();
        assert_eq!(payload.len(), VECTOR_PAYLOAD_SIZE);
        let decoded = LogEntry::decode_payload(entry.kind(), &payload, 0).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn content_payload_roundtrip() {
        let entry = LogEntry::MemoryContent {
            memory_id: 7,
            content: "user prefers terse replies".to_string(),
        };
        let payload = entry.encode_payload();
        let decoded = LogEntry::decode_payload(entry.kind(), &payload, 0).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn unknown_kind_is_corruption() {
        let err = LogEntry::decode_payload(99, &[], 1234).unwrap_err();
        match err {
            MemoraError::Corruption { offset, .. } => assert_eq!(offset, 1234),
            other => panic!("expected Corruption, got {other:?}"),
        }
    }

    #[test]
    fn truncated_edge_payload_is_corruption() {
        let entry = LogEntry::Edge(Edge::new(1, 2, EdgeKind::Owns));
        let payload = entry.encode_payload();
        assert!(LogEntry::decode_payload(KIND_EDGE, &payload[..10], 0).is_err());
    }
}
