//! The fixed-layout graph node record.

use serde::Serialize;

/// Size of the node label field in bytes.
pub const LABEL_SIZE: usize = 32;

/// A graph node: an id plus a 32-byte label.
///
/// For user-facing nodes the label is a zero-padded UTF-8 string. For
/// memory nodes the first three bytes carry the packed
/// type/confidence/importance enums and the remaining bytes hold a
/// truncated display label (see [`crate::types::memory`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Unique identifier. The high bit marks concept nodes.
    pub id: u64,
    /// Overloaded 32-byte label. Full content never lives here.
    #[serde(skip_serializing)]
    pub label: [u8; LABEL_SIZE],
}

impl Node {
    /// Create a node with a UTF-8 label, truncated to fit and zero-padded.
    pub fn with_label(id: u64, label: &str) -> Self {
        let mut bytes = [0u8; LABEL_SIZE];
        let take = truncate_to_char_boundary(label, LABEL_SIZE);
        bytes[..take.len()].copy_from_slice(take.as_bytes());
        Self { id, label: bytes }
    }

    /// Create a node from raw label bytes (used by replay and snapshots).
    pub fn from_raw(id: u64, label: [u8; LABEL_SIZE]) -> Self {
        Self { id, label }
    }

    /// Decode the label as a UTF-8 string, dropping trailing zero padding.
    pub fn label_str(&self) -> String {
        let end = self
            .label
            .iter()
            .rposition(|&b| b != 0)
            .map(|p| p + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&self.label[..end]).into_owned()
    }
}

/// Truncate `s` to at most `max` bytes without splitting a UTF-8 char.
pub(crate) fn truncate_to_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_roundtrip() {
        let node = Node::with_label(7, "user:alice");
        assert_eq!(node.id, 7);
        assert_eq!(node.label_str(), "user:alice");
    }

    #[test]
    fn long_label_truncated() {
        let long = "x".repeat(100);
        let node = Node::with_label(1, &long);
        assert_eq!(node.label_str().len(), LABEL_SIZE);
    }

    #[test]
    fn multibyte_label_not_split() {
        // 31 ASCII bytes followed by a 2-byte char: must cut before it.
        let label = format!("{}é", "a".repeat(31));
        let node = Node::with_label(1, &label);
        assert_eq!(node.label_str(), "a".repeat(31));
    }

    #[test]
    fn empty_label() {
        let node = Node::with_label(1, "");
        assert_eq!(node.label_str(), "");
    }
}
