//! Edge kinds and the core edge struct.

use serde::Serialize;

/// The kind of directed relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EdgeKind {
    /// Ownership: a session or concept owns a memory.
    Owns = 0,
    /// A generic link between two nodes.
    Links = 1,
    /// Semantic relation without a stronger contract.
    Related = 2,
    /// Hierarchy: the source is a child of the target.
    ChildOf = 3,
    /// The source was judged semantically similar to the target.
    SimilarTo = 4,
}

impl EdgeKind {
    /// Convert a u8 value to an EdgeKind, returning None for invalid values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Owns),
            1 => Some(Self::Links),
            2 => Some(Self::Related),
            3 => Some(Self::ChildOf),
            4 => Some(Self::SimilarTo),
            _ => None,
        }
    }

    /// Return a human-readable name for this edge kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Owns => "owns",
            Self::Links => "links",
            Self::Related => "related",
            Self::ChildOf => "child_of",
            Self::SimilarTo => "similar_to",
        }
    }

    /// Parse an edge kind from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "owns" => Some(Self::Owns),
            "links" => Some(Self::Links),
            "related" => Some(Self::Related),
            "child_of" | "childof" => Some(Self::ChildOf),
            "similar_to" | "similarto" => Some(Self::SimilarTo),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A directed edge between two nodes. Undirected relations are stored
/// as two edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// Source node id.
    pub from: u64,
    /// Target node id.
    pub to: u64,
    /// Kind of relationship.
    pub kind: EdgeKind,
}

impl Edge {
    /// Create a new edge.
    pub fn new(from: u64, to: u64, kind: EdgeKind) -> Self {
        Self { from, to, kind }
    }
}
