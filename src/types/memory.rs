//! Semantic memory types layered over graph nodes.

use serde::Serialize;

use super::node::{truncate_to_char_boundary, Node, LABEL_SIZE};
use super::now_micros;

/// Number of label bytes used for the packed metadata of a memory node.
pub const MEMORY_META_BYTES: usize = 3;

/// The semantic category of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MemoryType {
    /// Something that happened during an interaction.
    Experience = 0,
    /// A statement about the world or the user.
    Fact = 1,
    /// A user preference.
    Preference = 2,
    /// Background context for a conversation.
    Context = 3,
    /// A learned procedure.
    Skill = 4,
    /// A relationship between entities the agent knows about.
    Relationship = 5,
}

impl MemoryType {
    /// Convert a u8 value to a MemoryType, returning None for invalid values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Experience),
            1 => Some(Self::Fact),
            2 => Some(Self::Preference),
            3 => Some(Self::Context),
            4 => Some(Self::Skill),
            5 => Some(Self::Relationship),
            _ => None,
        }
    }

    /// Return a human-readable name for this memory type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Context => "context",
            Self::Skill => "skill",
            Self::Relationship => "relationship",
        }
    }

    /// Parse a memory type from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "experience" => Some(Self::Experience),
            "fact" => Some(Self::Fact),
            "preference" => Some(Self::Preference),
            "context" => Some(Self::Context),
            "skill" => Some(Self::Skill),
            "relationship" => Some(Self::Relationship),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How certain the agent is about a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Confidence {
    Low = 0,
    Medium = 1,
    High = 2,
    Certain = 3,
}

impl Confidence {
    /// Convert a u8 value to a Confidence, returning None for invalid values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            3 => Some(Self::Certain),
            _ => None,
        }
    }
}

/// How important a memory is for retention and retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Importance {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Importance {
    /// Convert a u8 value to an Importance, returning None for invalid values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            3 => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Where a memory originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MemorySource {
    User = 0,
    System = 1,
    Inferred = 2,
    External = 3,
}

impl MemorySource {
    /// Convert a u8 value to a MemorySource, returning None for invalid values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::User),
            1 => Some(Self::System),
            2 => Some(Self::Inferred),
            3 => Some(Self::External),
            _ => None,
        }
    }
}

/// A semantically-typed memory: a graph node plus content and an
/// optional embedding. Returned by reads; never stored as-is.
#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    /// Memory id (same id as the backing node and vector).
    pub id: u64,
    pub memory_type: MemoryType,
    pub confidence: Confidence,
    pub importance: Importance,
    pub source: MemorySource,
    /// Full content. Lives in the content store, never in the label.
    pub content: String,
    /// Unit embedding when one was created.
    #[serde(skip_serializing)]
    pub embedding: Option<[f32; super::VECTOR_DIMENSION]>,
    pub session_id: Option<u64>,
    pub user_id: Option<String>,
    /// Unix epoch microseconds.
    pub created_at: u64,
}

/// Options for storing a memory. Everything defaults: medium
/// confidence and importance, user source, embedding on.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    pub confidence: Confidence,
    pub importance: Importance,
    pub source: MemorySource,
    pub session_id: Option<u64>,
    pub user_id: Option<String>,
    pub create_embedding: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            confidence: Confidence::Medium,
            importance: Importance::Medium,
            source: MemorySource::User,
            session_id: None,
            user_id: None,
            create_embedding: true,
        }
    }
}

impl MemoryOptions {
    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    pub fn session_id(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn create_embedding(mut self, create: bool) -> Self {
        self.create_embedding = create;
        self
    }
}

/// A grouping of memories sharing a conversation context and user.
/// Sessions are memory-layer state; the core never deletes them.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: u64,
    pub user_id: String,
    pub title: String,
    /// Free-form context, capped at [`super::MAX_SESSION_CONTEXT`] bytes.
    pub context: String,
    pub created_at: u64,
    pub last_active: u64,
    pub interaction_count: u64,
    pub is_active: bool,
}

impl Session {
    /// Create a new session. Context is truncated to the cap.
    pub fn new(session_id: u64, user_id: &str, title: &str, context: &str) -> Self {
        let now = now_micros();
        Self {
            session_id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            context: truncate_to_char_boundary(context, super::MAX_SESSION_CONTEXT).to_string(),
            created_at: now,
            last_active: now,
            interaction_count: 0,
            is_active: true,
        }
    }

    /// Record an interaction against this session.
    pub fn touch(&mut self) {
        self.last_active = now_micros();
        self.interaction_count += 1;
    }
}

/// Pack memory metadata and a display label into node label bytes.
///
/// Byte 0 = type, byte 1 = confidence, byte 2 = importance, bytes
/// 3..32 = truncated display label derived from the content.
pub fn encode_memory_label(
    id: u64,
    memory_type: MemoryType,
    confidence: Confidence,
    importance: Importance,
    content: &str,
) -> Node {
    let mut label = [0u8; LABEL_SIZE];
    label[0] = memory_type as u8;
    label[1] = confidence as u8;
    label[2] = importance as u8;
    let display = truncate_to_char_boundary(content, LABEL_SIZE - MEMORY_META_BYTES);
    label[MEMORY_META_BYTES..MEMORY_META_BYTES + display.len()]
        .copy_from_slice(display.as_bytes());
    Node::from_raw(id, label)
}

/// Unpack the metadata bytes of a memory node label. Returns None when
/// any of the three bytes is out of range for its enum.
pub fn decode_memory_label(node: &Node) -> Option<(MemoryType, Confidence, Importance)> {
    let memory_type = MemoryType::from_u8(node.label[0])?;
    let confidence = Confidence::from_u8(node.label[1])?;
    let importance = Importance::from_u8(node.label[2])?;
    Some((memory_type, confidence, importance))
}
