//! Indexed fragments of turn content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Role;
use crate::thread::ThreadRef;

/// How a fragment was cut from its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// One or more whole paragraphs
    Paragraph,
    /// A sliding window over a paragraph too long to keep whole
    FixedSize,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::FixedSize => "fixed_size",
        }
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(Self::Paragraph),
            "fixed_size" => Ok(Self::FixedSize),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// A persisted chunk: a fragment of one turn plus its embedding.
///
/// `thread` is `None` for legacy rows that were indexed without a scope;
/// such rows are never excluded from retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub user_id: String,
    pub thread: Option<ThreadRef>,
    pub turn_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub role: Role,
    pub kind: ChunkKind,
    /// Character offsets into the turn content.
    pub start: usize,
    pub end: usize,
    pub created_at: DateTime<Utc>,
}

impl StoredChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: impl Into<String>,
        thread: Option<ThreadRef>,
        turn_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        role: Role,
        kind: ChunkKind,
        span: (usize, usize),
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            thread,
            turn_id: turn_id.into(),
            content: content.into(),
            embedding,
            role,
            kind,
            start: span.0,
            end: span.1,
            created_at: Utc::now(),
        }
    }

    /// Whether this chunk belongs to the given thread.
    pub fn belongs_to(&self, thread: &ThreadRef) -> bool {
        self.thread.as_ref() == Some(thread)
    }
}
