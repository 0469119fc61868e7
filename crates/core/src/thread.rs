//! Threads and the turns they own.
//!
//! A thread is either a chat-style *conversation* or a long-form *work*.
//! Both hold an ordered list of turn ids; the lifecycle of a turn is the same
//! for either kind, so the kind is a tag rather than a separate type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ChatMessage, Role};

/// Which family a thread belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    /// Short dialogue exchanges
    Conversation,
    /// Long-form narrative project
    Work,
}

impl ThreadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Work => "work",
        }
    }
}

impl std::fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThreadKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "work" => Ok(Self::Work),
            other => Err(format!("unknown thread kind: {other}")),
        }
    }
}

/// A typed reference to one thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef {
    pub kind: ThreadKind,
    pub id: String,
}

impl ThreadRef {
    pub fn new(kind: ThreadKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn conversation(id: impl Into<String>) -> Self {
        Self::new(ThreadKind::Conversation, id)
    }

    pub fn work(id: impl Into<String>) -> Self {
        Self::new(ThreadKind::Work, id)
    }

    /// The conversation id, if this references a conversation.
    pub fn conversation_id(&self) -> Option<&str> {
        (self.kind == ThreadKind::Conversation).then_some(self.id.as_str())
    }

    /// The work id, if this references a work.
    pub fn work_id(&self) -> Option<&str> {
        (self.kind == ThreadKind::Work).then_some(self.id.as_str())
    }
}

impl std::fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A conversation or work, with its turns in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub kind: ThreadKind,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub turn_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(kind: ThreadKind, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            user_id: user_id.into(),
            title: title.into(),
            turn_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reference(&self) -> ThreadRef {
        ThreadRef::new(self.kind, self.id.clone())
    }
}

/// One authored message inside a thread.
///
/// Assistant turns are created with empty content and grow by appends while
/// the model streams; once the stream ends the content is never touched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub thread: ThreadRef,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        thread: ThreadRef,
        user_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            thread,
            user_id: user_id.into(),
            role,
            content: content.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replay this turn as a prompt message.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ref_exposes_exactly_one_scope() {
        let conv = ThreadRef::conversation("c1");
        assert_eq!(conv.conversation_id(), Some("c1"));
        assert_eq!(conv.work_id(), None);

        let work = ThreadRef::work("w1");
        assert_eq!(work.work_id(), Some("w1"));
        assert_eq!(work.conversation_id(), None);
    }

    #[test]
    fn new_turn_has_fresh_id() {
        let thread = ThreadRef::conversation("c1");
        let a = Turn::new(thread.clone(), "u", Role::Assistant, "", "m");
        let b = Turn::new(thread, "u", Role::Assistant, "", "m");
        assert_ne!(a.id, b.id);
        assert!(a.content.is_empty());
    }

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in [ThreadKind::Conversation, ThreadKind::Work] {
            assert_eq!(kind.as_str().parse::<ThreadKind>().unwrap(), kind);
        }
    }
}
