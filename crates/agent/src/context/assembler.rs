//! Prompt assembly: turns retrieved chunks into system messages.
//!
//! Two modes, picked from the thread kind:
//!
//! | Mode | Thread | Shape |
//! |------|--------|-------|
//! | Dialogue | conversation | short preamble, one labeled entry per chunk |
//! | Narrative | work | continuity rules, chunks grouped under headings, closing rules |
//!
//! Assembly is deterministic: the same chunks in the same order always
//! produce the same text.

use std::fmt::Write as _;
use std::sync::Arc;
use storyloom_core::{ChatMessage, Role, StoredChunk, ThreadKind};

use crate::context::classifier::{Bucket, ChunkClassifier, KeywordClassifier};

/// Opening system message for every turn on a work.
pub const NARRATIVE_PREAMBLE: &str = "You are a professional long-form fiction writing assistant working in \
\"inspiration mode\", a collaboration mode dedicated to writing long stories.

## How this mode works
- You are helping the user write a complete long-form novel
- Everything you write is part of that story and must stay consistent with the whole
- The user may ask for revisions, additions or expansions; adapt to them

## Writing principles
1. **Consistency first**: keep characters, world and plot strictly consistent
2. **Natural continuation**: new content must follow on from existing content without jarring jumps
3. **Echo the details**: honor foreshadowing, clues and small details
4. **Unified style**: keep the overall voice and narrative style

Write high-quality story content based on the user's request and the background provided.";

const DIALOGUE_CONTEXT_HEADER: &str = "The following background from earlier conversations may be relevant:\n\n";

const NARRATIVE_CONTEXT_HEADER: &str = "You are a professional long-form fiction writing assistant. \
Follow these requirements strictly while writing:

## Core principles
1. **Consistency**: characters' personality, appearance and behavior must match established settings
2. **One world**: follow the established world, its rules and settings, without contradiction
3. **Continuous plot**: new content must connect naturally with existing plot, answering earlier foreshadowing and clues
4. **Consistent style**: keep the overall voice and narrative style

## Key background
The following background was retrieved. Consult it carefully and reflect it in your writing:

";

const NARRATIVE_CONTEXT_FOOTER: &str = "## Writing requirements
When writing new content:
- Strictly follow the character settings above; never change an established character's personality, appearance or abilities
- Follow the established world and rules; avoid logical contradictions
- New plot must connect naturally with existing plot
- If a user request conflicts with established settings, prefer the established settings and resolve the conflict gracefully within the story
- Keep the voice consistent with the existing narrative style
- Keep details continuous, such as timeline, places and relationships

Write new content that meets these requirements, based on the background above.";

/// How retrieved context is organized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Short question-and-answer exchanges.
    Dialogue,
    /// Long-form fiction continuation.
    Narrative,
}

impl From<ThreadKind> for PromptMode {
    fn from(kind: ThreadKind) -> Self {
        match kind {
            ThreadKind::Conversation => PromptMode::Dialogue,
            ThreadKind::Work => PromptMode::Narrative,
        }
    }
}

fn bucket_heading(bucket: Bucket) -> (&'static str, &'static str) {
    match bucket {
        Bucket::Character => ("### Characters", "Character info"),
        Bucket::World => ("### World and setting", "World info"),
        Bucket::Plot => ("### Existing plot", "Plot summary"),
        Bucket::UserRequirement => ("### User requirements and settings", "User requirement"),
        Bucket::Other => ("### Other related info", "Related info"),
    }
}

/// Builds the system messages that open a turn's prompt.
#[derive(Clone)]
pub struct PromptAssembler {
    classifier: Arc<dyn ChunkClassifier>,
    dialogue_preamble: Option<String>,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            classifier: Arc::new(KeywordClassifier::default()),
            dialogue_preamble: None,
        }
    }
}

impl std::fmt::Debug for PromptAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptAssembler")
            .field("dialogue_preamble", &self.dialogue_preamble)
            .finish_non_exhaustive()
    }
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the narrative bucket classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn ChunkClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// System prompt to open dialogue-mode turns with.
    pub fn with_dialogue_preamble(mut self, preamble: Option<String>) -> Self {
        self.dialogue_preamble = preamble.filter(|p| !p.trim().is_empty());
        self
    }

    /// The mode's opening system message, if it has one.
    pub fn preamble(&self, mode: PromptMode) -> Option<ChatMessage> {
        match mode {
            PromptMode::Narrative => Some(ChatMessage::system(NARRATIVE_PREAMBLE)),
            PromptMode::Dialogue => self.dialogue_preamble.as_deref().map(ChatMessage::system),
        }
    }

    /// Render retrieved chunks as system messages. No chunks, no messages.
    pub fn assemble(&self, chunks: &[StoredChunk], mode: PromptMode) -> Vec<ChatMessage> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let text = match mode {
            PromptMode::Dialogue => Self::dialogue_context(chunks),
            PromptMode::Narrative => self.narrative_context(chunks),
        };
        vec![ChatMessage::system(text)]
    }

    fn dialogue_context(chunks: &[StoredChunk]) -> String {
        let mut out = String::from(DIALOGUE_CONTEXT_HEADER);
        for (i, chunk) in chunks.iter().enumerate() {
            let label = match chunk.role {
                Role::Assistant => "Background info",
                Role::User => "User previously mentioned",
                Role::System => "Related info",
            };
            let _ = write!(out, "[{label} {}]\n{}\n\n", i + 1, chunk.content);
        }
        out
    }

    fn narrative_context(&self, chunks: &[StoredChunk]) -> String {
        let mut grouped: Vec<(Bucket, Vec<&StoredChunk>)> =
            Bucket::ALL.iter().map(|b| (*b, Vec::new())).collect();
        for chunk in chunks {
            let bucket = self.classifier.classify(chunk);
            if let Some((_, members)) = grouped.iter_mut().find(|(b, _)| *b == bucket) {
                members.push(chunk);
            }
        }

        let mut out = String::from(NARRATIVE_CONTEXT_HEADER);
        for (bucket, members) in grouped.iter().filter(|(_, m)| !m.is_empty()) {
            let (heading, label) = bucket_heading(*bucket);
            out.push_str(heading);
            out.push('\n');
            for (i, chunk) in members.iter().enumerate() {
                let _ = write!(out, "**{label} {}:**\n{}\n\n", i + 1, chunk.content);
            }
        }
        out.push_str(NARRATIVE_CONTEXT_FOOTER);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::ChunkKind;

    fn chunk(role: Role, content: &str) -> StoredChunk {
        StoredChunk::new("u", None, "t", content, vec![1.0], role, ChunkKind::Paragraph, (0, 1))
    }

    #[test]
    fn no_chunks_no_messages() {
        let assembler = PromptAssembler::new();
        assert!(assembler.assemble(&[], PromptMode::Dialogue).is_empty());
        assert!(assembler.assemble(&[], PromptMode::Narrative).is_empty());
    }

    #[test]
    fn dialogue_labels_by_author() {
        let assembler = PromptAssembler::new();
        let messages = assembler.assemble(
            &[
                chunk(Role::Assistant, "Paris is the capital."),
                chunk(Role::User, "I live in Lyon."),
            ],
            PromptMode::Dialogue,
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
        let text = &messages[0].content;
        assert!(text.starts_with(DIALOGUE_CONTEXT_HEADER));
        assert!(text.contains("[Background info 1]\nParis is the capital."));
        assert!(text.contains("[User previously mentioned 2]\nI live in Lyon."));
    }

    #[test]
    fn narrative_groups_under_headings_in_order() {
        let assembler = PromptAssembler::new();
        let messages = assembler.assemble(
            &[
                chunk(Role::Assistant, "Rain fell softly."),
                chunk(Role::User, "keep it dark"),
                chunk(Role::Assistant, "Her personality is cold."),
                chunk(Role::Assistant, "The world has two moons."),
            ],
            PromptMode::Narrative,
        );
        assert_eq!(messages.len(), 1);
        let text = &messages[0].content;

        let characters = text.find("### Characters").unwrap();
        let world = text.find("### World and setting").unwrap();
        let requirements = text.find("### User requirements and settings").unwrap();
        let other = text.find("### Other related info").unwrap();
        assert!(characters < world && world < requirements && requirements < other);
        assert!(!text.contains("### Existing plot"));

        assert!(text.contains("**Character info 1:**\nHer personality is cold."));
        assert!(text.contains("**User requirement 1:**\nkeep it dark"));
        assert!(text.ends_with(NARRATIVE_CONTEXT_FOOTER));
        assert!(text.contains("prefer the established settings"));
    }

    #[test]
    fn custom_classifier_is_used() {
        let assembler = PromptAssembler::new().with_classifier(Arc::new(|_: &StoredChunk| Bucket::Plot));
        let messages = assembler.assemble(&[chunk(Role::User, "anything")], PromptMode::Narrative);
        assert!(messages[0].content.contains("**Plot summary 1:**\nanything"));
    }

    #[test]
    fn preambles_per_mode() {
        let plain = PromptAssembler::new();
        assert!(plain.preamble(PromptMode::Dialogue).is_none());
        assert_eq!(
            plain.preamble(PromptMode::Narrative).unwrap().content,
            NARRATIVE_PREAMBLE
        );

        let custom = PromptAssembler::new().with_dialogue_preamble(Some("Be brief.".into()));
        assert_eq!(custom.preamble(PromptMode::Dialogue).unwrap().content, "Be brief.");

        let blank = PromptAssembler::new().with_dialogue_preamble(Some("  ".into()));
        assert!(blank.preamble(PromptMode::Dialogue).is_none());
    }

    #[test]
    fn mode_follows_thread_kind() {
        assert_eq!(PromptMode::from(ThreadKind::Conversation), PromptMode::Dialogue);
        assert_eq!(PromptMode::from(ThreadKind::Work), PromptMode::Narrative);
    }
}
