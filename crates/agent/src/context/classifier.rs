//! Chunk classification for narrative prompts.
//!
//! The assembler only needs a function from chunk to [`Bucket`]; the keyword
//! heuristic here is the default and can be swapped without touching how
//! prompts are composed.

use storyloom_core::{Role, StoredChunk};

/// Where a retrieved chunk lands in a narrative prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Character,
    World,
    Plot,
    UserRequirement,
    Other,
}

impl Bucket {
    /// Render order in the prompt.
    pub const ALL: [Bucket; 5] = [
        Bucket::Character,
        Bucket::World,
        Bucket::Plot,
        Bucket::UserRequirement,
        Bucket::Other,
    ];
}

/// Assigns a bucket to a chunk.
pub trait ChunkClassifier: Send + Sync {
    fn classify(&self, chunk: &StoredChunk) -> Bucket;
}

impl<F> ChunkClassifier for F
where
    F: Fn(&StoredChunk) -> Bucket + Send + Sync,
{
    fn classify(&self, chunk: &StoredChunk) -> Bucket {
        self(chunk)
    }
}

/// Keyword-family heuristic.
///
/// Families are checked in order. A hit on an assistant-authored chunk
/// selects the family's bucket; a hit on anything else counts as a user
/// requirement. Chunks with no hit go to user requirements when the user
/// wrote them and to `Other` otherwise.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    families: Vec<(Bucket, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(vec![
            (
                Bucket::Character,
                words(&[
                    "人物", "角色", "性格", "外貌", "名字", "character", "personality",
                    "appearance", "name",
                ]),
            ),
            (
                Bucket::World,
                words(&[
                    "世界", "设定", "规则", "背景", "world", "setting", "rule", "background",
                ]),
            ),
            (
                Bucket::Plot,
                words(&[
                    "情节", "故事", "发生", "事件", "plot", "story", "happened", "event",
                ]),
            ),
        ])
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_lowercase()).collect()
}

impl KeywordClassifier {
    pub fn new(families: Vec<(Bucket, Vec<String>)>) -> Self {
        Self { families }
    }
}

impl ChunkClassifier for KeywordClassifier {
    fn classify(&self, chunk: &StoredChunk) -> Bucket {
        let text = chunk.content.to_lowercase();
        let hit = self
            .families
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|(bucket, _)| *bucket);

        match (hit, chunk.role) {
            (Some(bucket), Role::Assistant) => bucket,
            (Some(_), _) => Bucket::UserRequirement,
            (None, Role::User) => Bucket::UserRequirement,
            (None, _) => Bucket::Other,
        }
    }
}
