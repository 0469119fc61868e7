//! Prompt context: retrieved chunks rendered as system messages.

pub mod assembler;
pub mod classifier;

pub use assembler::{NARRATIVE_PREAMBLE, PromptAssembler, PromptMode};
pub use classifier::{Bucket, ChunkClassifier, KeywordClassifier};
