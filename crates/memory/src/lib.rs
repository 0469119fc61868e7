//! Chunking, similarity search and storage backends for storyloom.

pub mod chunker;
pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chunker::{Chunker, TextChunk};
pub use in_memory::InMemoryStore;
pub use vector::{ScoredIndex, cosine_similarity, search_similar};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
