//! Persistence seams consumed by the retrieval and chat pipeline.
//!
//! Backends live in `storyloom-memory`; the orchestrators only ever see
//! these traits.

use async_trait::async_trait;

use crate::chunk::StoredChunk;
use crate::error::RepositoryError;
use crate::thread::{Thread, ThreadRef, Turn};

type RepoResult<T> = std::result::Result<T, RepositoryError>;

#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn create_thread(&self, thread: &Thread) -> RepoResult<()>;

    /// Fetch a thread only if it is owned by `user_id`.
    async fn get_thread(&self, thread: &ThreadRef, user_id: &str) -> RepoResult<Option<Thread>>;

    /// Append a turn id to the thread's ordering and bump `updated_at`.
    async fn append_turn_id(&self, thread: &ThreadRef, turn_id: &str) -> RepoResult<()>;

    async fn delete_thread(&self, thread: &ThreadRef) -> RepoResult<bool>;
}

#[async_trait]
pub trait TurnRepository: Send + Sync {
    async fn create_turn(&self, turn: &Turn) -> RepoResult<()>;

    async fn get_turn(&self, turn_id: &str) -> RepoResult<Option<Turn>>;

    /// Append `suffix` to the turn's content.
    async fn append_content(&self, turn_id: &str, suffix: &str) -> RepoResult<()>;

    /// The newest `limit` turns of a thread, newest first.
    async fn list_recent(&self, thread: &ThreadRef, limit: usize) -> RepoResult<Vec<Turn>>;

    async fn delete_turn(&self, turn_id: &str) -> RepoResult<bool>;

    /// Remove every turn of a thread, returning how many went.
    async fn delete_turns_by_thread(&self, thread: &ThreadRef) -> RepoResult<usize>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn create_chunk(&self, chunk: &StoredChunk) -> RepoResult<()>;

    async fn delete_chunks_by_turn(&self, turn_id: &str) -> RepoResult<usize>;

    async fn delete_chunks_by_thread(&self, thread: &ThreadRef) -> RepoResult<usize>;

    /// All of a user's chunks with a non-empty embedding, minus those that
    /// belong to `exclude`. Unscoped chunks are always returned.
    async fn query_candidates(
        &self,
        user_id: &str,
        exclude: Option<&ThreadRef>,
    ) -> RepoResult<Vec<StoredChunk>>;

    async fn count_chunks_for_turn(&self, turn_id: &str) -> RepoResult<usize>;
}
