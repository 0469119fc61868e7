//! In-memory store, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use storyloom_core::error::RepositoryError;
use storyloom_core::{
    ChunkStore, StoredChunk, Thread, ThreadRef, ThreadRepository, Turn, TurnRepository,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    threads: HashMap<ThreadRef, Thread>,
    turns: HashMap<String, Turn>,
    chunks: Vec<StoredChunk>,
}

/// Threads, turns and chunks held in process memory.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored chunk, in insertion order.
    pub async fn all_chunks(&self) -> Vec<StoredChunk> {
        self.state.read().await.chunks.clone()
    }
}

#[async_trait]
impl ThreadRepository for InMemoryStore {
    async fn create_thread(&self, thread: &Thread) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .threads
            .insert(thread.reference(), thread.clone());
        Ok(())
    }

    async fn get_thread(
        &self,
        thread: &ThreadRef,
        user_id: &str,
    ) -> Result<Option<Thread>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .threads
            .get(thread)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn append_turn_id(&self, thread: &ThreadRef, turn_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let entry = state
            .threads
            .get_mut(thread)
            .ok_or_else(|| RepositoryError::not_found("thread", thread.id.clone()))?;
        entry.turn_ids.push(turn_id.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> Result<bool, RepositoryError> {
        Ok(self.state.write().await.threads.remove(thread).is_some())
    }
}

#[async_trait]
impl TurnRepository for InMemoryStore {
    async fn create_turn(&self, turn: &Turn) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .turns
            .insert(turn.id.clone(), turn.clone());
        Ok(())
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>, RepositoryError> {
        Ok(self.state.read().await.turns.get(turn_id).cloned())
    }

    async fn append_content(&self, turn_id: &str, suffix: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let turn = state
            .turns
            .get_mut(turn_id)
            .ok_or_else(|| RepositoryError::not_found("turn", turn_id))?;
        turn.content.push_str(suffix);
        turn.updated_at = Utc::now();
        Ok(())
    }

    async fn list_recent(&self, thread: &ThreadRef, limit: usize) -> Result<Vec<Turn>, RepositoryError> {
        let state = self.state.read().await;
        let mut turns: Vec<Turn> = state
            .turns
            .values()
            .filter(|t| &t.thread == thread)
            .cloned()
            .collect();
        turns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        turns.truncate(limit);
        Ok(turns)
    }

    async fn delete_turn(&self, turn_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.state.write().await.turns.remove(turn_id).is_some())
    }

    async fn delete_turns_by_thread(&self, thread: &ThreadRef) -> Result<usize, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.turns.len();
        state.turns.retain(|_, t| &t.thread != thread);
        Ok(before - state.turns.len())
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn create_chunk(&self, chunk: &StoredChunk) -> Result<(), RepositoryError> {
        self.state.write().await.chunks.push(chunk.clone());
        Ok(())
    }

    async fn delete_chunks_by_turn(&self, turn_id: &str) -> Result<usize, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state.chunks.retain(|c| c.turn_id != turn_id);
        Ok(before - state.chunks.len())
    }

    async fn delete_chunks_by_thread(&self, thread: &ThreadRef) -> Result<usize, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state.chunks.retain(|c| !c.belongs_to(thread));
        Ok(before - state.chunks.len())
    }

    async fn query_candidates(
        &self,
        user_id: &str,
        exclude: Option<&ThreadRef>,
    ) -> Result<Vec<StoredChunk>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|c| c.user_id == user_id && !c.embedding.is_empty())
            .filter(|c| exclude.is_none_or(|thread| !c.belongs_to(thread)))
            .cloned()
            .collect())
    }

    async fn count_chunks_for_turn(&self, turn_id: &str) -> Result<usize, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.chunks.iter().filter(|c| c.turn_id == turn_id).count())
    }
}
