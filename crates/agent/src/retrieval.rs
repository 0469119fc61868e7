//! Retrieval orchestration: indexing turns into chunks and finding the
//! chunks most relevant to a new query.
//!
//! Indexing is always a full replace for one turn. Retrieval is a soft-fail
//! path: [`RetrievalService::retrieve`] and [`RetrievalService::build_context`]
//! log failures and return nothing, so a chat turn is never blocked by them.

use chrono::Utc;
use std::sync::Arc;
use storyloom_config::RagConfig;
use storyloom_core::{
    ChatMessage, ChunkStore, Embedder, Result, Role, StoredChunk, ThreadRef, Turn,
};
use storyloom_memory::{Chunker, search_similar};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{PromptAssembler, PromptMode};
use crate::recency::RecencyDecay;

/// Everything needed to (re)index one turn.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub turn_id: String,
    pub user_id: String,
    pub thread: Option<ThreadRef>,
    pub content: String,
    pub role: Role,
}

impl IndexRequest {
    pub fn for_turn(turn: &Turn) -> Self {
        Self {
            turn_id: turn.id.clone(),
            user_id: turn.user_id.clone(),
            thread: Some(turn.thread.clone()),
            content: turn.content.clone(),
            role: turn.role,
        }
    }
}

/// A stored chunk that survived ranking and the recency filter.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: StoredChunk,
    /// Raw cosine similarity to the query.
    pub similarity: f32,
    /// Similarity after recency weighting.
    pub score: f32,
}

/// Tunables for indexing and retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Content shorter than this (in chars) is left unindexed.
    pub min_index_chars: usize,
    pub default_top_k: usize,
    pub context_top_k: usize,
    /// Hits must score strictly above this after weighting.
    pub min_weighted_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from(&RagConfig::default())
    }
}

impl From<&RagConfig> for RetrievalSettings {
    fn from(config: &RagConfig) -> Self {
        Self {
            min_index_chars: config.min_index_chars,
            default_top_k: config.default_top_k,
            context_top_k: config.context_top_k,
            min_weighted_score: config.min_weighted_score,
        }
    }
}

/// Composes chunker, embedder, similarity search and the chunk store.
pub struct RetrievalService {
    chunks: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    decay: RecencyDecay,
    assembler: PromptAssembler,
    settings: RetrievalSettings,
}

impl RetrievalService {
    pub fn new(chunks: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunks,
            embedder,
            chunker: Chunker::default(),
            decay: RecencyDecay::default(),
            assembler: PromptAssembler::default(),
            settings: RetrievalSettings::default(),
        }
    }

    pub fn from_config(
        chunks: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        config: &RagConfig,
    ) -> Self {
        Self {
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap, config.min_chunk_size),
            decay: RecencyDecay::from(&config.recency),
            settings: RetrievalSettings::from(config),
            ..Self::new(chunks, embedder)
        }
    }

    pub fn with_assembler(mut self, assembler: PromptAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_decay(mut self, decay: RecencyDecay) -> Self {
        self.decay = decay;
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Replace every chunk of one turn, returning how many were written.
    ///
    /// Old chunks are deleted first even when the new content is too short
    /// to index. Chunks that fail to persist are logged and skipped.
    pub async fn index_now(&self, request: &IndexRequest) -> Result<usize> {
        match self.chunks.delete_chunks_by_turn(&request.turn_id).await {
            Ok(removed) if removed > 0 => {
                debug!(turn_id = %request.turn_id, removed, "Removed previous chunks");
            }
            Ok(_) => {}
            Err(e) => warn!(turn_id = %request.turn_id, error = %e, "Failed to delete old chunks"),
        }

        if request.content.chars().count() < self.settings.min_index_chars {
            debug!(turn_id = %request.turn_id, "Content too short to index");
            return Ok(0);
        }

        let pieces = self.chunker.chunk(&request.content);
        if pieces.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let mut written = 0;
        for (piece, embedding) in pieces.into_iter().zip(embeddings) {
            if embedding.is_empty() {
                warn!(turn_id = %request.turn_id, start = piece.start, "Skipping chunk with empty embedding");
                continue;
            }
            let chunk = StoredChunk::new(
                &request.user_id,
                request.thread.clone(),
                &request.turn_id,
                piece.content,
                embedding,
                request.role,
                piece.kind,
                (piece.start, piece.end),
            );
            match self.chunks.create_chunk(&chunk).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(turn_id = %request.turn_id, start = chunk.start, error = %e, "Failed to store chunk")
                }
            }
        }

        info!(turn_id = %request.turn_id, chunks = written, "Indexed turn");
        Ok(written)
    }

    /// Index on a background task. Failures are logged, never returned.
    pub fn index(self: &Arc<Self>, request: IndexRequest) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.index_now(&request).await {
                warn!(turn_id = %request.turn_id, error = %e, "Background indexing failed");
            }
        })
    }

    /// Rank the user's chunks outside `exclude` against `query`.
    ///
    /// `top_k == 0` means the default. Top-K is taken on raw similarity
    /// before the weighted-score filter.
    pub async fn try_retrieve(
        &self,
        query: &str,
        user_id: &str,
        exclude: Option<&ThreadRef>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let top_k = if top_k == 0 {
            self.settings.default_top_k
        } else {
            top_k
        };

        let query_vector = self.embedder.embed_one(query).await?;
        let candidates = self.chunks.query_candidates(user_id, exclude).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let hits = {
            let vectors: Vec<&[f32]> = candidates.iter().map(|c| c.embedding.as_slice()).collect();
            search_similar(&query_vector, &vectors, top_k)
        };

        let now = Utc::now();
        let mut slots: Vec<Option<StoredChunk>> = candidates.into_iter().map(Some).collect();
        let results: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter_map(|hit| {
                let chunk = slots.get_mut(hit.index)?.take()?;
                let score = self.decay.weigh(hit.score, chunk.created_at, now);
                (score > self.settings.min_weighted_score).then_some(RetrievedChunk {
                    chunk,
                    similarity: hit.score,
                    score,
                })
            })
            .collect();

        debug!(user_id, hits = results.len(), "Retrieved chunks");
        Ok(results)
    }

    /// Like [`try_retrieve`](Self::try_retrieve), but failures yield nothing.
    pub async fn retrieve(
        &self,
        query: &str,
        user_id: &str,
        exclude: Option<&ThreadRef>,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        match self.try_retrieve(query, user_id, exclude, top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(user_id, error = %e, "Retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    /// System messages carrying context relevant to `query`, drawn from
    /// threads other than `thread`. Narrative mode when `thread` is a work.
    pub async fn build_context(
        &self,
        query: &str,
        user_id: &str,
        thread: Option<&ThreadRef>,
    ) -> Vec<ChatMessage> {
        let hits = self
            .retrieve(query, user_id, thread, self.settings.context_top_k)
            .await;
        if hits.is_empty() {
            return Vec::new();
        }

        let mode = thread
            .map(|t| PromptMode::from(t.kind))
            .unwrap_or(PromptMode::Dialogue);
        let chunks: Vec<StoredChunk> = hits.into_iter().map(|h| h.chunk).collect();
        self.assembler.assemble(&chunks, mode)
    }

    /// Drop every chunk of one turn.
    pub async fn forget_turn(&self, turn_id: &str) -> Result<usize> {
        Ok(self.chunks.delete_chunks_by_turn(turn_id).await?)
    }

    /// Drop every chunk of one thread.
    pub async fn forget_thread(&self, thread: &ThreadRef) -> Result<usize> {
        Ok(self.chunks.delete_chunks_by_thread(thread).await?)
    }
}
