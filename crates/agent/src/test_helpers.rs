//! Shared test doubles for the orchestration tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use storyloom_core::error::{EmbeddingError, ProviderError, SinkError};
use storyloom_core::{ClientSink, Embedder, Provider, ProviderRequest, StreamChunk, StreamReceiver};

/// A provider that streams a fixed script of deltas.
pub struct ScriptedProvider {
    name: String,
    deltas: Vec<String>,
    fail_before_stream: Option<ProviderError>,
    fail_after: Option<ProviderError>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, deltas: &[&str]) -> Self {
        Self {
            name: name.into(),
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            fail_before_stream: None,
            fail_after: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail `stream()` itself, before any delta.
    pub fn failing(name: &str, error: ProviderError) -> Self {
        let mut p = Self::new(name, &[]);
        p.fail_before_stream = Some(error);
        p
    }

    /// Emit the script, then an error instead of a done marker.
    pub fn then_fail(mut self, error: ProviderError) -> Self {
        self.fail_after = Some(error);
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(e) = &self.fail_before_stream {
            return Err(e.clone());
        }

        let (tx, rx) = tokio::sync::mpsc::channel(self.deltas.len() + 2);
        for delta in &self.deltas {
            tx.send(Ok(StreamChunk::text(delta.clone()))).await.unwrap();
        }
        match &self.fail_after {
            Some(e) => tx.send(Err(e.clone())).await.unwrap(),
            None => tx.send(Ok(StreamChunk::finished())).await.unwrap(),
        }
        Ok(rx)
    }
}

const VOCABULARY: [&str; 6] = ["dragon", "castle", "sword", "ocean", "robot", "garden"];

/// Embeds text as keyword counts over a tiny vocabulary.
#[derive(Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        VOCABULARY
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Returns the same vector for every input.
pub struct StaticEmbedder(pub Vec<f32>);

#[async_trait]
impl Embedder for StaticEmbedder {
    fn model(&self) -> &str {
        "static-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| self.0.clone()).collect())
    }
}

/// Always fails.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model(&self) -> &str {
        "failing-test"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Status {
            status_code: 503,
            body: "unavailable".into(),
        })
    }
}

/// Accepts `limit` bytes, then reports the client as gone.
pub struct DisconnectingSink {
    pub received: Vec<u8>,
    limit: usize,
    pub attempts: usize,
}

impl DisconnectingSink {
    pub fn after(limit: usize) -> Self {
        Self {
            received: Vec::new(),
            limit,
            attempts: 0,
        }
    }
}

#[async_trait]
impl ClientSink for DisconnectingSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.attempts += 1;
        if self.received.len() + bytes.len() > self.limit {
            return Err(SinkError::Closed);
        }
        self.received.extend_from_slice(bytes);
        Ok(())
    }
}
