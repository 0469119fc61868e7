//! Stream collector: everything that happens to one streamed delta.
//!
//! Each delta is forwarded to the client, buffered, flushed to the assistant
//! turn in order, and counted toward the one-shot indexing trigger. Client
//! failures are recorded and never stop persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use storyloom_core::error::{ProviderError, SinkError};
use storyloom_core::{ClientSink, TurnRepository};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::retrieval::{IndexRequest, RetrievalService};

/// What happened while streaming one assistant turn.
#[derive(Debug, Clone, Default)]
pub struct StreamReport {
    /// Characters received from the provider.
    pub streamed_chars: usize,
    /// First client write failure, after which the client was no longer written to.
    pub client_error: Option<SinkError>,
    /// Provider failure, before or during the stream.
    pub provider_error: Option<ProviderError>,
    /// Buffer flushes that failed and were retried later.
    pub failed_appends: usize,
    /// Characters that never reached storage.
    pub unsaved_chars: usize,
    /// Background index runs requested for the assistant turn.
    pub index_requests: usize,
}

impl StreamReport {
    pub fn is_clean(&self) -> bool {
        self.client_error.is_none()
            && self.provider_error.is_none()
            && self.unsaved_chars == 0
    }
}

/// Thresholds, in chars.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CollectorLimits {
    pub flush_at: usize,
    pub index_at: usize,
}

pub(crate) struct StreamCollector<'a> {
    sink: &'a mut dyn ClientSink,
    turns: Arc<dyn TurnRepository>,
    retrieval: Option<Arc<RetrievalService>>,
    turn_id: String,
    limits: CollectorLimits,
    buffer: String,
    buffer_chars: usize,
    indexed: AtomicBool,
    report: StreamReport,
    handles: Vec<JoinHandle<()>>,
}

impl<'a> StreamCollector<'a> {
    pub(crate) fn new(
        sink: &'a mut dyn ClientSink,
        turns: Arc<dyn TurnRepository>,
        retrieval: Option<Arc<RetrievalService>>,
        turn_id: impl Into<String>,
        limits: CollectorLimits,
    ) -> Self {
        Self {
            sink,
            turns,
            retrieval,
            turn_id: turn_id.into(),
            limits,
            buffer: String::new(),
            buffer_chars: 0,
            indexed: AtomicBool::new(false),
            report: StreamReport::default(),
            handles: Vec::new(),
        }
    }

    /// Handle one delta from the provider.
    pub(crate) async fn push(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }

        if self.report.client_error.is_none()
            && let Err(e) = self.sink.write(delta.as_bytes()).await
        {
            warn!(turn_id = %self.turn_id, error = %e, "Client write failed, continuing to persist");
            self.report.client_error = Some(e);
        }

        let chars = delta.chars().count();
        self.buffer.push_str(delta);
        self.buffer_chars += chars;
        self.report.streamed_chars += chars;

        if self.buffer_chars >= self.limits.flush_at {
            self.flush().await;
        }

        if self.report.streamed_chars >= self.limits.index_at {
            self.trigger_index();
        }
    }

    pub(crate) fn record_provider_error(&mut self, error: ProviderError) {
        warn!(turn_id = %self.turn_id, error = %error, "Provider stream failed");
        self.report.provider_error = Some(error);
    }

    /// Append the buffer to the stored turn. On failure the buffer is kept
    /// so the next flush retries the same text in order.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        match self.turns.append_content(&self.turn_id, &self.buffer).await {
            Ok(()) => {
                debug!(turn_id = %self.turn_id, chars = self.buffer_chars, "Flushed assistant content");
                self.buffer.clear();
                self.buffer_chars = 0;
            }
            Err(e) => {
                warn!(turn_id = %self.turn_id, error = %e, "Failed to append assistant content");
                self.report.failed_appends += 1;
            }
        }
    }

    /// Index the stored turn in the background, at most once per stream.
    fn trigger_index(&mut self) {
        let Some(retrieval) = self.retrieval.clone() else {
            return;
        };
        if self.indexed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.report.index_requests += 1;
        let turns = Arc::clone(&self.turns);
        let turn_id = self.turn_id.clone();
        self.handles.push(tokio::spawn(async move {
            match turns.get_turn(&turn_id).await {
                Ok(Some(turn)) => {
                    if let Err(e) = retrieval.index_now(&IndexRequest::for_turn(&turn)).await {
                        warn!(turn_id = %turn_id, error = %e, "Assistant indexing failed");
                    }
                }
                Ok(None) => warn!(turn_id = %turn_id, "Assistant turn vanished before indexing"),
                Err(e) => warn!(turn_id = %turn_id, error = %e, "Failed to load assistant turn for indexing"),
            }
        }));
    }

    /// Flush what is left and make sure streamed content gets indexed once.
    pub(crate) async fn finish(mut self) -> (StreamReport, Vec<JoinHandle<()>>) {
        self.flush().await;
        self.report.unsaved_chars = self.buffer_chars;

        if self.report.streamed_chars > 0 {
            self.trigger_index();
        }

        (self.report, self.handles)
    }
}
