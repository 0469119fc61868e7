//! Server-sent-event plumbing shared by the streaming providers.
//!
//! Bytes are buffered until a full line is available, so multibyte
//! characters split across network reads are never mangled.

use futures::StreamExt;
use storyloom_core::error::ProviderError;
use storyloom_core::provider::{StreamChunk, StreamReceiver};
use tracing::{debug, trace};

/// What a provider-specific parser made of one `data:` payload.
#[derive(Debug)]
pub(crate) enum SseEvent {
    Text(String),
    Done,
    Error(ProviderError),
    Skip,
}

/// Splits a byte stream into lines.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed bytes, returning every line completed by them (without `\r\n`).
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// The payload of a `data:` line, if this is one.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:").map(str::trim)
}

/// Read an SSE response on a background task and forward parsed deltas.
///
/// Ends with a `done` chunk when the parser reports completion or the body
/// ends; stops early if the receiver goes away.
pub(crate) fn spawn_reader<F>(response: reqwest::Response, provider: String, parse: F) -> StreamReceiver
where
    F: Fn(&str) -> SseEvent + Send + Sync + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        let handle = |line: &str| -> Option<SseEvent> {
            let data = data_payload(line)?;
            if data.is_empty() {
                return None;
            }
            match parse(data) {
                SseEvent::Skip => {
                    trace!(provider = %provider, data = %data, "Ignoring SSE payload");
                    None
                }
                event => Some(event),
            }
        };

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
            };

            for line in lines.push(&bytes) {
                match handle(&line) {
                    Some(SseEvent::Text(text)) => {
                        if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                            debug!("Stream receiver dropped, stopping reader");
                            return;
                        }
                    }
                    Some(SseEvent::Done) => {
                        let _ = tx.send(Ok(StreamChunk::finished())).await;
                        return;
                    }
                    Some(SseEvent::Error(e)) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    Some(SseEvent::Skip) | None => {}
                }
            }
        }

        if let Some(SseEvent::Text(text)) = lines.finish().as_deref().and_then(handle) {
            let _ = tx.send(Ok(StreamChunk::text(text))).await;
        }
        let _ = tx.send(Ok(StreamChunk::finished())).await;
    });

    rx
}
