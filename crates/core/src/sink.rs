//! Client sinks: where streamed output bytes go.
//!
//! The core imposes no framing; a sink receives model output exactly as it
//! arrives. A failing sink never aborts a turn, the orchestrator only records
//! the failure.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::SinkError;

#[async_trait]
pub trait ClientSink: Send {
    async fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), SinkError>;
}

/// Collects everything in memory.
#[async_trait]
impl ClientSink for Vec<u8> {
    async fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), SinkError> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Forwards bytes to a channel, typically feeding an HTTP response body.
/// Fails with [`SinkError::Closed`] once the receiver is dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ClientSink for ChannelSink {
    async fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), SinkError> {
        self.tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Writes to any async writer and flushes after every delta.
pub struct WriterSink<W> {
    inner: W,
}

impl<W> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> ClientSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), SinkError> {
        self.inner
            .write_all(bytes)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| SinkError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        assert_eq!(sink.write(b"hi").await, Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn writer_sink_forwards_bytes() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write(b"Hi t").await.unwrap();
        sink.write(b"here").await.unwrap();
        assert_eq!(sink.into_inner(), b"Hi there");
    }
}
