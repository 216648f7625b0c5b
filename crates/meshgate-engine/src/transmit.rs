//! Outbound transmit path
//!
//! Adapters are owned by their lifecycle tasks, so everything that wants to
//! send (handler replies, the engine handle) goes through a per-network
//! outbound queue. The [`Transmitter`] splits text into radio-sized chunks,
//! records broadcast chunks in the echo suppressor, queues each chunk and
//! waits for the lifecycle task to acknowledge the write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshgate_core::NetworkSource;
use meshgate_transport::TransportError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::echo::EchoSuppressor;
use crate::error::{EngineError, Result};

/// How long a queued send may take before the caller gives up
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an outbound payload goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundTarget {
    /// Everyone on a channel
    Broadcast {
        /// Channel index
        channel: u8,
    },
    /// One node
    Direct {
        /// Destination node id
        node_id: u32,
    },
}

impl OutboundTarget {
    /// Whether this is a broadcast
    pub fn is_broadcast(&self) -> bool {
        matches!(self, OutboundTarget::Broadcast { .. })
    }
}

/// One payload queued for an adapter's lifecycle task
#[derive(Debug)]
pub struct OutboundCommand {
    /// Destination
    pub target: OutboundTarget,
    /// Payload bytes, already within the adapter's size limit
    pub payload: Vec<u8>,
    /// Completed with the adapter's send result
    pub ack: oneshot::Sender<std::result::Result<(), TransportError>>,
}

#[derive(Debug, Clone)]
struct OutboundLink {
    tx: mpsc::Sender<OutboundCommand>,
    max_text_len: usize,
}

/// Queues text for the active adapters
#[derive(Debug)]
pub struct Transmitter {
    links: HashMap<NetworkSource, OutboundLink>,
    echo: Arc<EchoSuppressor>,
    send_timeout: Duration,
}

impl Transmitter {
    /// Create a transmitter with no networks attached
    pub fn new(echo: Arc<EchoSuppressor>) -> Self {
        Self {
            links: HashMap::new(),
            echo,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Override the per-chunk send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Attach a network's outbound queue
    pub fn attach(
        &mut self,
        source: NetworkSource,
        tx: mpsc::Sender<OutboundCommand>,
        max_text_len: usize,
    ) {
        self.links.insert(source, OutboundLink { tx, max_text_len });
    }

    /// Whether `source` can be sent to
    pub fn is_attached(&self, source: NetworkSource) -> bool {
        self.links.contains_key(&source)
    }

    /// Largest single payload accepted by `source`
    pub fn max_text_len(&self, source: NetworkSource) -> Option<usize> {
        self.links.get(&source).map(|link| link.max_text_len)
    }

    /// Send text, splitting it into as many chunks as needed
    ///
    /// Returns the number of chunks sent. Stops at the first chunk that
    /// fails.
    pub async fn send_text(
        &self,
        source: NetworkSource,
        target: OutboundTarget,
        text: &str,
    ) -> Result<usize> {
        let link = self
            .links
            .get(&source)
            .ok_or(EngineError::NotActive(source))?;

        let chunks = chunk_utf8(text, link.max_text_len);
        for (index, chunk) in chunks.iter().enumerate() {
            // Recorded before the write so an echo cannot beat the record
            if target.is_broadcast() {
                self.echo.record_outgoing(chunk);
            }
            self.send_chunk(source, link, target, chunk).await?;
            debug!(
                source = %source,
                target = ?target,
                chunk = index + 1,
                of = chunks.len(),
                len = chunk.len(),
                "Sent text"
            );
        }
        Ok(chunks.len())
    }

    async fn send_chunk(
        &self,
        source: NetworkSource,
        link: &OutboundLink,
        target: OutboundTarget,
        chunk: &str,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        link.tx
            .send(OutboundCommand {
                target,
                payload: chunk.as_bytes().to_vec(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        match tokio::time::timeout(self.send_timeout, ack_rx).await {
            Err(_) => {
                warn!(source = %source, "Outbound send timed out");
                Err(EngineError::SendTimeout {
                    network: source,
                    duration_ms: self.send_timeout.as_millis() as u64,
                })
            }
            Ok(Err(_)) => Err(EngineError::ChannelClosed),
            Ok(Ok(result)) => result.map_err(EngineError::from),
        }
    }
}

/// Split text into UTF-8-safe chunks of at most `max_bytes`
///
/// Prefers to break after a newline when one falls in the second half of the
/// chunk. Newlines at chunk edges are dropped and empty chunks are skipped.
pub fn chunk_utf8(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(4);
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            push_chunk(&mut chunks, remaining);
            break;
        }

        let mut end = max_bytes;
        while end > 0 && !remaining.is_char_boundary(end) {
            end -= 1;
        }

        let slice = &remaining[..end];
        if let Some(pos) = slice.rfind('\n') {
            if pos > 0 && pos + 1 >= end / 2 {
                push_chunk(&mut chunks, &slice[..pos]);
                remaining = &remaining[pos + 1..];
                continue;
            }
        }
        push_chunk(&mut chunks, slice);
        remaining = &remaining[end..];
    }
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim_matches('\n');
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_short_text_untouched() {
        assert_eq!(chunk_utf8("hello", 10), vec!["hello".to_string()]);
        assert_eq!(chunk_utf8("", 10), vec![String::new()]);
    }

    #[test]
    fn test_chunk_respects_limit_and_boundaries() {
        let text = "héllo wörld ünïcode ".repeat(10);
        let chunks = chunk_utf8(&text, 16);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 16);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_prefers_newlines() {
        let text = "line one\nline two\nline three";
        let chunks = chunk_utf8(text, 20);
        assert_eq!(chunks[0], "line one\nline two");
        assert_eq!(chunks[1], "line three");
    }

    #[tokio::test]
    async fn test_send_to_inactive_network() {
        let transmitter = Transmitter::new(Arc::new(EchoSuppressor::default()));
        let err = transmitter
            .send_text(
                NetworkSource::NetworkB,
                OutboundTarget::Broadcast { channel: 0 },
                "hi",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotActive(NetworkSource::NetworkB)));
    }

    #[tokio::test]
    async fn test_broadcast_chunks_recorded_before_send() {
        let echo = Arc::new(EchoSuppressor::default());
        let mut transmitter = Transmitter::new(echo.clone());
        let (tx, mut rx) = mpsc::channel(8);
        transmitter.attach(NetworkSource::NetworkA, tx, 8);

        let echo_seen = echo.clone();
        let worker = tokio::spawn(async move {
            let mut payloads = Vec::new();
            while let Some(cmd) = rx.recv().await {
                let text = String::from_utf8(cmd.payload).unwrap();
                assert!(echo_seen.is_echo(&text), "chunk not recorded before send");
                payloads.push(text);
                let _ = cmd.ack.send(Ok(()));
            }
            payloads
        });

        let sent = transmitter
            .send_text(
                NetworkSource::NetworkA,
                OutboundTarget::Broadcast { channel: 1 },
                "abcdefghijkl",
            )
            .await
            .unwrap();
        assert_eq!(sent, 2);
        drop(transmitter);
        assert_eq!(worker.await.unwrap(), vec!["abcdefgh", "ijkl"]);
    }

    #[tokio::test]
    async fn test_direct_sends_are_not_recorded() {
        let echo = Arc::new(EchoSuppressor::default());
        let mut transmitter = Transmitter::new(echo.clone());
        let (tx, mut rx) = mpsc::channel(8);
        transmitter.attach(NetworkSource::NetworkA, tx, 64);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let _ = cmd.ack.send(Ok(()));
            }
        });

        transmitter
            .send_text(
                NetworkSource::NetworkA,
                OutboundTarget::Direct { node_id: 7 },
                "secret",
            )
            .await
            .unwrap();
        assert!(echo.is_empty());
    }

    #[tokio::test]
    async fn test_adapter_error_propagates() {
        let mut transmitter = Transmitter::new(Arc::new(EchoSuppressor::default()));
        let (tx, mut rx) = mpsc::channel(8);
        transmitter.attach(NetworkSource::NetworkB, tx, 64);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let _ = cmd.ack.send(Err(TransportError::UnknownNode(7)));
            }
        });

        let err = transmitter
            .send_text(
                NetworkSource::NetworkB,
                OutboundTarget::Direct { node_id: 7 },
                "hi",
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_NODE");
    }

    #[tokio::test]
    async fn test_send_timeout() {
        let mut transmitter = Transmitter::new(Arc::new(EchoSuppressor::default()))
            .with_send_timeout(Duration::from_millis(20));
        let (tx, _rx) = mpsc::channel(8);
        transmitter.attach(NetworkSource::NetworkA, tx, 64);
        let err = transmitter
            .send_text(
                NetworkSource::NetworkA,
                OutboundTarget::Broadcast { channel: 0 },
                "hi",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SendTimeout { .. }));
    }
}
