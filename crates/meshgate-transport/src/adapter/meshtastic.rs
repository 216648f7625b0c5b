//! Network A adapter
//!
//! Session start: the host sends a want-config request with a random id and
//! the radio replies with its node number followed by a config-complete
//! marker echoing that id. Mesh packets that arrive during the handshake are
//! held and delivered by the first reads afterwards.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use meshgate_core::{format_node_id, LinkConfig, NetworkSource, BROADCAST_ADDR};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{
    adapter_name, ConnectionState, TransportAdapter, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_READ_POLL,
};
use crate::codec::meshtastic::{decode_from_radio, encode_packet, encode_want_config, FromRadio};
use crate::error::{Result, TransportError};
use crate::event::{MeshtasticPort, MeshtasticRecord, RawEvent};
use crate::framing::{FrameDecoder, FrameFormat};
use crate::link::{Link, READ_CHUNK_SIZE};

/// Longest text payload a Network A packet carries
pub const MESHTASTIC_MAX_TEXT: usize = 228;

/// Hop limit for packets we originate
const DEFAULT_HOP_LIMIT: u8 = 3;

/// Adapter for Meshtastic-style radios
pub struct MeshtasticAdapter {
    link_config: LinkConfig,
    link: Option<Link>,
    decoder: FrameDecoder,
    state: ConnectionState,
    name: String,
    node_num: Option<u32>,
    pending: VecDeque<RawEvent>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    read_poll: Duration,
}

impl MeshtasticAdapter {
    /// Create an adapter for the given link
    pub fn new(link_config: LinkConfig) -> Self {
        let name = adapter_name(NetworkSource::NetworkA.tag(), &link_config);
        Self {
            link_config,
            link: None,
            decoder: FrameDecoder::new(FrameFormat::Meshtastic),
            state: ConnectionState::Disconnected,
            name,
            node_num: None,
            pending: VecDeque::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_poll: DEFAULT_READ_POLL,
        }
    }

    /// Override the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Override the read poll interval
    pub fn with_read_poll(mut self, poll: Duration) -> Self {
        self.read_poll = poll;
        self
    }

    fn mark_lost(&mut self) {
        self.link = None;
        self.state = ConnectionState::Disconnected;
        self.decoder.clear();
    }

    async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let frame = FrameFormat::Meshtastic.encode(payload)?;
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        debug!(size = frame.len(), "Writing frame");
        if let Err(e) = link.write_frame(&frame).await {
            self.mark_lost();
            return Err(e);
        }
        Ok(())
    }

    /// Take one frame from the buffer, reading from the link if needed
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decoder.next_frame()? {
            return Ok(Some(frame));
        }

        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = [0u8; READ_CHUNK_SIZE];
        match link.read_chunk(&mut buf, self.read_poll).await {
            Ok(Some(n)) => {
                self.decoder.extend(&buf[..n]);
                self.decoder.next_frame()
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.mark_lost();
                Err(e)
            }
        }
    }

    /// Turn a frame into an event, absorbing control frames
    fn absorb_frame(&mut self, frame: Bytes) -> Option<RawEvent> {
        match decode_from_radio(&frame) {
            Ok(FromRadio::Packet(record)) => Some(RawEvent::NetworkA(record)),
            Ok(FromRadio::MyInfo { node_num }) => {
                info!(node = %format_node_id(node_num), "Radio reported node number");
                self.node_num = Some(node_num);
                None
            }
            Ok(FromRadio::ConfigComplete { id }) => {
                trace!(id, "Config dump complete");
                None
            }
            Ok(FromRadio::Other { kind }) => {
                trace!(kind, "Ignoring frame kind");
                None
            }
            Err(e) => {
                warn!(error = %e, size = frame.len(), "Undecodable frame");
                Some(RawEvent::Garbled {
                    bytes: frame,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn send_record(&mut self, to: u32, channel: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > MESHTASTIC_MAX_TEXT {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max: MESHTASTIC_MAX_TEXT,
            });
        }

        let record = MeshtasticRecord {
            from: self.node_num.unwrap_or(0),
            to,
            packet_id: rand::random(),
            channel,
            port_num: MeshtasticPort::TextMessage.into(),
            payload: Bytes::copy_from_slice(payload),
            hop_limit: DEFAULT_HOP_LIMIT,
            want_ack: to != BROADCAST_ADDR,
            direct: false,
            rx_snr: None,
            rx_rssi: None,
        };
        self.write_payload(&encode_packet(&record)).await
    }
}

#[async_trait]
impl TransportAdapter for MeshtasticAdapter {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        match Link::open(&self.link_config, self.connect_timeout).await {
            Ok(link) => {
                self.link = Some(link);
                self.decoder.clear();
                self.state = ConnectionState::Connected;
                info!(adapter = %self.name, "Connected to radio");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn begin_session(&mut self) -> Result<()> {
        let config_id: u32 = rand::random();
        self.write_payload(&encode_want_config(config_id)).await?;

        let deadline = Instant::now() + self.handshake_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(TransportError::HandshakeFailed(format!(
                    "no config-complete within {:?}",
                    self.handshake_timeout
                )));
            }

            let Some(frame) = self.next_frame().await? else {
                continue;
            };

            match decode_from_radio(&frame) {
                Ok(FromRadio::ConfigComplete { id }) if id == config_id => break,
                Ok(FromRadio::ConfigComplete { id }) => {
                    debug!(id, expected = config_id, "Stale config-complete");
                }
                _ => {
                    if let Some(event) = self.absorb_frame(frame) {
                        self.pending.push_back(event);
                    }
                }
            }
        }

        match self.node_num {
            Some(node) => info!(adapter = %self.name, node = %format_node_id(node), "Session started"),
            None => warn!(adapter = %self.name, "Radio did not report its node number"),
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        self.state = ConnectionState::Disconnected;
        self.decoder.clear();
        info!(adapter = %self.name, "Disconnected from radio");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.link.is_some()
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn read_event(&mut self) -> Result<Option<RawEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        match self.next_frame().await? {
            Some(frame) => Ok(self.absorb_frame(frame)),
            None => Ok(None),
        }
    }

    async fn send_broadcast(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        self.send_record(BROADCAST_ADDR, channel, payload).await
    }

    async fn send_direct(&mut self, node_id: u32, payload: &[u8]) -> Result<()> {
        self.send_record(node_id, 0, payload).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> NetworkSource {
        NetworkSource::NetworkA
    }

    fn local_node_id(&self) -> Option<u32> {
        self.node_num
    }

    fn max_text_len(&self) -> usize {
        MESHTASTIC_MAX_TEXT
    }
}

impl std::fmt::Debug for MeshtasticAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshtasticAdapter")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("node_num", &self.node_num)
            .field("buffered", &self.decoder.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::meshtastic::{decode_record, encode_config_complete, encode_my_info};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_host_frame(socket: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 4];
        socket.read_exact(&mut header).await.unwrap();
        assert_eq!(&header[..2], &[0x94, 0xC3]);
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; len];
        socket.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn write_radio_frame(socket: &mut TcpStream, payload: &[u8]) {
        let frame = FrameFormat::Meshtastic.encode(payload).unwrap();
        socket.write_all(&frame).await.unwrap();
    }

    fn text_from(from: u32, text: &str) -> MeshtasticRecord {
        MeshtasticRecord {
            from,
            to: BROADCAST_ADDR,
            packet_id: 1,
            channel: 0,
            port_num: MeshtasticPort::TextMessage.into(),
            payload: Bytes::copy_from_slice(text.as_bytes()),
            hop_limit: 3,
            want_ack: false,
            direct: false,
            rx_snr: None,
            rx_rssi: None,
        }
    }

    #[tokio::test]
    async fn test_handshake_then_read_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let radio = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let want = read_host_frame(&mut socket).await;
            assert_eq!(want[0], 0x04);
            let id = u32::from_be_bytes([want[1], want[2], want[3], want[4]]);

            write_radio_frame(&mut socket, &encode_my_info(0xCAFE0001)).await;
            // Traffic during the config dump must not be lost
            write_radio_frame(&mut socket, &encode_packet(&text_from(0x1234, "early"))).await;
            write_radio_frame(&mut socket, &encode_config_complete(id)).await;
            write_radio_frame(&mut socket, &encode_packet(&text_from(0x5678, "/ping"))).await;

            let sent = read_host_frame(&mut socket).await;
            decode_record(&sent[1..]).unwrap()
        });

        let mut adapter = MeshtasticAdapter::new(LinkConfig::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
        .with_handshake_timeout(Duration::from_secs(2));

        adapter.connect().await.unwrap();
        adapter.begin_session().await.unwrap();
        assert_eq!(adapter.local_node_id(), Some(0xCAFE0001));

        let mut texts = Vec::new();
        while texts.len() < 2 {
            if let Some(RawEvent::NetworkA(record)) = adapter.read_event().await.unwrap() {
                texts.push(String::from_utf8(record.payload.to_vec()).unwrap());
            }
        }
        assert_eq!(texts, vec!["early", "/ping"]);

        adapter.send_broadcast(2, b"pong").await.unwrap();
        let sent = radio.await.unwrap();
        assert_eq!(sent.from, 0xCAFE0001);
        assert_eq!(sent.to, BROADCAST_ADDR);
        assert_eq!(sent.channel, 2);
        assert_eq!(sent.payload.as_ref(), b"pong");
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _radio = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut adapter = MeshtasticAdapter::new(LinkConfig::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
        .with_handshake_timeout(Duration::from_millis(100))
        .with_read_poll(Duration::from_millis(20));

        adapter.connect().await.unwrap();
        let err = adapter.begin_session().await.unwrap_err();
        assert_eq!(err.error_code(), "HANDSHAKE_FAILED");
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut adapter = MeshtasticAdapter::new(LinkConfig::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        });
        let err = adapter.send_direct(0x1234, b"hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_oversized_text_rejected() {
        let mut adapter = MeshtasticAdapter::new(LinkConfig::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        });
        let text = vec![b'x'; MESHTASTIC_MAX_TEXT + 1];
        let err = adapter.send_broadcast(0, &text).await.unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
    }
}
