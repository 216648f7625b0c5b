//! Scripted adapter for tests
//!
//! [`MockAdapter`] implements [`TransportAdapter`] without a radio. The
//! paired [`MockControl`] stays with the test: it feeds inbound events and
//! errors, switches connect/handshake failures on and off, and records every
//! send the adapter was asked to make.
//!
//! ```rust,ignore
//! let (adapter, control) = MockAdapter::new(NetworkSource::NetworkB);
//! control.set_local_node_id(0x16fad3dc);
//! control.push_channel_text(0, "Tigro: /echo hi");
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use meshgate_core::{NetworkSource, BROADCAST_ADDR};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::adapter::{ConnectionState, TransportAdapter};
use crate::error::{Result, TransportError};
use crate::event::{MeshCoreEvent, MeshtasticPort, MeshtasticRecord, RawEvent, TextType};

/// How long an idle mock read waits before returning `None`
const MOCK_READ_POLL: Duration = Duration::from_millis(20);

/// A send captured by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    /// `send_broadcast`
    Broadcast {
        /// Channel index
        channel: u8,
        /// Payload bytes
        payload: Vec<u8>,
    },
    /// `send_direct`
    Direct {
        /// Destination node
        node_id: u32,
        /// Payload bytes
        payload: Vec<u8>,
    },
}

impl SentFrame {
    /// Payload as text
    pub fn text(&self) -> String {
        let payload = match self {
            SentFrame::Broadcast { payload, .. } | SentFrame::Direct { payload, .. } => payload,
        };
        String::from_utf8_lossy(payload).into_owned()
    }

    /// Whether this was a broadcast
    pub fn is_broadcast(&self) -> bool {
        matches!(self, SentFrame::Broadcast { .. })
    }
}

enum MockInput {
    Event(RawEvent),
    Error(TransportError),
}

#[derive(Debug, Default)]
struct MockShared {
    local_node_id: Option<u32>,
    fail_connect: bool,
    fail_connects_remaining: u32,
    fail_session: bool,
    fail_sends: bool,
    connect_calls: u32,
    session_calls: u32,
    disconnect_calls: u32,
    sent: Vec<SentFrame>,
}

/// Test-side handle for a [`MockAdapter`]
#[derive(Clone)]
pub struct MockControl {
    inbound: mpsc::UnboundedSender<MockInput>,
    shared: Arc<Mutex<MockShared>>,
    sent_notify: Arc<Notify>,
    source: NetworkSource,
}

/// Transport adapter driven by a [`MockControl`]
pub struct MockAdapter {
    source: NetworkSource,
    name: String,
    state: ConnectionState,
    inbound: mpsc::UnboundedReceiver<MockInput>,
    shared: Arc<Mutex<MockShared>>,
    sent_notify: Arc<Notify>,
    max_text_len: usize,
}

impl MockAdapter {
    /// Create a mock adapter for `source` and its control handle
    pub fn new(source: NetworkSource) -> (Self, MockControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(MockShared::default()));
        let sent_notify = Arc::new(Notify::new());

        let adapter = Self {
            source,
            name: format!("mock:{}", source),
            state: ConnectionState::Disconnected,
            inbound: rx,
            shared: shared.clone(),
            sent_notify: sent_notify.clone(),
            max_text_len: match source {
                NetworkSource::NetworkB => 140,
                _ => 228,
            },
        };
        let control = MockControl {
            inbound: tx,
            shared,
            sent_notify,
            source,
        };
        (adapter, control)
    }

    /// Override the longest accepted text
    pub fn with_max_text_len(mut self, max: usize) -> Self {
        self.max_text_len = max;
        self
    }

    fn record_send(&mut self, frame: SentFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let payload_len = match &frame {
            SentFrame::Broadcast { payload, .. } | SentFrame::Direct { payload, .. } => {
                payload.len()
            }
        };
        if payload_len > self.max_text_len {
            return Err(TransportError::MessageTooLarge {
                size: payload_len,
                max: self.max_text_len,
            });
        }

        {
            let mut shared = self.shared.lock();
            if shared.fail_sends {
                return Err(TransportError::WriteError("simulated write failure".into()));
            }
            shared.sent.push(frame);
        }
        self.sent_notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl TransportAdapter for MockAdapter {
    async fn connect(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.connect_calls += 1;

        let fail = if shared.fail_connects_remaining > 0 {
            shared.fail_connects_remaining -= 1;
            true
        } else {
            shared.fail_connect
        };
        if fail {
            self.state = ConnectionState::Disconnected;
            return Err(TransportError::ConnectionRefused {
                endpoint: self.name.clone(),
                reason: "simulated connect failure".into(),
            });
        }

        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn begin_session(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.session_calls += 1;
        if shared.fail_session {
            return Err(TransportError::HandshakeFailed(
                "simulated handshake failure".into(),
            ));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.shared.lock().disconnect_calls += 1;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn read_event(&mut self) -> Result<Option<RawEvent>> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        match tokio::time::timeout(MOCK_READ_POLL, self.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(MockInput::Event(event))) => Ok(Some(event)),
            Ok(Some(MockInput::Error(err))) => {
                if !err.is_protocol_error() {
                    self.state = ConnectionState::Disconnected;
                }
                Err(err)
            }
            Ok(None) => {
                // Control dropped; behave like a quiet radio
                tokio::time::sleep(MOCK_READ_POLL).await;
                Ok(None)
            }
        }
    }

    async fn send_broadcast(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        self.record_send(SentFrame::Broadcast {
            channel,
            payload: payload.to_vec(),
        })
    }

    async fn send_direct(&mut self, node_id: u32, payload: &[u8]) -> Result<()> {
        self.record_send(SentFrame::Direct {
            node_id,
            payload: payload.to_vec(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> NetworkSource {
        self.source
    }

    fn local_node_id(&self) -> Option<u32> {
        self.shared.lock().local_node_id
    }

    fn max_text_len(&self) -> usize {
        self.max_text_len
    }
}

impl MockControl {
    /// Network of the paired adapter
    pub fn source(&self) -> NetworkSource {
        self.source
    }

    /// Node id the adapter reports after its handshake
    pub fn set_local_node_id(&self, node_id: u32) {
        self.shared.lock().local_node_id = Some(node_id);
    }

    /// Make every connect fail (or succeed again)
    pub fn fail_connect(&self, fail: bool) {
        self.shared.lock().fail_connect = fail;
    }

    /// Make the next `n` connects fail
    pub fn fail_connects(&self, n: u32) {
        self.shared.lock().fail_connects_remaining = n;
    }

    /// Make the handshake fail (or succeed again)
    pub fn fail_session(&self, fail: bool) {
        self.shared.lock().fail_session = fail;
    }

    /// Make sends fail with a write error
    pub fn fail_sends(&self, fail: bool) {
        self.shared.lock().fail_sends = fail;
    }

    /// Queue an inbound event
    pub fn push_event(&self, event: RawEvent) {
        let _ = self.inbound.send(MockInput::Event(event));
    }

    /// Queue a read error
    pub fn push_error(&self, err: TransportError) {
        let _ = self.inbound.send(MockInput::Error(err));
    }

    /// Simulate the radio dropping the link
    pub fn drop_link(&self) {
        self.push_error(TransportError::Disconnected);
    }

    /// Queue a Network A text packet
    pub fn push_record_text(&self, from: u32, to: u32, channel: u8, text: &str) {
        self.push_event(RawEvent::NetworkA(MeshtasticRecord {
            from,
            to,
            packet_id: rand::random(),
            channel,
            port_num: MeshtasticPort::TextMessage.into(),
            payload: Bytes::copy_from_slice(text.as_bytes()),
            hop_limit: 3,
            want_ack: to != BROADCAST_ADDR,
            direct: false,
            rx_snr: None,
            rx_rssi: None,
        }));
    }

    /// Queue a Network B public channel message
    pub fn push_channel_text(&self, channel_idx: u8, text: &str) {
        self.push_event(RawEvent::NetworkB(MeshCoreEvent::ChannelMessage {
            channel_idx,
            path_len: 0,
            text_type: TextType::Plain,
            sender_timestamp: 0,
            text: text.to_string(),
            snr: None,
        }));
    }

    /// Queue a Network B direct message
    pub fn push_contact_text(&self, pubkey_prefix: [u8; 6], text: &str) {
        self.push_event(RawEvent::NetworkB(MeshCoreEvent::ContactMessage {
            pubkey_prefix,
            path_len: 0,
            text_type: TextType::Plain,
            sender_timestamp: 0,
            text: text.to_string(),
            snr: None,
        }));
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<SentFrame> {
        self.shared.lock().sent.clone()
    }

    /// Forget captured sends
    pub fn clear_sent(&self) {
        self.shared.lock().sent.clear();
    }

    /// Wait until at least `count` sends were captured
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<SentFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.sent_notify.notified();
            {
                let shared = self.shared.lock();
                if shared.sent.len() >= count {
                    return shared.sent.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent();
            }
        }
    }

    /// Number of connect attempts
    pub fn connect_calls(&self) -> u32 {
        self.shared.lock().connect_calls
    }

    /// Number of handshakes attempted
    pub fn session_calls(&self) -> u32 {
        self.shared.lock().session_calls
    }

    /// Number of disconnects
    pub fn disconnect_calls(&self) -> u32 {
        self.shared.lock().disconnect_calls
    }
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("source", &self.source)
            .field("state", &self.state)
            .finish()
    }
}
