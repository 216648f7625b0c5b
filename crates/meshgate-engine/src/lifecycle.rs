//! Adapter lifecycle task
//!
//! Each adapter that could be built is owned by one [`AdapterTask`]. The
//! task reads events and pushes them onto the shared inbound queue, performs
//! sends queued by the transmitter, and reconnects with backoff when the
//! link drops or never came up at startup. The two networks' tasks never share mutable state; a task that is
//! reconnecting simply stops producing events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshgate_core::{format_node_id, NetworkSource, ReconnectConfig};
use meshgate_transport::{RawEvent, TransportAdapter, TransportError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::directory::OwnNodeIds;
use crate::health::Backoff;
use crate::normalizer::InboundEvent;
use crate::status::AdapterStatus;
use crate::transmit::{OutboundCommand, OutboundTarget};

/// Idle wait used when the adapter is down for good
const PARKED_WAIT: Duration = Duration::from_secs(3600);

/// Owns one adapter for the life of the engine
pub struct AdapterTask {
    adapter: Box<dyn TransportAdapter>,
    source: NetworkSource,
    status: Arc<AdapterStatus>,
    own_ids: Arc<OwnNodeIds>,
    inbound: mpsc::Sender<InboundEvent>,
    outbound: mpsc::Receiver<OutboundCommand>,
    shutdown: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
}

impl AdapterTask {
    /// Wrap an adapter; one that is not connected is reconnected first
    pub fn new(
        adapter: Box<dyn TransportAdapter>,
        status: Arc<AdapterStatus>,
        own_ids: Arc<OwnNodeIds>,
        inbound: mpsc::Sender<InboundEvent>,
        outbound: mpsc::Receiver<OutboundCommand>,
        shutdown: watch::Receiver<bool>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let source = adapter.source();
        Self {
            adapter,
            source,
            status,
            own_ids,
            inbound,
            outbound,
            shutdown,
            reconnect,
        }
    }

    /// Network this task serves
    pub fn source(&self) -> NetworkSource {
        self.source
    }

    /// Run until shutdown
    pub async fn run(mut self) {
        info!(source = %self.source, adapter = self.adapter.name(), "Adapter task started");
        let mut backoff = Backoff::from_config(&self.reconnect);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if !self.adapter.is_connected() {
                if !self.reconnect.enabled {
                    warn!(source = %self.source, "Link down and auto-reconnect is disabled");
                    self.park().await;
                    break;
                }
                if !self.reconnect_with_backoff(&mut backoff).await {
                    break;
                }
                continue;
            }

            if let Err(e) = self.adapter.service().await {
                self.on_error(e).await;
                continue;
            }

            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    break;
                }

                Some(cmd) = self.outbound.recv() => {
                    self.send(cmd).await;
                }

                result = self.adapter.read_event() => {
                    match result {
                        Ok(Some(event)) => {
                            if !self.forward(event).await {
                                break;
                            }
                        }
                        Ok(None) => {
                            trace!(source = %self.source, "No event available");
                        }
                        Err(e) => self.on_error(e).await,
                    }
                }
            }
        }

        self.finish().await;
    }

    /// Push an event onto the inbound queue; `false` on shutdown or if the
    /// pipeline is gone
    ///
    /// Sends keep being served while the queue is full, so a handler
    /// waiting on a reply ack never waits on the pipeline.
    async fn forward(&mut self, event: RawEvent) -> bool {
        self.status.touch(Instant::now());
        let local_id = self
            .own_ids
            .get(self.source)
            .or_else(|| self.adapter.local_node_id());
        let inbound = InboundEvent::new(self.source, local_id, event);
        let inbound_tx = self.inbound.clone();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    debug!(source = %self.source, "Shutdown while inbound queue was full, dropping event");
                    return false;
                }

                reserved = inbound_tx.reserve() => {
                    match reserved {
                        Ok(permit) => {
                            permit.send(inbound);
                            return true;
                        }
                        Err(_) => {
                            warn!(source = %self.source, "Inbound queue closed, stopping adapter task");
                            return false;
                        }
                    }
                }

                Some(cmd) = self.outbound.recv() => {
                    self.send(cmd).await;
                }
            }
        }
    }

    async fn on_error(&mut self, e: TransportError) {
        if e.is_protocol_error() {
            warn!(source = %self.source, code = e.error_code(), error = %e, "Dropped malformed frame");
            return;
        }

        warn!(source = %self.source, code = e.error_code(), error = %e, "Radio link lost");
        self.status.mark_disconnected(&e.to_string());
        if self.adapter.is_connected() {
            let _ = self.adapter.disconnect().await;
        }
    }

    async fn send(&mut self, cmd: OutboundCommand) {
        let OutboundCommand {
            target,
            payload,
            ack,
        } = cmd;

        let result = if self.adapter.is_connected() {
            match target {
                OutboundTarget::Broadcast { channel } => {
                    self.adapter.send_broadcast(channel, &payload).await
                }
                OutboundTarget::Direct { node_id } => self.adapter.send_direct(node_id, &payload).await,
            }
        } else {
            Err(TransportError::NotConnected)
        };

        match &result {
            Ok(()) => trace!(source = %self.source, target = ?target, "Outbound sent"),
            Err(e) if e.is_retriable() => {
                warn!(source = %self.source, error = %e, "Send failed, link presumed down");
                self.status.mark_disconnected(&e.to_string());
                let _ = self.adapter.disconnect().await;
            }
            Err(e) => debug!(source = %self.source, error = %e, "Send rejected"),
        }
        let _ = ack.send(result);
    }

    /// Reconnect until success; `false` on shutdown or exhausted attempts
    async fn reconnect_with_backoff(&mut self, backoff: &mut Backoff) -> bool {
        loop {
            let Some(delay) = backoff.next_delay() else {
                error!(
                    source = %self.source,
                    attempts = backoff.attempts(),
                    "Giving up on reconnecting"
                );
                self.park().await;
                return false;
            };

            info!(
                source = %self.source,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            if !self.idle(delay).await {
                return false;
            }

            self.status.mark_reconnect_attempt();
            let result = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return false,
                result = self.adapter.reconnect() => result,
            };

            match result {
                Ok(()) => {
                    let node_id = self.adapter.local_node_id();
                    self.own_ids.learn(self.source, node_id);
                    self.status.mark_reconnected(self.adapter.name(), node_id, Instant::now());
                    info!(
                        source = %self.source,
                        node = %node_id.map(format_node_id).unwrap_or_default(),
                        attempts = backoff.attempts(),
                        "Reconnected"
                    );
                    backoff.reset();
                    return true;
                }
                Err(e) => {
                    warn!(source = %self.source, code = e.error_code(), error = %e, "Reconnect failed");
                    self.status.mark_reconnect_failed(&e.to_string());
                }
            }
        }
    }

    /// Wait `delay`, rejecting sends meanwhile; `false` on shutdown
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return false,
                _ = &mut sleep => return true,
                Some(cmd) = self.outbound.recv() => {
                    let _ = cmd.ack.send(Err(TransportError::NotConnected));
                }
            }
        }
    }

    /// Stay down until shutdown
    async fn park(&mut self) {
        while self.idle(PARKED_WAIT).await {}
    }

    /// Flush queued sends and close the link
    async fn finish(&mut self) {
        let mut flushed = 0usize;
        while let Ok(cmd) = self.outbound.try_recv() {
            self.send(cmd).await;
            flushed += 1;
        }
        if flushed > 0 {
            debug!(source = %self.source, flushed, "Flushed queued sends");
        }

        if let Err(e) = self.adapter.disconnect().await {
            warn!(source = %self.source, error = %e, "Error disconnecting radio");
        }
        self.status.mark_stopped();
        info!(source = %self.source, "Adapter task stopped");
    }
}

impl std::fmt::Debug for AdapterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterTask")
            .field("source", &self.source)
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_transport::{MockAdapter, MockControl, SentFrame};
    use tokio::sync::oneshot;

    struct Harness {
        control: MockControl,
        status: Arc<AdapterStatus>,
        own_ids: Arc<OwnNodeIds>,
        inbound: mpsc::Receiver<InboundEvent>,
        outbound: mpsc::Sender<OutboundCommand>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start(source: NetworkSource) -> Harness {
        start_with_queue(source, 16).await
    }

    async fn start_with_queue(source: NetworkSource, inbound_queue: usize) -> Harness {
        let (mut adapter, control) = MockAdapter::new(source);
        control.set_local_node_id(0x16fa_d3dc);
        adapter.connect().await.unwrap();

        let status = Arc::new(AdapterStatus::new(source, true));
        status.mark_active(adapter.name(), adapter.local_node_id(), Instant::now());
        let own_ids = Arc::new(OwnNodeIds::new());
        let (in_tx, in_rx) = mpsc::channel(inbound_queue);
        let (out_tx, out_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconnect = ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts: 0,
        };

        let task = AdapterTask::new(
            Box::new(adapter),
            status.clone(),
            own_ids.clone(),
            in_tx,
            out_rx,
            shutdown_rx,
            reconnect,
        );
        Harness {
            control,
            status,
            own_ids,
            inbound: in_rx,
            outbound: out_tx,
            shutdown: shutdown_tx,
            task: tokio::spawn(task.run()),
        }
    }

    async fn send(h: &Harness, target: OutboundTarget, text: &str) -> Result<(), TransportError> {
        let (ack, rx) = oneshot::channel();
        h.outbound
            .send(OutboundCommand {
                target,
                payload: text.as_bytes().to_vec(),
                ack,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_events_forwarded_with_local_id() {
        let mut h = start(NetworkSource::NetworkB).await;
        h.control.push_channel_text(0, "Tigro: /echo hi");

        let event = tokio::time::timeout(Duration::from_secs(1), h.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.source, NetworkSource::NetworkB);
        assert_eq!(event.local_node_id, Some(0x16fa_d3dc));
        assert_eq!(h.status.report(Instant::now()).events_received, 1);

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_outbound_sends_are_acknowledged() {
        let h = start(NetworkSource::NetworkA).await;
        send(&h, OutboundTarget::Broadcast { channel: 1 }, "pong").await.unwrap();
        send(&h, OutboundTarget::Direct { node_id: 9 }, "hi").await.unwrap();

        let sent = h.control.sent();
        assert_eq!(
            sent,
            vec![
                SentFrame::Broadcast {
                    channel: 1,
                    payload: b"pong".to_vec()
                },
                SentFrame::Direct {
                    node_id: 9,
                    payload: b"hi".to_vec()
                },
            ]
        );
        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sends_served_while_inbound_queue_full() {
        let mut h = start_with_queue(NetworkSource::NetworkA, 1).await;
        h.control.push_record_text(1, 2, 0, "one");
        h.control.push_record_text(1, 2, 0, "two");

        // "one" fills the queue, "two" is read and waiting for room
        for _ in 0..100 {
            if h.status.report(Instant::now()).events_received == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.status.report(Instant::now()).events_received, 2);

        tokio::time::timeout(
            Duration::from_secs(1),
            send(&h, OutboundTarget::Direct { node_id: 9 }, "pong"),
        )
        .await
        .expect("send should not wait on the inbound queue")
        .unwrap();
        assert_eq!(h.control.sent().len(), 1);

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(1), h.inbound.recv())
                .await
                .unwrap()
                .unwrap();
        }

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_link() {
        let mut h = start(NetworkSource::NetworkA).await;
        h.control.push_error(TransportError::InvalidFrame("short".into()));
        h.control.push_record_text(1, 2, 0, "after");

        let event = tokio::time::timeout(Duration::from_secs(1), h.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!event.is_garbled());
        assert_eq!(h.control.connect_calls(), 1);
        assert!(h.status.is_connected());

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_link_drop() {
        let mut h = start(NetworkSource::NetworkB).await;
        h.control.fail_connects(2);
        h.control.drop_link();

        // Keeps retrying with backoff, then resumes reading
        h.control.push_channel_text(0, "back");
        let event = tokio::time::timeout(Duration::from_secs(2), h.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.source, NetworkSource::NetworkB);
        assert_eq!(h.control.connect_calls(), 4);
        assert!(h.control.session_calls() >= 1);
        assert_eq!(h.own_ids.get(NetworkSource::NetworkB), Some(0x16fa_d3dc));

        let report = h.status.report(Instant::now());
        assert_eq!(report.reconnect_attempts, 3);
        assert_eq!(report.reconnects, 1);

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect() {
        let h = start(NetworkSource::NetworkA).await;
        h.control.fail_connect(true);
        h.control.drop_link();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap();
        let calls = h.control.connect_calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.control.connect_calls(), calls);
        assert!(!h.status.is_active());
    }

    #[tokio::test]
    async fn test_sends_rejected_while_down() {
        let h = start(NetworkSource::NetworkA).await;
        h.control.fail_connect(true);
        h.control.drop_link();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = send(&h, OutboundTarget::Broadcast { channel: 0 }, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
    }
}
