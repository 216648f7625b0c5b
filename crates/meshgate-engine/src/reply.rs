//! Reply sink handed to command handlers
//!
//! A handler answers through [`ReplySink`] without knowing which transport
//! the request came from. Replies always go back to the originating network.
//! By default a broadcast request is answered on the same channel and a
//! direct request is answered directly to the sender.

use std::sync::Arc;

use meshgate_core::{ClassifiedPacket, NetworkSource, UNKNOWN_NODE};
use meshgate_transport::TransportError;

use crate::error::{EngineError, Result};
use crate::transmit::{OutboundTarget, Transmitter};

/// How a reply is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyOptions {
    /// Broadcast on a channel instead of replying to the sender
    pub broadcast: bool,
    /// Channel for broadcast replies; the request's channel when unset
    pub channel: Option<u8>,
}

impl ReplyOptions {
    /// Broadcast on the request's channel
    pub fn broadcast() -> Self {
        Self {
            broadcast: true,
            channel: None,
        }
    }

    /// Reply directly to the sender
    pub fn direct() -> Self {
        Self {
            broadcast: false,
            channel: None,
        }
    }

    /// Broadcast on a specific channel
    pub fn on_channel(channel: u8) -> Self {
        Self {
            broadcast: true,
            channel: Some(channel),
        }
    }
}

/// Sends handler output back to where a request came from
#[derive(Debug, Clone)]
pub struct ReplySink {
    transmitter: Arc<Transmitter>,
    source: NetworkSource,
    sender_id: u32,
    channel: u8,
    defaults: ReplyOptions,
}

impl ReplySink {
    /// Sink answering `packet`
    pub fn for_packet(transmitter: Arc<Transmitter>, packet: &ClassifiedPacket) -> Self {
        let defaults = if packet.is_broadcast {
            ReplyOptions::broadcast()
        } else {
            ReplyOptions::direct()
        };
        Self {
            transmitter,
            source: packet.source(),
            sender_id: packet.packet.sender_id(),
            channel: packet.packet.channel(),
            defaults,
        }
    }

    /// Network replies go to
    pub fn source(&self) -> NetworkSource {
        self.source
    }

    /// Options used by [`reply`](Self::reply)
    pub fn defaults(&self) -> ReplyOptions {
        self.defaults
    }

    /// Longest text sent without chunking
    pub fn max_text_len(&self) -> Option<usize> {
        self.transmitter.max_text_len(self.source)
    }

    /// Reply using the request's defaults
    pub async fn reply(&self, text: &str) -> Result<usize> {
        self.reply_with(text, self.defaults).await
    }

    /// Reply with explicit delivery options
    ///
    /// Returns the number of radio messages sent.
    pub async fn reply_with(&self, text: &str, options: ReplyOptions) -> Result<usize> {
        let target = if options.broadcast {
            OutboundTarget::Broadcast {
                channel: options.channel.unwrap_or(self.channel),
            }
        } else {
            if self.sender_id == UNKNOWN_NODE {
                return Err(EngineError::Transport(TransportError::UnknownNode(
                    self.sender_id,
                )));
            }
            OutboundTarget::Direct {
                node_id: self.sender_id,
            }
        };
        self.transmitter.send_text(self.source, target, text).await
    }
}
