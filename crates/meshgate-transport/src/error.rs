//! Error types for radio transport operations
//!
//! Covers opening links, session handshakes, stream framing and record
//! decoding for both radio networks.

use thiserror::Error;

/// Main error type for transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    // ===== Link Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// TCP connection refused or unreachable
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionRefused {
        /// host:port
        endpoint: String,
        /// Failure reason
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Radio did not complete the session handshake
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Link type not available in this build
    #[error("Unsupported link: {0}")]
    Unsupported(String),

    // ===== Stream Errors =====
    /// Read error
    #[error("Read error: {0}")]
    ReadError(String),

    /// Write error
    #[error("Write error: {0}")]
    WriteError(String),

    /// Link dropped
    #[error("Radio disconnected")]
    Disconnected,

    /// Operation attempted before connect
    #[error("Radio not connected")]
    NotConnected,

    // ===== Protocol Errors =====
    /// Stream framing violated (bad length, truncated frame)
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame payload could not be decoded as a record
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Payload exceeds what the radio accepts
    #[error("Message too large: {size} bytes exceeds radio maximum of {max} bytes")]
    MessageTooLarge {
        /// Actual message size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// No addressing information for a destination node
    #[error("Unknown node: !{0:08x}")]
    UnknownNode(u32),

    // ===== General Errors =====
    /// Mock or in-process channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Check if this error is recoverable by reconnecting
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionTimeout { .. }
                | TransportError::ConnectionRefused { .. }
                | TransportError::Disconnected
                | TransportError::NotConnected
                | TransportError::ReadError(_)
                | TransportError::WriteError(_)
                | TransportError::Io(_)
        )
    }

    /// Check if this is a protocol error (bad data from the radio)
    ///
    /// Protocol errors drop one frame; the link stays up.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidFrame(_) | TransportError::InvalidRecord(_)
        )
    }

    /// Check if this error happened while establishing a link
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            TransportError::PortNotFound(_)
                | TransportError::PortOpenFailed { .. }
                | TransportError::ConnectionRefused { .. }
                | TransportError::ConnectionTimeout { .. }
                | TransportError::HandshakeFailed(_)
                | TransportError::Unsupported(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::PortNotFound(_) => "PORT_NOT_FOUND",
            TransportError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            TransportError::ConnectionRefused { .. } => "CONNECTION_REFUSED",
            TransportError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            TransportError::HandshakeFailed(_) => "HANDSHAKE_FAILED",
            TransportError::Unsupported(_) => "UNSUPPORTED",
            TransportError::ReadError(_) => "READ_ERROR",
            TransportError::WriteError(_) => "WRITE_ERROR",
            TransportError::Disconnected => "DISCONNECTED",
            TransportError::NotConnected => "NOT_CONNECTED",
            TransportError::InvalidFrame(_) => "INVALID_FRAME",
            TransportError::InvalidRecord(_) => "INVALID_RECORD",
            TransportError::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            TransportError::UnknownNode(_) => "UNKNOWN_NODE",
            TransportError::ChannelClosed => "CHANNEL_CLOSED",
            TransportError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

// Conversion from serialport error (only when serial feature is enabled)
#[cfg(feature = "serial")]
impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(err.description),
            serialport::ErrorKind::Io(kind) => {
                TransportError::Io(std::io::Error::new(kind, err.description))
            }
            _ => TransportError::PortOpenFailed {
                port: String::new(),
                reason: err.description,
            },
        }
    }
}
