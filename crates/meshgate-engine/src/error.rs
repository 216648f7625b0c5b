//! Error types for the routing engine

use meshgate_core::{CoreError, NetworkSource};
use meshgate_transport::TransportError;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// No transport came up at startup
    #[error("No transport could be started: {0}")]
    AllTransportsFailed(String),

    /// Network is not active in the current mode
    #[error("Network {0} is not active")]
    NotActive(NetworkSource),

    /// Outbound send did not complete in time
    #[error("Send to {network} timed out after {duration_ms}ms")]
    SendTimeout {
        /// Target network
        network: NetworkSource,
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    /// A task or channel the engine relies on is gone
    #[error("Engine channel closed")]
    ChannelClosed,

    /// Shutdown did not finish within the grace period
    #[error("Shutdown grace period of {duration_ms}ms exceeded")]
    ShutdownTimeout {
        /// Grace period in milliseconds
        duration_ms: u64,
    },

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] CoreError),
}

impl EngineError {
    /// Check if a retry might succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::SendTimeout { .. } => true,
            EngineError::Transport(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::AllTransportsFailed(_) => "ALL_TRANSPORTS_FAILED",
            EngineError::NotActive(_) => "NOT_ACTIVE",
            EngineError::SendTimeout { .. } => "SEND_TIMEOUT",
            EngineError::ChannelClosed => "CHANNEL_CLOSED",
            EngineError::ShutdownTimeout { .. } => "SHUTDOWN_TIMEOUT",
            EngineError::Transport(e) => e.error_code(),
            EngineError::Config(e) => e.error_code(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure reported by a command handler
///
/// Handler errors are caught at the router and logged with the command
/// context; they never reach the packet pipeline.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Arguments did not make sense for the command
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Sending the reply failed
    #[error("Reply failed: {0}")]
    Reply(#[from] EngineError),

    /// Handler-specific failure
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            HandlerError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            HandlerError::Reply(_) => "REPLY_FAILED",
            HandlerError::Failed(_) => "HANDLER_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            EngineError::NotActive(NetworkSource::NetworkB).error_code(),
            "NOT_ACTIVE"
        );
        let wrapped = EngineError::from(TransportError::Disconnected);
        assert_eq!(wrapped.error_code(), "DISCONNECTED");
        assert!(wrapped.is_retriable());
    }

    #[test]
    fn test_display() {
        let err = EngineError::NotActive(NetworkSource::NetworkB);
        assert_eq!(err.to_string(), "Network network_b is not active");

        let err = HandlerError::from(EngineError::ChannelClosed);
        assert_eq!(err.error_code(), "REPLY_FAILED");
    }
}
