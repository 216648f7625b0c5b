//! Byte-stream links to a radio
//!
//! A [`Link`] is the raw transport under an adapter: a TCP socket, or a
//! serial port when the `serial` feature is enabled. Framing lives in
//! [`crate::framing`]; this module only moves bytes.

use std::time::Duration;

use meshgate_core::LinkConfig;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace};

#[cfg(feature = "serial")]
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Result, TransportError};

/// Size of a single read from the link
pub const READ_CHUNK_SIZE: usize = 512;

/// An open byte stream to a radio
pub enum Link {
    /// Networked radio
    Tcp(TcpStream),
    /// USB serial radio
    #[cfg(feature = "serial")]
    Serial(SerialStream),
}

impl Link {
    /// Open the link described by `config`
    pub async fn open(config: &LinkConfig, connect_timeout: Duration) -> Result<Self> {
        match config {
            LinkConfig::Tcp { host, port } => {
                let endpoint = format!("{}:{}", host, port);
                info!(endpoint = %endpoint, "Opening TCP link");

                let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&endpoint))
                    .await
                    .map_err(|_| TransportError::ConnectionTimeout {
                        duration_ms: connect_timeout.as_millis() as u64,
                    })?
                    .map_err(|e| TransportError::ConnectionRefused {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    })?;

                stream.set_nodelay(true)?;
                Ok(Link::Tcp(stream))
            }
            #[cfg(feature = "serial")]
            LinkConfig::Serial { port, baud_rate } => {
                info!(port = %port.display(), baud = baud_rate, "Opening serial link");

                if !port.exists() {
                    return Err(TransportError::PortNotFound(port.display().to_string()));
                }

                let stream = tokio_serial::new(port.to_string_lossy(), *baud_rate)
                    .timeout(connect_timeout)
                    .open_native_async()
                    .map_err(|e| TransportError::PortOpenFailed {
                        port: port.display().to_string(),
                        reason: e.to_string(),
                    })?;

                Ok(Link::Serial(stream))
            }
            #[cfg(not(feature = "serial"))]
            LinkConfig::Serial { port, .. } => Err(TransportError::Unsupported(format!(
                "serial link {} requires the `serial` feature",
                port.display()
            ))),
        }
    }

    /// Read whatever the radio has sent, waiting at most `poll`
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Cancel-safe: no bytes
    /// are consumed from the stream unless the future completes.
    pub async fn read_chunk(&mut self, buf: &mut [u8], poll: Duration) -> Result<Option<usize>> {
        let read = match self {
            Link::Tcp(stream) => tokio::time::timeout(poll, stream.read(buf)).await,
            #[cfg(feature = "serial")]
            Link::Serial(stream) => tokio::time::timeout(poll, stream.read(buf)).await,
        };

        match read {
            Err(_) => Ok(None),
            Ok(Ok(0)) => {
                debug!("Link closed by radio");
                Err(TransportError::Disconnected)
            }
            Ok(Ok(n)) => {
                trace!(bytes = n, "Read from link");
                Ok(Some(n))
            }
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(None)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Link read error");
                Err(TransportError::ReadError(e.to_string()))
            }
        }
    }

    /// Write one complete frame and flush it
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let result = match self {
            Link::Tcp(stream) => write_all_flush(stream, frame).await,
            #[cfg(feature = "serial")]
            Link::Serial(stream) => write_all_flush(stream, frame).await,
        };

        result.map_err(|e| {
            error!(error = %e, "Link write error");
            TransportError::WriteError(e.to_string())
        })
    }

    /// Close the link, flushing what is buffered
    pub async fn close(self) {
        match self {
            Link::Tcp(mut stream) => {
                let _ = stream.shutdown().await;
            }
            #[cfg(feature = "serial")]
            Link::Serial(stream) => drop(stream),
        }
    }
}

async fn write_all_flush<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Link::Tcp(stream) => f
                .debug_tuple("Link::Tcp")
                .field(&stream.peer_addr().ok())
                .finish(),
            #[cfg(feature = "serial")]
            Link::Serial(_) => f.write_str("Link::Serial"),
        }
    }
}
