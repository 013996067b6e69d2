use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::proto::codec::{Decoder, Encoder};
use crate::proto::error::{RawError, RawResult};
use crate::proto::frame::Frame;

/// A single RESP connection to a sentinel or data node.
///
/// Wraps an underlying stream and handles frame encoding and decoding.
/// One request is in flight at a time; the owner of the connection has
/// exclusive use of it.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
///
/// let mut conn = Connection::connect("127.0.0.1:26379", Duration::from_secs(1)).await?;
/// let ping = Frame::Array(vec![Frame::bulk("PING")]);
/// let pong = conn.request(&ping, Duration::from_secs(1)).await?;
/// ```
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`RawError::Timeout`] if the connection is not established
    /// within `timeout`, or [`RawError::Io`] if it is refused.
    pub async fn connect(address: &str, timeout: Duration) -> RawResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| RawError::Timeout {
                operation: "connect",
                after: timeout,
            })??;
        stream.set_nodelay(true)?;
        debug!(address, "connection established");
        Ok(Self::new(stream))
    }

    /// Returns true if an idle connection can no longer carry a request:
    /// the peer closed it, the socket failed, or unread bytes are waiting
    /// that no request asked for.
    ///
    /// Never blocks. A peer that closes after this check is only noticed by
    /// the next request.
    pub fn is_stale(&self) -> bool {
        if self.decoder.has_pending() {
            return true;
        }
        let mut probe = [0u8; 1];
        match self.stream.try_read(&mut probe) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Ok(_) | Err(_) => true,
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection over an already established stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
        }
    }

    /// Writes a frame to the connection.
    pub async fn write_frame(&mut self, frame: &Frame) -> RawResult<()> {
        self.encoder.encode(frame);
        let data = self.encoder.take();
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`RawError::ConnectionClosed`] if the peer closes the stream
    /// and [`RawError::Decode`] if it sends invalid RESP.
    pub async fn read_frame(&mut self) -> RawResult<Frame> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(RawError::ConnectionClosed);
            }
            self.decoder.append(&buf[..n]);
        }
    }

    /// Sends a request and waits for its reply, bounded by `timeout`.
    ///
    /// Error replies are returned as [`Frame::Error`]; interpreting them is
    /// left to the caller. After a timeout the connection state is unknown
    /// and it must be discarded.
    pub async fn request(&mut self, frame: &Frame, timeout: Duration) -> RawResult<Frame> {
        tokio::time::timeout(timeout, async {
            self.write_frame(frame).await?;
            self.read_frame().await
        })
        .await
        .map_err(|_| RawError::Timeout {
            operation: "command",
            after: timeout,
        })?
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .finish()
    }
}
