//! Connection management and frame-level I/O.

use crate::error::ClientError;
use pmulink_protocol::{ConfigFrame, Frame, FrameDecoder, DEFAULT_PORT, READ_BUFFER_SIZE};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Measurement unit address.
    pub addr: SocketAddr,
    /// IDCODE stamped on outgoing commands.
    pub id_code: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long to wait for a header or configuration reply.
    pub reply_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            id_code: 1,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_id_code(mut self, id_code: u16) -> Self {
        self.id_code = id_code;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)))
    }
}

/// A byte stream carrying C37.118 frames.
///
/// Bytes read past the end of one frame are kept for the next call.
pub struct FrameStream<S = TcpStream> {
    stream: S,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl FrameStream<TcpStream> {
    /// Connects to a measurement unit.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;

        stream.set_nodelay(true).ok();
        tracing::debug!("Connected to {}", config.addr);

        Ok(Self::new(stream))
    }
}

impl<S> FrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
        }
    }

    /// Reads until one complete frame is buffered, then decodes it.
    ///
    /// A single read may hold part of a frame or several frames. `config`
    /// is required to interpret data frames.
    pub async fn read_frame(&mut self, config: Option<&ConfigFrame>) -> Result<Frame, ClientError> {
        loop {
            if let Some(bytes) = self.decoder.next_frame()? {
                return Ok(Frame::decode(&bytes, config)?);
            }

            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                tracing::debug!(
                    "Connection closed ({} bytes buffered)",
                    self.decoder.buffered()
                );
                return Err(ClientError::ConnectionClosed);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Writes one encoded frame.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Returns the number of received bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Shuts down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
