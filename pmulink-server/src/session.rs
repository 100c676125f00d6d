//! Per-connection subscriber state.

use crate::error::ServerError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Write half of a subscriber's connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Subscriber state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Connected, data transmission off.
    Idle,
    /// Receives every broadcast data frame.
    Streaming,
    /// Closed; no further frames are written.
    Closed,
}

impl SubscriberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Idle => "idle",
            SubscriberState::Streaming => "streaming",
            SubscriberState::Closed => "closed",
        }
    }
}

/// A connected concentrator.
///
/// Replies and broadcast frames share one writer lock, so frames from the
/// two sources never interleave on the wire.
pub struct Subscriber {
    /// Unique subscriber ID.
    id: Uuid,

    /// Remote address.
    peer: SocketAddr,

    streaming: AtomicBool,

    closed: AtomicBool,

    /// Set when a write failed or timed out; the stream may hold a partial frame.
    broken: AtomicBool,

    writer: Mutex<BoxedWriter>,

    /// Commands received.
    command_count: AtomicU64,

    /// Frames written.
    frames_sent: AtomicU64,

    connected_at: Instant,
}

impl Subscriber {
    pub fn new(peer: SocketAddr, writer: BoxedWriter) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            streaming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            writer: Mutex::new(writer),
            command_count: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SubscriberState {
        if self.is_closed() {
            SubscriberState::Closed
        } else if self.is_streaming() {
            SubscriberState::Streaming
        } else {
            SubscriberState::Idle
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Turns data transmission on or off. Returns the previous setting.
    pub fn set_streaming(&self, on: bool) -> bool {
        self.streaming.swap(on, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.broken.load(Ordering::Acquire)
    }

    /// Records a received command.
    pub fn touch(&self) -> u64 {
        self.command_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn command_count(&self) -> u64 {
        self.command_count.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Writes one whole frame within `deadline`.
    ///
    /// Waiting for the writer lock counts against the deadline. After a failed
    /// or timed-out write the subscriber reports closed and refuses further
    /// frames.
    pub async fn write_frame(&self, frame: &[u8], deadline: Duration) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Closed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            // Closed while waiting for the lock
            if self.is_closed() {
                return Err(ServerError::Closed);
            }
            let result = async {
                writer.write_all(frame).await?;
                writer.flush().await
            }
            .await;
            if result.is_err() {
                self.broken.store(true, Ordering::Release);
            }
            result.map_err(ServerError::Io)
        };

        match tokio::time::timeout(deadline, write).await {
            Ok(Ok(())) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.broken.store(true, Ordering::Release);
                Err(ServerError::WriteTimeout)
            }
        }
    }

    /// Marks the subscriber closed and shuts down its writer.
    ///
    /// Returns false if it was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.streaming.store(false, Ordering::Release);

        // A stuck write holds the lock; the deadline bounds how long we wait for it
        match tokio::time::timeout(Duration::from_secs(1), self.writer.lock()).await {
            Ok(mut writer) => {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(subscriber = %self.id, "Writer shutdown failed: {}", e);
                }
            }
            Err(_) => {
                tracing::debug!(subscriber = %self.id, "Writer busy, skipping shutdown");
            }
        }
        true
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("command_count", &self.command_count())
            .field("frames_sent", &self.frames_sent())
            .finish()
    }
}
