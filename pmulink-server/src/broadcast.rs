//! Periodic data frame fan-out.

use crate::directory::SharedDirectory;
use crate::error::ServerError;
use crate::metrics::MetricsRecorder;
use crate::registry::Registry;
use crate::session::Subscriber;
use bytes::Bytes;
use pmulink_protocol::Timestamp;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Width of the send rate window.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Counts ticks that reached at least one subscriber over a rolling window.
#[derive(Debug, Default)]
pub struct SendRateTracker {
    sends: VecDeque<Instant>,
}

impl SendRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a send at `now` and returns the rate over the window ending there.
    pub fn record(&mut self, now: Instant) -> f64 {
        self.sends.push_back(now);
        self.rate(now)
    }

    /// Sends per second over the window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        while let Some(&oldest) = self.sends.front() {
            if now.saturating_duration_since(oldest) >= RATE_WINDOW {
                self.sends.pop_front();
            } else {
                break;
            }
        }
        self.sends.len() as f64 / RATE_WINDOW.as_secs_f64()
    }
}

/// Encodes the live values once per period and hands the same bytes to every
/// streaming subscriber.
pub struct Broadcaster {
    directory: Arc<SharedDirectory>,
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsRecorder>,
    write_timeout: Duration,
    rate: SendRateTracker,
}

impl Broadcaster {
    pub fn new(
        directory: Arc<SharedDirectory>,
        registry: Arc<Registry>,
        metrics: Arc<dyn MetricsRecorder>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            registry,
            metrics,
            write_timeout,
            rate: SendRateTracker::new(),
        }
    }

    /// Ticks at the configured data rate until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let period = self.directory.period()?;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Broadcasting data frames every {:?}", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Broadcaster shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Sends one data frame to every streaming subscriber.
    ///
    /// Writes run in their own tasks, so a slow subscriber never delays the
    /// tick. Returns the number of recipients.
    pub fn tick(&mut self) -> usize {
        let recipients = self.registry.streaming_subscribers();
        let now = Instant::now();
        if recipients.is_empty() {
            self.metrics.send_rate(self.rate.rate(now));
            return 0;
        }

        let time = Timestamp::now(self.directory.time_base());
        let frame = match self.directory.encode_data(time) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = %e.kind(), "Failed to encode data frame: {}", e);
                return 0;
            }
        };

        for subscriber in &recipients {
            self.spawn_write(subscriber.clone(), frame.clone());
        }
        self.metrics.send_rate(self.rate.record(now));
        recipients.len()
    }

    fn spawn_write(&self, subscriber: Arc<Subscriber>, frame: Bytes) {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let deadline = self.write_timeout;

        tokio::spawn(async move {
            match subscriber.write_frame(&frame, deadline).await {
                Ok(()) => metrics.frame_sent("data", frame.len()),
                Err(ServerError::Closed) => {}
                Err(e) => {
                    // A timed-out write may have left part of a frame on the wire
                    tracing::warn!(
                        subscriber = %subscriber.id(),
                        peer = %subscriber.peer(),
                        "Dropping subscriber: {}",
                        e
                    );
                    registry.remove(&subscriber.id());
                    subscriber.close().await;
                }
            }
        });
    }
}
