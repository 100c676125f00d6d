//! Prometheus metrics for the measurement unit server.
//!
//! This module provides:
//! - The `MetricsRecorder` sink the server reports events to
//! - A Prometheus registry implementing it
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Receives server events.
///
/// Implementations must be cheap: they are called from the broadcast tick
/// and from every connection handler.
pub trait MetricsRecorder: Send + Sync {
    fn connection_opened(&self);
    fn connection_closed(&self);
    fn command_received(&self, command: &str);
    fn frame_sent(&self, kind: &str, bytes: usize);
    fn bytes_received(&self, bytes: usize);
    fn decode_error(&self, kind: &str);
    /// Data frames per second observed over the last second.
    fn send_rate(&self, hz: f64);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn connection_opened(&self) {}
    fn connection_closed(&self) {}
    fn command_received(&self, _command: &str) {}
    fn frame_sent(&self, _kind: &str, _bytes: usize) {}
    fn bytes_received(&self, _bytes: usize) {}
    fn decode_error(&self, _kind: &str) {}
    fn send_rate(&self, _hz: f64) {}
}

/// Prometheus metrics for the pmulink server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Commands received by name.
    pub commands_total: CounterVec,
    /// Frames written by kind.
    pub frames_sent_total: CounterVec,
    /// Frame bytes written by kind.
    pub frame_bytes_sent_total: CounterVec,
    /// Bytes read from concentrators.
    pub bytes_received_total: Counter,
    /// Frames that failed to decode, by error kind.
    pub decode_errors_total: CounterVec,
    /// Observed data frame rate.
    pub data_frame_rate: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "pmulink_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "pmulink_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Commands
        let commands_total = CounterVec::new(
            Opts::new("pmulink_commands_total", "Total commands received by name"),
            &["command"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        // Frames
        let frames_sent_total = CounterVec::new(
            Opts::new("pmulink_frames_sent_total", "Total frames sent by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let frame_bytes_sent_total = CounterVec::new(
            Opts::new(
                "pmulink_frame_bytes_sent_total",
                "Total frame bytes sent by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(frame_bytes_sent_total.clone()))?;

        let bytes_received_total = Counter::with_opts(Opts::new(
            "pmulink_bytes_received_total",
            "Total bytes received from concentrators",
        ))?;
        registry.register(Box::new(bytes_received_total.clone()))?;

        // Errors
        let decode_errors_total = CounterVec::new(
            Opts::new(
                "pmulink_decode_errors_total",
                "Total frames that failed to decode by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(decode_errors_total.clone()))?;

        let data_frame_rate = Gauge::with_opts(Opts::new(
            "pmulink_data_frame_rate_hz",
            "Data frames broadcast during the last second",
        ))?;
        registry.register(Box::new(data_frame_rate.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            commands_total,
            frames_sent_total,
            frame_bytes_sent_total,
            bytes_received_total,
            decode_errors_total,
            data_frame_rate,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsRecorder for Metrics {
    fn connection_opened(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    fn connection_closed(&self) {
        self.connections_active.dec();
    }

    fn command_received(&self, command: &str) {
        self.commands_total.with_label_values(&[command]).inc();
    }

    fn frame_sent(&self, kind: &str, bytes: usize) {
        self.frames_sent_total.with_label_values(&[kind]).inc();
        self.frame_bytes_sent_total
            .with_label_values(&[kind])
            .inc_by(bytes as f64);
    }

    fn bytes_received(&self, bytes: usize) {
        self.bytes_received_total.inc_by(bytes as f64);
    }

    fn decode_error(&self, kind: &str) {
        self.decode_errors_total.with_label_values(&[kind]).inc();
    }

    fn send_rate(&self, hz: f64) {
        self.data_frame_rate.set(hz);
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body))),
            Err(e) => {
                tracing::warn!("Failed to encode metrics: {}", e);
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from(e.to_string())))
            }
        },
        "/health" | "/healthz" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK"))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connection_opened();
        metrics.command_received("start");
        metrics.frame_sent("data", 52);
        metrics.decode_error("checksum");

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("pmulink_connections_total 1"));
        assert!(encoded.contains("pmulink_connections_active 1"));
        assert!(encoded.contains("pmulink_commands_total{command=\"start\"} 1"));
        assert!(encoded.contains("pmulink_frames_sent_total{kind=\"data\"} 1"));
        assert!(encoded.contains("pmulink_frame_bytes_sent_total{kind=\"data\"} 52"));
        assert!(encoded.contains("pmulink_decode_errors_total{kind=\"checksum\"} 1"));
    }

    #[test]
    fn test_connection_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        assert_eq!(metrics.connections_total.get(), 2.0);
        assert_eq!(metrics.connections_active.get(), 1.0);
    }

    #[test]
    fn test_rate_and_bytes() {
        let metrics = Metrics::new().unwrap();
        metrics.bytes_received(18);
        metrics.bytes_received(18);
        metrics.send_rate(30.0);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("pmulink_bytes_received_total 36"));
        assert!(encoded.contains("pmulink_data_frame_rate_hz 30"));
    }

    #[test]
    fn test_noop_recorder() {
        let recorder: Arc<dyn MetricsRecorder> = Arc::new(NoopRecorder);
        recorder.connection_opened();
        recorder.frame_sent("data", 10);
        recorder.send_rate(1.0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.command_received("header");

        // Reserve a free port, then hand it to the server
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(run_metrics_server(addr, metrics, shutdown_rx));

        let mut stream = None;
        for _ in 0..50 {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        }
        let mut stream = stream.expect("metrics server did not start");

        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("pmulink_commands_total{command=\"header\"} 1"));

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
