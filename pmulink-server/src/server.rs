//! TCP server implementation.

use crate::broadcast::Broadcaster;
use crate::config::NetworkConfig;
use crate::directory::SharedDirectory;
use crate::error::ServerError;
use crate::handler::CommandHandler;
use crate::metrics::{MetricsRecorder, NoopRecorder};
use crate::registry::Registry;
use crate::session::Subscriber;
use pmulink_protocol::{Frame, FrameDecoder, DEFAULT_PORT, READ_BUFFER_SIZE};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Read deadline; the running and closed flags are checked each time it expires.
    pub read_timeout: Duration,
    /// Deadline for writing one frame to one subscriber.
    pub write_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_millis(100),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self::new(network.bind_addr)
            .with_read_timeout(network.read_timeout())
            .with_write_timeout(network.write_timeout())
            .with_max_connections(network.max_connections)
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub commands_total: AtomicU64,
    pub decode_errors_total: AtomicU64,
    /// Replies that could not be encoded and were withheld.
    pub reply_errors_total: AtomicU64,
}

/// Everything a connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    handler: Arc<CommandHandler>,
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsRecorder>,
    stats: Arc<ServerStats>,
    running: Arc<AtomicBool>,
    read_timeout: Duration,
    write_timeout: Duration,
}

/// C37.118 measurement unit server.
pub struct Server {
    config: ServerConfig,
    directory: Arc<SharedDirectory>,
    handler: Arc<CommandHandler>,
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsRecorder>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, directory: Arc<SharedDirectory>) -> Self {
        Self::with_metrics(config, directory, Arc::new(NoopRecorder))
    }

    /// Creates a new server reporting to `metrics`.
    pub fn with_metrics(
        config: ServerConfig,
        directory: Arc<SharedDirectory>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handler = Arc::new(CommandHandler::new(directory.clone(), metrics.clone()));
        Self {
            config,
            directory,
            handler,
            registry: Arc::new(Registry::new()),
            metrics,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        // Fails before accepting anything if the data rate is unusable
        self.directory.period()?;

        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let broadcaster = Broadcaster::new(
            self.directory.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.config.write_timeout,
        );
        let broadcast_task = tokio::spawn(broadcaster.run(self.shutdown.subscribe()));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        drop(listener);

        let closed = self.registry.close_all().await;
        tracing::debug!("Closed {} subscribers", closed);

        match broadcast_task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Broadcaster task failed: {}", e);
                Ok(())
            }
        }
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!(peer = %addr, "Connection limit reached, rejecting");
            self.stats
                .connections_rejected
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        self.metrics.connection_opened();
        stream.set_nodelay(true).ok();

        let ctx = ConnectionContext {
            handler: self.handler.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            stats: self.stats.clone(),
            running: self.running.clone(),
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
        };
        let conn_shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::handle_connection(stream, addr, &ctx, conn_shutdown).await {
                tracing::debug!(peer = %addr, "Connection error: {}", e);
            }

            ctx.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            ctx.metrics.connection_closed();
            tracing::info!(peer = %addr, "Client disconnected");
        });
    }

    /// Serves one concentrator until it disconnects, fails, or the server stops.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: &ConnectionContext,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let (mut reader, writer) = stream.into_split();
        let subscriber = Arc::new(Subscriber::new(addr, Box::new(writer)));
        ctx.registry.add(subscriber.clone());
        tracing::info!(peer = %addr, subscriber = %subscriber.id(), "Client connected");

        let result = Self::serve_subscriber(&mut reader, &subscriber, ctx, &mut shutdown).await;

        ctx.registry.remove(&subscriber.id());
        subscriber.close().await;
        result
    }

    async fn serve_subscriber(
        reader: &mut tokio::net::tcp::OwnedReadHalf,
        subscriber: &Subscriber,
        ctx: &ConnectionContext,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let peer = subscriber.peer();

        loop {
            tokio::select! {
                result = tokio::time::timeout(ctx.read_timeout, reader.read(&mut buf)) => {
                    match result {
                        Err(_) => {
                            if subscriber.is_closed() || !ctx.running.load(Ordering::SeqCst) {
                                tracing::debug!(peer = %peer, "Subscriber closed");
                                return Ok(());
                            }
                            continue;
                        }
                        Ok(Ok(0)) => {
                            tracing::debug!(peer = %peer, "Connection closed by client");
                            return Ok(());
                        }
                        Ok(Ok(n)) => {
                            ctx.metrics.bytes_received(n);
                            decoder.extend(&buf[..n]);
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(peer = %peer, "Read error: {}", e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(peer = %peer, "Shutdown signal received");
                    return Err(ServerError::ShuttingDown);
                }
            }

            loop {
                let frame = match decoder.decode_frame(None) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        // The bad bytes are consumed; keep serving
                        tracing::warn!(peer = %peer, kind = %e.kind(), "Decode error: {}", e);
                        ctx.stats.decode_errors_total.fetch_add(1, Ordering::Relaxed);
                        ctx.metrics.decode_error(e.kind().as_str());
                        continue;
                    }
                };

                let command = match frame {
                    Frame::Command(command) => command,
                    other => {
                        tracing::debug!(peer = %peer, "Ignoring {} frame", other.kind());
                        continue;
                    }
                };

                ctx.stats.commands_total.fetch_add(1, Ordering::Relaxed);
                let reply = match ctx.handler.handle(subscriber, &command) {
                    Ok(Some(reply)) => reply,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(
                            peer = %peer,
                            command = %command.command,
                            "Failed to encode reply: {}",
                            e
                        );
                        ctx.stats.reply_errors_total.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                subscriber.write_frame(&reply.bytes, ctx.write_timeout).await?;
                ctx.metrics.frame_sent(reply.kind(), reply.bytes.len());
                tracing::debug!(
                    peer = %peer,
                    "Sent {} frame ({} bytes)",
                    reply.kind(),
                    reply.bytes.len()
                );
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver that fires when shutdown is initiated.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn directory(&self) -> &Arc<SharedDirectory> {
        &self.directory
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
