//! pmulink - synchrophasor measurement unit
//!
//! Serves IEEE C37.118-2011 header, configuration and data frames over TCP.

mod simulator;

use pmulink_server::metrics::run_metrics_server;
use pmulink_server::{Config, Metrics, MetricsRecorder, Server, ServerConfig, SharedDirectory};
use simulator::Simulator;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if PMULINK_CONFIG is set, then env overrides)
    let config_path = std::env::var("PMULINK_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    let directory = Arc::new(SharedDirectory::new(
        config.pmu.build_directory(),
        config.pmu.header.clone(),
    ));

    tracing::info!("Starting pmulink");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  ID code: {}", config.pmu.id_code);
    tracing::info!(
        "  Data rate: {} (period {:?})",
        config.pmu.data_rate,
        directory.period()?
    );
    tracing::info!("  Time base: {}", config.pmu.time_base);
    for station in &directory.config().stations {
        tracing::info!(
            "  Station {} (id {}): {} phasors, {} analogs, {} digital words, {} Hz",
            station.name,
            station.id_code,
            station.phasors.len(),
            station.analogs.len(),
            station.digitals.len(),
            station.nominal.hz()
        );
    }

    let metrics = if config.metrics.enabled {
        tracing::info!("  Metrics: enabled on {}", config.metrics.bind_addr);
        Some(Arc::new(Metrics::new()?))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server_config = ServerConfig::from(&config.network);
    let server = Arc::new(match &metrics {
        Some(m) => Server::with_metrics(
            server_config,
            directory.clone(),
            m.clone() as Arc<dyn MetricsRecorder>,
        ),
        None => Server::new(server_config, directory.clone()),
    });

    // Start metrics server if enabled
    if let Some(m) = metrics {
        let addr = config.metrics.bind_addr;
        let shutdown_rx = server.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, m, shutdown_rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Spawn the value driver
    let simulator = Arc::new(Simulator::new(directory.clone()));
    let simulator_handle = {
        let simulator = simulator.clone();
        tokio::spawn(async move {
            simulator.run().await;
        })
    };

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_simulator = simulator.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        shutdown_simulator.shutdown();
    });

    // Run server (blocks until shutdown)
    let result = server.run().await;

    simulator.shutdown();
    let _ = simulator_handle.await;

    result?;
    tracing::info!("Server stopped");
    Ok(())
}
