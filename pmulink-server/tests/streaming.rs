//! End-to-end tests driving the server with the concentrator client.

use pmulink_client::{ClientError, ConnectionConfig, FrameStream, PdcClient};
use pmulink_protocol::{
    AnalogKind, Command, CommandFrame, ConfigFrame, ConfigVersion, Format, HeaderFrame,
    NominalFrequency, Phasor, PhasorKind, Station,
};
use pmulink_server::{Server, ServerConfig, SharedDirectory};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const HEADER: &str = "Hello I'm a PMU";

fn directory() -> Arc<SharedDirectory> {
    let config = ConfigFrame::new(7, 1_000_000, 50).with_station(
        Station::new("Station A", 7, Format::float())
            .with_phasor("VA", PhasorKind::Voltage, 1)
            .with_phasor("IA", PhasorKind::Current, 1)
            .with_analog("P", AnalogKind::Rms, 1)
            .with_digital(["BRK"], 0, 0xFFFF)
            .with_nominal(NominalFrequency::Hz50),
    );
    let directory = Arc::new(SharedDirectory::new(config, HEADER));
    directory
        .update(|stations| {
            stations[0].phasors[0] = Phasor::new(230.0, 0.0);
            stations[0].phasors[1] = Phasor::new(0.0, -2000.0);
            stations[0].frequency = 50.01;
            stations[0].analogs[0] = 460.0;
        })
        .unwrap();
    directory
}

async fn start_server(config: ServerConfig) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(config, directory()));

    let task = {
        let server = server.clone();
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        })
    };
    (server, addr, task)
}

fn server_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_read_timeout(Duration::from_millis(100))
        .with_write_timeout(Duration::from_millis(200))
}

async fn connect(addr: SocketAddr) -> PdcClient {
    let config = ConnectionConfig::new(addr)
        .with_id_code(1)
        .with_reply_timeout(Duration::from_secs(2));
    PdcClient::connect(config).await.unwrap()
}

/// Reads frames until none arrives for `quiet`. Returns how many were read.
async fn drain(client: &mut PdcClient, quiet: Duration) -> usize {
    let mut count = 0;
    while let Ok(result) = tokio::time::timeout(quiet, client.read_frame()).await {
        result.unwrap();
        count += 1;
        assert!(count < 50, "frames keep arriving");
    }
    count
}

#[tokio::test]
async fn test_header_and_config() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut client = connect(addr).await;

    let header = client.header().await.unwrap();
    assert_eq!(header.info, HEADER);
    assert_eq!(header.prefix.id_code, 7);

    let config = client.config(ConfigVersion::V2).await.unwrap();
    assert_eq!(config.version, ConfigVersion::V2);
    assert_eq!(config.data_rate, 50);
    assert_eq!(config.stations.len(), 1);
    let station = &config.stations[0];
    assert_eq!(station.name, "Station A");
    assert_eq!(station.phasors[0].name, "VA");
    assert_eq!(station.phasors[1].unit.kind, PhasorKind::Current);
    assert_eq!(station.digitals[0].names[0], "BRK");

    // CFG-1 arrives as config1 and is normalized by the client
    let config = client.config(ConfigVersion::V1).await.unwrap();
    assert_eq!(config.version, ConfigVersion::V2);
    assert_eq!(config.stations[0].name, "Station A");

    // Requests never turn on streaming
    assert_eq!(server.registry().streaming_count(), 0);

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_fan_out_to_started_subscribers() {
    let (server, addr, task) = start_server(server_config()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    let mut idle = connect(addr).await;
    for client in [&mut first, &mut second, &mut idle] {
        client.config(ConfigVersion::V2).await.unwrap();
    }

    first.start().await.unwrap();
    second.start().await.unwrap();

    for client in [&mut first, &mut second] {
        let data = tokio::time::timeout(Duration::from_secs(2), client.read_data())
            .await
            .expect("no data frame")
            .unwrap();
        assert_eq!(data.prefix.id_code, 7);
        let station = &data.stations[0];
        assert_eq!(station.phasors[0], Phasor::new(230.0, 0.0));
        assert_eq!(station.phasors[1], Phasor::new(0.0, -2000.0));
        assert!((station.frequency - 50.01).abs() < 1e-3);
        assert_eq!(station.analogs[0], 460.0);
    }

    // Never started, never receives
    assert!(
        tokio::time::timeout(Duration::from_millis(200), idle.read_frame())
            .await
            .is_err()
    );
    assert_eq!(server.registry().len(), 3);
    assert_eq!(server.registry().streaming_count(), 2);

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_start_stop_toggle() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut client = connect(addr).await;
    client.config(ConfigVersion::V2).await.unwrap();

    client.start().await.unwrap();
    // A repeated START changes nothing
    client.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), client.read_data())
        .await
        .expect("no data frame")
        .unwrap();

    client.stop().await.unwrap();
    // Frames already in flight may still arrive, then the stream goes quiet
    drain(&mut client, Duration::from_millis(200)).await;
    assert_eq!(server.registry().streaming_count(), 0);

    // Requests still work while stopped
    assert_eq!(client.header().await.unwrap().info, HEADER);

    client.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), client.read_data())
        .await
        .expect("no data frame after restart")
        .unwrap();

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_config3_not_answered() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut client = connect(addr).await;

    client.send_command(Command::SendConfig3).await.unwrap();
    client.send_command(Command::Unknown(0x0042)).await.unwrap();

    // The next frame is the header reply
    let header = client.header().await.unwrap();
    assert_eq!(header.info, HEADER);
    assert_eq!(server.stats().commands_total.load(Ordering::Relaxed), 3);

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_garbage_does_not_close_connection() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut tcp = TcpStream::connect(addr).await.unwrap();

    // No sync byte anywhere in the noise
    tcp.write_all(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]).await.unwrap();

    // A command with a corrupted checksum
    let mut corrupt = CommandFrame::new(1, Command::Start).encode().unwrap().to_vec();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;
    tcp.write_all(&corrupt).await.unwrap();

    let mut client = PdcClient::new(FrameStream::new(tcp), 1)
        .with_reply_timeout(Duration::from_secs(2));
    assert_eq!(client.header().await.unwrap().info, HEADER);

    assert!(server.stats().decode_errors_total.load(Ordering::Relaxed) >= 2);
    // The corrupted START was not applied
    assert_eq!(server.registry().streaming_count(), 0);

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_non_command_frames_ignored() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut tcp = TcpStream::connect(addr).await.unwrap();

    let header = HeaderFrame::new(1, "not a command")
        .encode()
        .unwrap();
    tcp.write_all(&header).await.unwrap();

    let mut client = PdcClient::new(FrameStream::new(tcp), 1)
        .with_reply_timeout(Duration::from_secs(2));
    assert_eq!(client.header().await.unwrap().info, HEADER);
    assert_eq!(server.stats().decode_errors_total.load(Ordering::Relaxed), 0);

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut client = connect(addr).await;
    client.start().await.unwrap();
    client.header().await.unwrap();
    assert_eq!(server.registry().len(), 1);

    client.close().await.unwrap();
    for _ in 0..100 {
        if server.registry().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.registry().is_empty());
    assert_eq!(server.stats().connections_active.load(Ordering::Relaxed), 0);

    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_subscribers() {
    let (server, addr, task) = start_server(server_config()).await;
    let mut client = connect(addr).await;
    client.config(ConfigVersion::V2).await.unwrap();
    client.start().await.unwrap();
    client.read_data().await.unwrap();

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(!server.is_running());
    assert!(server.registry().is_empty());

    // Buffered frames drain, then the connection ends
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Err(e) = client.read_frame().await {
                return e;
            }
        }
    })
    .await
    .expect("connection stayed open");
    assert!(matches!(
        result,
        ClientError::ConnectionClosed | ClientError::Io(_)
    ));
}

#[tokio::test]
async fn test_connection_limit() {
    let (server, addr, task) = start_server(server_config().with_max_connections(1)).await;

    let mut first = connect(addr).await;
    first.header().await.unwrap();

    let mut second = connect(addr).await;
    let result = second.header().await;
    assert!(result.is_err());
    assert!(server.stats().connections_rejected.load(Ordering::Relaxed) >= 1);

    // The admitted client is unaffected
    assert_eq!(first.header().await.unwrap().info, HEADER);

    server.shutdown();
    task.await.unwrap();
}
