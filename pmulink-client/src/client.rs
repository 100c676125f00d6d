//! High-level concentrator API.

use crate::connection::{ConnectionConfig, FrameStream};
use crate::error::ClientError;
use pmulink_protocol::{
    Command, CommandFrame, ConfigFrame, ConfigVersion, DataFrame, Frame, HeaderFrame,
    ProtocolError, Timestamp, DEFAULT_TIME_BASE,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A concentrator session with one measurement unit.
///
/// Header and configuration requests block for exactly one reply frame. The
/// most recent configuration is kept as the directory for decoding data frames.
pub struct PdcClient<S = TcpStream> {
    stream: FrameStream<S>,
    id_code: u16,
    reply_timeout: Duration,
    directory: Option<ConfigFrame>,
}

impl PdcClient<TcpStream> {
    /// Connects to the measurement unit described by `config`.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let stream = FrameStream::connect(&config).await?;
        Ok(Self::new(stream, config.id_code).with_reply_timeout(config.reply_timeout))
    }
}

impl<S> PdcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: FrameStream<S>, id_code: u16) -> Self {
        Self {
            stream,
            id_code,
            reply_timeout: ConnectionConfig::default().reply_timeout,
            directory: None,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// The configuration from the last successful configuration request.
    pub fn directory(&self) -> Option<&ConfigFrame> {
        self.directory.as_ref()
    }

    pub fn id_code(&self) -> u16 {
        self.id_code
    }

    /// Sends a command stamped with the current time.
    pub async fn send_command(&mut self, command: Command) -> Result<(), ClientError> {
        let time_base = self
            .directory
            .as_ref()
            .map(|cfg| cfg.time_base)
            .unwrap_or(DEFAULT_TIME_BASE);
        let frame = CommandFrame::new(self.id_code, command).with_time(Timestamp::now(time_base));
        self.send_frame(&frame).await
    }

    /// Sends a prepared command frame as is.
    pub async fn send_frame(&mut self, frame: &CommandFrame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        tracing::debug!(
            "Sending {} command ({} bytes)",
            frame.command,
            encoded.len()
        );
        self.stream.write_frame(&encoded).await
    }

    /// Turns on data transmission.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        self.send_command(Command::Start).await
    }

    /// Turns off data transmission.
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        self.send_command(Command::Stop).await
    }

    /// Requests the header frame.
    pub async fn header(&mut self) -> Result<HeaderFrame, ClientError> {
        self.send_command(Command::SendHeader).await?;
        match self.read_reply().await? {
            Frame::Header(header) => Ok(header),
            other => Err(unexpected("header", &other)),
        }
    }

    /// Requests a configuration frame and stores it as the session directory.
    ///
    /// CFG-1 replies are normalized to the CFG-2 shape. CFG-3 is not supported
    /// and is refused without contacting the unit.
    pub async fn config(&mut self, version: ConfigVersion) -> Result<ConfigFrame, ClientError> {
        let command = match version {
            ConfigVersion::V1 => Command::SendConfig1,
            ConfigVersion::V2 => Command::SendConfig2,
            ConfigVersion::V3 => return Err(ClientError::NotImplemented("configuration frame 3")),
        };

        self.send_command(command).await?;
        let config = match self.read_reply().await? {
            Frame::Config(config) if config.version == version => config,
            other => return Err(unexpected(version.frame_type().name(), &other)),
        };

        tracing::debug!(
            "Received {} with {} stations",
            version.frame_type().name(),
            config.stations.len()
        );
        let config = config.into_version(ConfigVersion::V2);
        self.directory = Some(config.clone());
        Ok(config)
    }

    /// Reads the next frame of any kind.
    pub async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        self.stream.read_frame(self.directory.as_ref()).await
    }

    /// Reads until the next data frame, skipping other kinds.
    pub async fn read_data(&mut self) -> Result<DataFrame, ClientError> {
        loop {
            match self.read_frame().await? {
                Frame::Data(data) => return Ok(data),
                other => tracing::debug!("Skipping {} frame while streaming", other.kind()),
            }
        }
    }

    /// Closes the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        tracing::debug!("Connection closed");
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Frame, ClientError> {
        tokio::time::timeout(self.reply_timeout, self.read_frame())
            .await
            .map_err(|_| {
                tracing::debug!("Reply timed out");
                ClientError::Timeout
            })?
    }
}

fn unexpected(expected: &'static str, actual: &Frame) -> ClientError {
    ClientError::Protocol(ProtocolError::UnexpectedFrame {
        expected,
        actual: actual.kind(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmulink_protocol::{
        AnalogKind, Format, FramePrefix, NominalFrequency, PhasorKind, Station, FrameDecoder,
    };
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn sample_config() -> ConfigFrame {
        ConfigFrame::new(7, 1_000_000, 30).with_station(
            Station::new("Station A", 7, Format::default())
                .with_phasor("VA", PhasorKind::Voltage, 915_527)
                .with_analog("A1", AnalogKind::Rms, 1)
                .with_nominal(NominalFrequency::Hz50),
        )
    }

    /// Reads one command frame from the peer side.
    async fn read_command(peer: &mut DuplexStream) -> CommandFrame {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 64];
        loop {
            if let Some(Frame::Command(cmd)) = decoder.decode_frame(None).unwrap() {
                return cmd;
            }
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed");
            decoder.extend(&buf[..n]);
        }
    }

    fn client(stream: DuplexStream) -> PdcClient<DuplexStream> {
        PdcClient::new(FrameStream::new(stream), 7).with_reply_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (local, mut peer) = duplex(1024);
        let mut client = client(local);

        client.start().await.unwrap();
        let cmd = read_command(&mut peer).await;
        assert_eq!(cmd.command, Command::Start);
        assert_eq!(cmd.prefix.id_code, 7);
        assert!(cmd.prefix.time.quality().flag);

        client.stop().await.unwrap();
        assert_eq!(read_command(&mut peer).await.command, Command::Stop);
    }

    #[tokio::test]
    async fn test_header_request() {
        let (local, mut peer) = duplex(1024);
        let mut client = client(local);

        let server = tokio::spawn(async move {
            let cmd = read_command(&mut peer).await;
            assert_eq!(cmd.command, Command::SendHeader);
            let reply = HeaderFrame::new(7, "Hello I'm a PMU").encode().unwrap();
            // Deliver the reply in two pieces
            peer.write_all(&reply[..5]).await.unwrap();
            peer.write_all(&reply[5..]).await.unwrap();
            peer
        });

        let header = client.header().await.unwrap();
        assert_eq!(header.info, "Hello I'm a PMU");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_config1_normalized() {
        let (local, mut peer) = duplex(4096);
        let mut client = client(local);

        let server = tokio::spawn(async move {
            let cmd = read_command(&mut peer).await;
            assert_eq!(cmd.command, Command::SendConfig1);
            let reply = sample_config()
                .into_version(ConfigVersion::V1)
                .encode()
                .unwrap();
            peer.write_all(&reply).await.unwrap();

            let data = DataFrame::new(FramePrefix::default(), sample_config().empty_values())
                .encode(&sample_config())
                .unwrap();
            peer.write_all(&data).await.unwrap();
            peer
        });

        let config = client.config(ConfigVersion::V1).await.unwrap();
        assert_eq!(config.version, ConfigVersion::V2);
        assert_eq!(client.directory().unwrap().stations[0].name, "Station A");

        let data = client.read_data().await.unwrap();
        assert_eq!(data.stations[0].frequency, 50.0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_config3_refused_locally() {
        let (local, mut peer) = duplex(1024);
        let mut client = client(local);

        assert!(matches!(
            client.config(ConfigVersion::V3).await,
            Err(ClientError::NotImplemented(_))
        ));

        // Nothing was written
        drop(client);
        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_reply_kind_mismatch() {
        let (local, mut peer) = duplex(4096);
        let mut client = client(local);

        let server = tokio::spawn(async move {
            read_command(&mut peer).await;
            let reply = sample_config().encode().unwrap();
            peer.write_all(&reply).await.unwrap();
            peer
        });

        assert!(matches!(
            client.header().await,
            Err(ClientError::Protocol(ProtocolError::UnexpectedFrame {
                expected: "header",
                actual: "config2"
            }))
        ));
        assert!(client.directory().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_config_version_mismatch() {
        let (local, mut peer) = duplex(4096);
        let mut client = client(local);

        let server = tokio::spawn(async move {
            read_command(&mut peer).await;
            let reply = sample_config().encode().unwrap();
            peer.write_all(&reply).await.unwrap();
            peer
        });

        assert!(matches!(
            client.config(ConfigVersion::V1).await,
            Err(ClientError::Protocol(ProtocolError::UnexpectedFrame {
                expected: "config1",
                actual: "config2"
            }))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let (local, _peer) = duplex(1024);
        let mut client = client(local).with_reply_timeout(Duration::from_millis(50));

        assert!(matches!(client.header().await, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn test_read_data_without_directory() {
        let (local, mut peer) = duplex(4096);
        let mut client = client(local);

        let data = DataFrame::new(FramePrefix::default(), sample_config().empty_values())
            .encode(&sample_config())
            .unwrap();
        peer.write_all(&data).await.unwrap();

        assert!(matches!(
            client.read_data().await,
            Err(ClientError::Protocol(ProtocolError::MissingConfig))
        ));
    }
}
