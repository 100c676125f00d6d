//! Command handling.

use crate::directory::SharedDirectory;
use crate::metrics::MetricsRecorder;
use crate::session::Subscriber;
use bytes::Bytes;
use pmulink_protocol::{
    Command, CommandFrame, ConfigVersion, FrameType, ProtocolError, Timestamp,
};
use std::sync::Arc;

/// An encoded frame to send back to the commanding subscriber.
#[derive(Debug, Clone)]
pub struct Reply {
    pub frame_type: FrameType,
    pub bytes: Bytes,
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        self.frame_type.name()
    }
}

/// Applies concentrator commands to a subscriber.
pub struct CommandHandler {
    directory: Arc<SharedDirectory>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl CommandHandler {
    pub fn new(directory: Arc<SharedDirectory>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self { directory, metrics }
    }

    pub fn directory(&self) -> &Arc<SharedDirectory> {
        &self.directory
    }

    /// Handles one command.
    ///
    /// START and STOP toggle the subscriber's streaming flag. Header and
    /// configuration requests produce a reply stamped with the current time
    /// and leave the flag alone. Every other command is only logged.
    ///
    /// An error means the reply could not be encoded and must be withheld.
    pub fn handle(
        &self,
        subscriber: &Subscriber,
        frame: &CommandFrame,
    ) -> Result<Option<Reply>, ProtocolError> {
        let command = frame.command;
        subscriber.touch();
        self.metrics.command_received(command.name());
        tracing::debug!(
            subscriber = %subscriber.id(),
            command = %command,
            "Command from id {}",
            frame.prefix.id_code
        );

        match command {
            Command::Start => {
                if !subscriber.set_streaming(true) {
                    tracing::info!(
                        subscriber = %subscriber.id(),
                        peer = %subscriber.peer(),
                        "Data transmission on"
                    );
                }
                Ok(None)
            }
            Command::Stop => {
                if subscriber.set_streaming(false) {
                    tracing::info!(
                        subscriber = %subscriber.id(),
                        peer = %subscriber.peer(),
                        "Data transmission off"
                    );
                }
                Ok(None)
            }
            Command::SendHeader => {
                let bytes = self.directory.header_frame(self.now()).encode()?;
                Ok(Some(Reply {
                    frame_type: FrameType::Header,
                    bytes,
                }))
            }
            Command::SendConfig1 => self.config_reply(ConfigVersion::V1).map(Some),
            Command::SendConfig2 => self.config_reply(ConfigVersion::V2).map(Some),
            Command::SendConfig3 => {
                tracing::warn!(
                    subscriber = %subscriber.id(),
                    "Configuration frame 3 requested, not supported"
                );
                Ok(None)
            }
            Command::Extended => {
                tracing::debug!(
                    subscriber = %subscriber.id(),
                    "Extended frame with {} bytes ignored",
                    frame.extended.len()
                );
                Ok(None)
            }
            Command::Unknown(code) => {
                tracing::warn!(subscriber = %subscriber.id(), "Unknown command {:#06x}", code);
                Ok(None)
            }
        }
    }

    fn config_reply(&self, version: ConfigVersion) -> Result<Reply, ProtocolError> {
        let config = self.directory.config_frame(version, self.now());
        Ok(Reply {
            frame_type: version.frame_type(),
            bytes: config.encode()?,
        })
    }

    fn now(&self) -> Timestamp {
        Timestamp::now(self.directory.time_base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::session::SubscriberState;
    use pmulink_protocol::{ConfigFrame, Format, Frame, PhasorKind, Station};

    fn setup() -> (CommandHandler, Arc<Metrics>, Subscriber) {
        let config = ConfigFrame::new(7, 1_000_000, 30).with_station(
            Station::new("Station A", 7, Format::default())
                .with_phasor("VA", PhasorKind::Voltage, 915_527),
        );
        let directory = Arc::new(SharedDirectory::new(config, "Hello I'm a PMU"));
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = CommandHandler::new(directory, metrics.clone());
        let subscriber = Subscriber::new(
            "127.0.0.1:40000".parse().unwrap(),
            Box::new(tokio::io::sink()),
        );
        (handler, metrics, subscriber)
    }

    fn command(cmd: Command) -> CommandFrame {
        CommandFrame::new(1, cmd)
    }

    #[test]
    fn test_start_stop() {
        let (handler, _, sub) = setup();

        assert!(handler.handle(&sub, &command(Command::Start)).unwrap().is_none());
        assert_eq!(sub.state(), SubscriberState::Streaming);

        // Repeated START is harmless
        assert!(handler.handle(&sub, &command(Command::Start)).unwrap().is_none());
        assert_eq!(sub.state(), SubscriberState::Streaming);

        assert!(handler.handle(&sub, &command(Command::Stop)).unwrap().is_none());
        assert_eq!(sub.state(), SubscriberState::Idle);
        assert_eq!(sub.command_count(), 3);
    }

    #[test]
    fn test_header_reply() {
        let (handler, _, sub) = setup();
        sub.set_streaming(true);

        let reply = handler
            .handle(&sub, &command(Command::SendHeader))
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind(), "header");
        match Frame::decode(&reply.bytes, None).unwrap() {
            Frame::Header(header) => {
                assert_eq!(header.info, "Hello I'm a PMU");
                assert_eq!(header.prefix.id_code, 7);
                assert!(header.prefix.time.soc > 0);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // Replies leave the streaming flag alone
        assert!(sub.is_streaming());
    }

    #[test]
    fn test_config_replies() {
        let (handler, _, sub) = setup();

        for (cmd, version) in [
            (Command::SendConfig1, ConfigVersion::V1),
            (Command::SendConfig2, ConfigVersion::V2),
        ] {
            let reply = handler.handle(&sub, &command(cmd)).unwrap().unwrap();
            assert_eq!(reply.frame_type, version.frame_type());
            match Frame::decode(&reply.bytes, None).unwrap() {
                Frame::Config(config) => {
                    assert_eq!(config.version, version);
                    assert_eq!(config.stations[0].name, "Station A");
                    assert_eq!(config.data_rate, 30);
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }
        assert!(!sub.is_streaming());
    }

    #[test]
    fn test_ignored_commands() {
        let (handler, metrics, sub) = setup();

        for cmd in [Command::SendConfig3, Command::Extended, Command::Unknown(0x42)] {
            assert!(handler.handle(&sub, &command(cmd)).unwrap().is_none());
        }
        assert_eq!(sub.state(), SubscriberState::Idle);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("pmulink_commands_total{command=\"config3\"} 1"));
        assert!(encoded.contains("pmulink_commands_total{command=\"extended\"} 1"));
        assert!(encoded.contains("pmulink_commands_total{command=\"unknown\"} 1"));
    }
}
