//! Command execution.

use crate::{config_version, Commands};
use colored::Colorize;
use pmulink_client::PdcClient;
use pmulink_protocol::{Command, ConfigFrame, DataFrame, Frame, HeaderFrame};
use std::time::Duration;

/// How long `send` waits for the reply to a request command.
const REPLY_WAIT: Duration = Duration::from_secs(5);

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(
    client: &mut PdcClient,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Header => {
            let header = client.header().await?;
            Ok(format_header(&header))
        }

        Commands::Config { version } => {
            let config = client.config(config_version(version)).await?;
            Ok(format_config(&config))
        }

        Commands::Send { command } => {
            client.send_command(command).await?;
            let sent = format!("{} {} ({:#06x})", "Sent".green(), command, command.code());

            let expects_reply = matches!(
                command,
                Command::SendHeader | Command::SendConfig1 | Command::SendConfig2
            );
            if !expects_reply {
                return Ok(sent);
            }

            match tokio::time::timeout(REPLY_WAIT, client.read_frame()).await {
                Ok(frame) => Ok(format!("{}\n{}", sent, format_frame(&frame?))),
                Err(_) => Ok(format!("{}\n{}", sent, "No reply".yellow())),
            }
        }

        Commands::Stream { .. } => unreachable!(), // Handled in main
    }
}

/// Turns on transmission and prints data frames until `count` is reached or Ctrl+C.
///
/// Returns the number of frames printed. The caller is responsible for STOP.
pub async fn stream(
    client: &mut PdcClient,
    count: Option<u64>,
    json: bool,
) -> Result<u64, Box<dyn std::error::Error>> {
    let config = client.config(pmulink_protocol::ConfigVersion::V2).await?;
    eprintln!(
        "{} {} station(s) at {} frames/s",
        "Streaming".green(),
        config.stations.len(),
        config.data_rate
    );
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
    client.start().await?;

    let mut received = 0u64;
    while count.map_or(true, |limit| received < limit) {
        tokio::select! {
            data = client.read_data() => {
                let data = data?;
                received += 1;
                if json {
                    println!("{}", serde_json::to_string(&data.measurements(&config))?);
                } else {
                    println!("{}", format_data(&data, &config));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping stream...".dimmed());
                break;
            }
        }
    }

    Ok(received)
}

/// Parses a command name or a hex command code.
pub fn parse_command(arg: &str) -> Result<Command, String> {
    let lower = arg.to_ascii_lowercase();
    let command = match lower.as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "header" => Command::SendHeader,
        "config1" | "cfg1" => Command::SendConfig1,
        "config2" | "cfg2" => Command::SendConfig2,
        "config3" | "cfg3" => Command::SendConfig3,
        "extended" => Command::Extended,
        other => {
            let hex = other
                .strip_prefix("0x")
                .ok_or_else(|| format!("unknown command '{}'", arg))?;
            let code = u16::from_str_radix(hex, 16)
                .map_err(|_| format!("invalid command code '{}'", arg))?;
            Command::from_code(code)
        }
    };
    Ok(command)
}

fn format_header(header: &HeaderFrame) -> String {
    format!(
        "{}\n{}",
        format!("Header from unit {}", header.prefix.id_code).bold(),
        header.info
    )
}

fn format_config(config: &ConfigFrame) -> String {
    let mut output = format!(
        "{}\n  time base: {}\n  data rate: {}\n",
        format!(
            "{} for unit {}",
            config.version.frame_type().name(),
            config.id_code()
        )
        .bold(),
        config.time_base,
        config.data_rate
    );

    for station in &config.stations {
        output.push_str(&format!(
            "  {} (id {}, {} Hz, cfg {})\n",
            station.name.cyan(),
            station.id_code,
            station.nominal.hz(),
            station.cfg_count
        ));
        for phasor in &station.phasors {
            output.push_str(&format!(
                "    phasor  {:<16} {:?} scale {}\n",
                phasor.name, phasor.unit.kind, phasor.unit.scale
            ));
        }
        for analog in &station.analogs {
            output.push_str(&format!(
                "    analog  {:<16} {:?} scale {}\n",
                analog.name, analog.unit.kind, analog.unit.scale
            ));
        }
        for word in &station.digitals {
            let names: Vec<_> = word
                .names
                .iter()
                .filter(|n| !n.is_empty())
                .map(String::as_str)
                .collect();
            output.push_str(&format!(
                "    digital {} (normal {:#06x}, valid {:#06x})\n",
                names.join(", "),
                word.unit.normal,
                word.unit.valid
            ));
        }
    }

    output.trim_end().to_string()
}

fn format_data(data: &DataFrame, config: &ConfigFrame) -> String {
    let time = match data.prefix.time.to_datetime(config.time_base) {
        Some(t) => t.format("%H:%M:%S%.6f").to_string(),
        None => format!("{:.6}", config.timestamp(&data.prefix.time)),
    };

    let stations: Vec<String> = config
        .stations
        .iter()
        .zip(&data.stations)
        .map(|(station, values)| {
            let phasors: Vec<String> = station
                .phasors
                .iter()
                .zip(&values.phasors)
                .map(|(ch, p)| {
                    format!("{}={:.2}∠{:.1}°", ch.name, p.magnitude(), p.angle().to_degrees())
                })
                .collect();
            format!(
                "{} f={:.3} df={:.3} {}",
                station.name.cyan(),
                values.frequency,
                values.rocof,
                phasors.join(" ")
            )
        })
        .collect();

    format!("{} {}", time.dimmed(), stations.join(" | "))
}

fn format_frame(frame: &Frame) -> String {
    match frame {
        Frame::Header(header) => format_header(header),
        Frame::Config(config) => format_config(config),
        other => format!("{} {} frame", "Received".green(), other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmulink_protocol::{Format, FramePrefix, Phasor, PhasorKind, Station, Timestamp};

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("start").unwrap(), Command::Start);
        assert_eq!(parse_command("STOP").unwrap(), Command::Stop);
        assert_eq!(parse_command("header").unwrap(), Command::SendHeader);
        assert_eq!(parse_command("config1").unwrap(), Command::SendConfig1);
        assert_eq!(parse_command("cfg2").unwrap(), Command::SendConfig2);
        assert_eq!(parse_command("config3").unwrap(), Command::SendConfig3);
        assert_eq!(parse_command("extended").unwrap(), Command::Extended);
        assert_eq!(parse_command("0x02").unwrap(), Command::Start);
        assert_eq!(parse_command("0x42").unwrap(), Command::Unknown(0x42));

        assert!(parse_command("reboot").is_err());
        assert!(parse_command("0xZZ").is_err());
    }

    #[test]
    fn test_format_config() {
        let config = ConfigFrame::new(7, 1_000_000, 30).with_station(
            Station::new("Station A", 7, Format::default())
                .with_phasor("VA", PhasorKind::Voltage, 915_527)
                .with_digital(["BRK", "", "ISO"], 0, 0xFFFF),
        );
        colored::control::set_override(false);
        let output = format_config(&config);

        assert!(output.starts_with("config2 for unit 7"));
        assert!(output.contains("data rate: 30"));
        assert!(output.contains("Station A (id 7, 60 Hz, cfg 0)"));
        assert!(output.contains("VA"));
        assert!(output.contains("digital BRK, ISO (normal 0x0000, valid 0xffff)"));
    }

    #[test]
    fn test_format_data() {
        let config = ConfigFrame::new(7, 1_000_000, 30).with_station(
            Station::new("Station A", 7, Format::float()).with_phasor(
                "VA",
                PhasorKind::Voltage,
                1,
            ),
        );
        let mut values = config.empty_values();
        values[0].phasors[0] = Phasor::new(230.0, 0.0);
        let data = DataFrame::new(
            FramePrefix::new(7, Timestamp::new(1_700_000_000, 500_000)),
            values,
        );
        colored::control::set_override(false);
        let output = format_data(&data, &config);

        assert!(output.contains("22:13:20.500000"));
        assert!(output.contains("Station A f=60.000 df=0.000 VA=230.00∠0.0°"));
    }
}
