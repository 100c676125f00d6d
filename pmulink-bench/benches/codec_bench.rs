//! Frame encoding/decoding benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pmulink_protocol::crc;
use pmulink_protocol::{
    AnalogKind, ConfigFrame, DataFrame, Format, Frame, FrameDecoder, FramePrefix, Phasor,
    PhasorKind, Station, Timestamp,
};

fn create_config(stations: usize, format: Format) -> ConfigFrame {
    let mut config = ConfigFrame::new(7, 1_000_000, 50);
    for i in 0..stations {
        config.add_station(
            Station::new(format!("STATION-{:02}", i), i as u16 + 1, format)
                .with_phasor("VA", PhasorKind::Voltage, 1000)
                .with_phasor("VB", PhasorKind::Voltage, 1000)
                .with_phasor("VC", PhasorKind::Voltage, 1000)
                .with_phasor("IA", PhasorKind::Current, 100_000)
                .with_analog("P", AnalogKind::Rms, 1)
                .with_digital(["BRK"], 0, 0xFFFF),
        );
    }
    config
}

fn create_data(config: &ConfigFrame) -> DataFrame {
    let mut values = config.empty_values();
    for station in &mut values {
        for (i, phasor) in station.phasors.iter_mut().enumerate() {
            *phasor = Phasor::from_polar(230.0, -(i as f64) * 2.094);
        }
        station.frequency = 50.01;
        station.analogs[0] = 460.0;
    }
    DataFrame::new(
        FramePrefix::new(7, Timestamp::new(1_700_000_000, 0x0007_A120)),
        values,
    )
}

fn formats() -> [(&'static str, Format); 2] {
    [("int", Format::default()), ("float", Format::float())]
}

fn bench_data_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_encode");

    for (name, format) in formats() {
        for stations in [1, 10, 100] {
            let config = create_config(stations, format);
            let data = create_data(&config);

            group.throughput(Throughput::Bytes(config.data_frame_len() as u64));
            group.bench_with_input(
                BenchmarkId::new(name, stations),
                &(config, data),
                |b, (config, data)| {
                    b.iter(|| black_box(data.encode(config).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn bench_data_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_decode");

    for (name, format) in formats() {
        for stations in [1, 10, 100] {
            let config = create_config(stations, format);
            let encoded = create_data(&config).encode(&config).unwrap();

            group.throughput(Throughput::Bytes(encoded.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(name, stations),
                &(config, encoded),
                |b, (config, encoded)| {
                    b.iter(|| black_box(Frame::decode(encoded, Some(config)).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn bench_config_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");

    for stations in [1, 10, 100] {
        let config = create_config(stations, Format::default());
        let encoded = config.encode().unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", stations), &config, |b, config| {
            b.iter(|| black_box(config.encode().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", stations), &encoded, |b, encoded| {
            b.iter(|| black_box(ConfigFrame::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_stream_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decoder");

    let config = create_config(10, Format::float());
    let frame = create_data(&config).encode(&config).unwrap();
    let stream: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 100).collect();

    for chunk in [64, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    decoder.extend(piece);
                    while decoder.decode_frame(Some(&config)).unwrap().is_some() {
                        frames += 1;
                    }
                }
                black_box(frames)
            });
        });
    }

    group.finish();
}

fn bench_crc16(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");

    for size in [18, 1000, 10000, 65535] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc::checksum(data)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_data_encode,
    bench_data_decode,
    bench_config_roundtrip,
    bench_stream_decoder,
    bench_crc16,
);

criterion_main!(benches);
