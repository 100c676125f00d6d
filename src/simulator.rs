//! Example value driver.
//!
//! Feeds deterministic waveforms into the shared directory so a freshly
//! started unit has something to stream.

use pmulink_protocol::{PhasorKind, Station, StationValues};
use pmulink_server::SharedDirectory;
use std::f64::consts::{PI, TAU};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

/// RMS magnitude of voltage phasors.
const VOLTAGE_BASE: f64 = 230.0;
/// RMS magnitude of current phasors.
const CURRENT_BASE: f64 = 2000.0;
/// Peak frequency deviation from nominal, Hz.
const FREQ_DEVIATION: f64 = 0.02;
/// Period of the frequency and analog swings.
const SWING_PERIOD_S: f64 = 10.0;
/// Rotation of every phasor relative to the reference, rad/s.
const ROTATION: f64 = TAU / 60.0;
/// Digital bit 0 toggles this often.
const BREAKER_INTERVAL_S: f64 = 5.0;

/// Writes generated values into a [`SharedDirectory`] at the unit's data rate.
pub struct Simulator {
    directory: Arc<SharedDirectory>,
    started: Instant,
    shutdown: AtomicBool,
    notify: Notify,
}

impl Simulator {
    pub fn new(directory: Arc<SharedDirectory>) -> Self {
        Self {
            directory,
            started: Instant::now(),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Updates the live values once per period until shutdown.
    pub async fn run(&self) {
        let period = match self.directory.period() {
            Ok(period) => period,
            Err(e) => {
                tracing::error!("Simulator not started: {}", e);
                return;
            }
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Simulator running every {:?}", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.notify.notified() => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Err(e) = self.step(self.started.elapsed()) {
                tracing::warn!("Simulator update rejected: {}", e);
            }
        }

        tracing::info!("Simulator stopped");
    }

    /// Writes the values for `elapsed` into the directory.
    pub fn step(&self, elapsed: Duration) -> Result<(), pmulink_protocol::ProtocolError> {
        let t = elapsed.as_secs_f64();
        let stations = &self.directory.config().stations;
        self.directory.update(|values| {
            for (station, v) in stations.iter().zip(values.iter_mut()) {
                generate(station, t, v);
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

/// Fills `values` with the waveforms at `t` seconds. Channel counts are left as they are.
pub fn generate(station: &Station, t: f64, values: &mut StationValues) {
    let swing = TAU / SWING_PERIOD_S;
    let nominal = f64::from(station.nominal.hz());

    values.stat = 0;
    values.frequency = (nominal + FREQ_DEVIATION * (swing * t).sin()) as f32;
    values.rocof = (FREQ_DEVIATION * swing * (swing * t).cos()) as f32;

    // Three-phase sets: A, B, C at 120 degree spacing, currents lagging by 30 degrees
    for (i, (channel, phasor)) in station.phasors.iter().zip(&mut values.phasors).enumerate() {
        let phase = -((i % 3) as f64) * TAU / 3.0;
        let (magnitude, lag) = match channel.unit.kind {
            PhasorKind::Voltage => (VOLTAGE_BASE, 0.0),
            PhasorKind::Current => (CURRENT_BASE, PI / 6.0),
        };
        let angle = wrap_angle(phase - lag + ROTATION * t);
        *phasor = pmulink_protocol::Phasor::from_polar(magnitude, angle);
    }

    for (i, analog) in values.analogs.iter_mut().enumerate() {
        let base = 100.0 * (i + 1) as f64;
        *analog = (base * (1.0 + 0.1 * (swing * t + i as f64).sin())) as f32;
    }

    let breaker = ((t / BREAKER_INTERVAL_S) as u64) % 2 == 1;
    for word in values.digitals.iter_mut() {
        *word = if breaker { *word | 1 } else { *word & !1 };
    }
}

/// Maps an angle into (-π, π].
fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}
