//! Station definitions and live measurement values.
//!
//! A station is one measurement source inside a configuration frame. Its
//! format word selects, per quantity, how values are carried in data frames:
//!
//! | Quantity    | Integer                                  | Float             |
//! |-------------|------------------------------------------|-------------------|
//! | Rectangular | i16 re, i16 im (x 1e5 / scale)           | f32 re, f32 im    |
//! | Polar       | u16 mag (x 1e5 / scale), i16 angle x 1e4 | f32 mag, f32 angle|
//! | Frequency   | i16 (f - nominal) x 1000, i16 rocof x 100| f32 freq, f32 rocof|
//! | Analog      | i16 raw                                  | f32               |
//! | Digital     | u16 bitset per word                      |                   |

use crate::error::ProtocolError;
use crate::wire::{FrameWriter, WireReader, NAME_SIZE};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Upper bound on phasor channels per station accepted on decode.
pub const MAX_PHASORS: usize = 1000;

/// Upper bound on analog channels per station accepted on decode.
pub const MAX_ANALOGS: usize = 1000;

/// Upper bound on digital words per station accepted on decode.
pub const MAX_DIGITAL_WORDS: usize = 100;

/// Channels carried by one digital status word.
pub const DIGITAL_CHANNELS: usize = 16;

/// Largest scale factor representable in a unit word.
pub const MAX_SCALE: u32 = 0x00FF_FFFF;

/// Fixed part of a station block: name, IDCODE, FORMAT, three counts, FNOM, CFGCNT.
const STATION_FIXED_SIZE: usize = NAME_SIZE + 2 + 2 + 6 + 2 + 2;

/// Integer phasor values are carried in units of 1e-5 of the scale factor.
const PHASOR_SCALE: f64 = 1e5;
const ANGLE_SCALE: f64 = 1e4;
const FREQ_SCALE: f32 = 1000.0;
const ROCOF_SCALE: f32 = 100.0;

/// FORMAT word of a station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    /// Bit 0: phasors in polar form.
    pub polar: bool,
    /// Bit 1: phasors as f32.
    pub phasor_float: bool,
    /// Bit 2: analogs as f32.
    pub analog_float: bool,
    /// Bit 3: frequency and ROCOF as f32.
    pub freq_float: bool,
}

impl Format {
    const POLAR: u16 = 1 << 0;
    const PHASOR_FLOAT: u16 = 1 << 1;
    const ANALOG_FLOAT: u16 = 1 << 2;
    const FREQ_FLOAT: u16 = 1 << 3;

    pub fn from_bits(bits: u16) -> Self {
        Self {
            polar: bits & Self::POLAR != 0,
            phasor_float: bits & Self::PHASOR_FLOAT != 0,
            analog_float: bits & Self::ANALOG_FLOAT != 0,
            freq_float: bits & Self::FREQ_FLOAT != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        let mut bits = 0;
        if self.polar {
            bits |= Self::POLAR;
        }
        if self.phasor_float {
            bits |= Self::PHASOR_FLOAT;
        }
        if self.analog_float {
            bits |= Self::ANALOG_FLOAT;
        }
        if self.freq_float {
            bits |= Self::FREQ_FLOAT;
        }
        bits
    }

    /// All-float format.
    pub fn float() -> Self {
        Self {
            polar: false,
            phasor_float: true,
            analog_float: true,
            freq_float: true,
        }
    }

    fn phasor_size(&self) -> usize {
        if self.phasor_float {
            8
        } else {
            4
        }
    }

    fn freq_size(&self) -> usize {
        if self.freq_float {
            8
        } else {
            4
        }
    }

    fn analog_size(&self) -> usize {
        if self.analog_float {
            4
        } else {
            2
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhasorKind {
    #[default]
    Voltage,
    Current,
}

/// PHUNIT word: kind in the top byte, scale factor in the low 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasorUnit {
    pub kind: PhasorKind,
    pub scale: u32,
}

impl PhasorUnit {
    pub fn from_word(word: u32) -> Self {
        let kind = match word >> 24 {
            0 => PhasorKind::Voltage,
            _ => PhasorKind::Current,
        };
        Self {
            kind,
            scale: word & MAX_SCALE,
        }
    }

    pub fn to_word(&self) -> u32 {
        let kind = match self.kind {
            PhasorKind::Voltage => 0,
            PhasorKind::Current => 1,
        };
        (kind << 24) | (self.scale & MAX_SCALE)
    }

    /// Scale factor used for integer encodings; zero is treated as one.
    fn factor(&self) -> f64 {
        self.scale.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalogKind {
    #[default]
    PointOnWave,
    Rms,
    Peak,
    Other(u8),
}

/// ANUNIT word: kind in the top byte, user scale in the low 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogUnit {
    pub kind: AnalogKind,
    pub scale: u32,
}

impl AnalogUnit {
    pub fn from_word(word: u32) -> Self {
        let kind = match (word >> 24) as u8 {
            0 => AnalogKind::PointOnWave,
            1 => AnalogKind::Rms,
            2 => AnalogKind::Peak,
            other => AnalogKind::Other(other),
        };
        Self {
            kind,
            scale: word & MAX_SCALE,
        }
    }

    pub fn to_word(&self) -> u32 {
        let kind = match self.kind {
            AnalogKind::PointOnWave => 0,
            AnalogKind::Rms => 1,
            AnalogKind::Peak => 2,
            AnalogKind::Other(kind) => kind,
        };
        ((kind as u32) << 24) | (self.scale & MAX_SCALE)
    }
}

/// DIGUNIT word: normal-state mask in the high half, valid-input mask in the low half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalUnit {
    pub normal: u16,
    pub valid: u16,
}

impl DigitalUnit {
    pub fn from_word(word: u32) -> Self {
        Self {
            normal: (word >> 16) as u16,
            valid: word as u16,
        }
    }

    pub fn to_word(&self) -> u32 {
        ((self.normal as u32) << 16) | self.valid as u32
    }
}

/// FNOM selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NominalFrequency {
    #[serde(rename = "50")]
    Hz50,
    #[default]
    #[serde(rename = "60")]
    Hz60,
}

impl NominalFrequency {
    pub fn from_fnom(fnom: u16) -> Self {
        if fnom & 0x0001 != 0 {
            NominalFrequency::Hz50
        } else {
            NominalFrequency::Hz60
        }
    }

    pub fn fnom(&self) -> u16 {
        match self {
            NominalFrequency::Hz50 => 1,
            NominalFrequency::Hz60 => 0,
        }
    }

    pub fn hz(&self) -> f32 {
        match self {
            NominalFrequency::Hz50 => 50.0,
            NominalFrequency::Hz60 => 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasorChannel {
    pub name: String,
    pub unit: PhasorUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogChannel {
    pub name: String,
    pub unit: AnalogUnit,
}

/// One 16-channel digital status word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalWord {
    /// Channel names, bit 0 first. Missing names encode as blanks.
    pub names: Vec<String>,
    pub unit: DigitalUnit,
}

/// A phasor in rectangular form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Phasor {
    pub re: f64,
    pub im: f64,
}

impl Phasor {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn from_polar(magnitude: f64, angle: f64) -> Self {
        Self {
            re: magnitude * angle.cos(),
            im: magnitude * angle.sin(),
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Angle in radians.
    pub fn angle(&self) -> f64 {
        self.im.atan2(self.re)
    }
}

/// Live values of one station, in the order a data frame carries them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationValues {
    pub stat: u16,
    pub phasors: Vec<Phasor>,
    /// Hz.
    pub frequency: f32,
    /// Hz/s.
    pub rocof: f32,
    pub analogs: Vec<f32>,
    pub digitals: Vec<u16>,
}

/// Channel layout and encoding of one measurement source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub id_code: u16,
    pub format: Format,
    pub phasors: Vec<PhasorChannel>,
    pub analogs: Vec<AnalogChannel>,
    pub digitals: Vec<DigitalWord>,
    pub nominal: NominalFrequency,
    /// Configuration change count.
    pub cfg_count: u16,
}

impl Station {
    pub fn new(name: impl Into<String>, id_code: u16, format: Format) -> Self {
        Self {
            name: name.into(),
            id_code,
            format,
            phasors: Vec::new(),
            analogs: Vec::new(),
            digitals: Vec::new(),
            nominal: NominalFrequency::default(),
            cfg_count: 0,
        }
    }

    pub fn with_phasor(mut self, name: impl Into<String>, kind: PhasorKind, scale: u32) -> Self {
        self.phasors.push(PhasorChannel {
            name: name.into(),
            unit: PhasorUnit { kind, scale },
        });
        self
    }

    pub fn with_analog(mut self, name: impl Into<String>, kind: AnalogKind, scale: u32) -> Self {
        self.analogs.push(AnalogChannel {
            name: name.into(),
            unit: AnalogUnit { kind, scale },
        });
        self
    }

    pub fn with_digital<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
        normal: u16,
        valid: u16,
    ) -> Self {
        self.digitals.push(DigitalWord {
            names: names.into_iter().map(Into::into).collect(),
            unit: DigitalUnit { normal, valid },
        });
        self
    }

    pub fn with_nominal(mut self, nominal: NominalFrequency) -> Self {
        self.nominal = nominal;
        self
    }

    /// Bytes this station occupies in a configuration frame.
    pub fn config_len(&self) -> usize {
        let (ph, an, dg) = (self.phasors.len(), self.analogs.len(), self.digitals.len());
        STATION_FIXED_SIZE + NAME_SIZE * (ph + an + DIGITAL_CHANNELS * dg) + 4 * (ph + an + dg)
    }

    /// Bytes this station occupies in a data frame.
    pub fn data_len(&self) -> usize {
        2 + self.phasors.len() * self.format.phasor_size()
            + self.format.freq_size()
            + self.analogs.len() * self.format.analog_size()
            + 2 * self.digitals.len()
    }

    /// Zeroed values matching this station's shape, at nominal frequency.
    pub fn empty_values(&self) -> StationValues {
        StationValues {
            stat: 0,
            phasors: vec![Phasor::default(); self.phasors.len()],
            frequency: self.nominal.hz(),
            rocof: 0.0,
            analogs: vec![0.0; self.analogs.len()],
            digitals: vec![0; self.digitals.len()],
        }
    }

    pub(crate) fn encode_config(&self, w: &mut FrameWriter) {
        w.put_name(&self.name);
        w.put_u16(self.id_code);
        w.put_u16(self.format.bits());
        w.put_u16(self.phasors.len() as u16);
        w.put_u16(self.analogs.len() as u16);
        w.put_u16(self.digitals.len() as u16);

        for channel in &self.phasors {
            w.put_name(&channel.name);
        }
        for channel in &self.analogs {
            w.put_name(&channel.name);
        }
        for word in &self.digitals {
            for bit in 0..DIGITAL_CHANNELS {
                w.put_name(word.names.get(bit).map(String::as_str).unwrap_or(""));
            }
        }

        for channel in &self.phasors {
            w.put_u32(channel.unit.to_word());
        }
        for channel in &self.analogs {
            w.put_u32(channel.unit.to_word());
        }
        for word in &self.digitals {
            w.put_u32(word.unit.to_word());
        }

        w.put_u16(self.nominal.fnom());
        w.put_u16(self.cfg_count);
    }

    pub(crate) fn decode_config(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        r.need(STATION_FIXED_SIZE)?;
        let name = r.name()?;
        let id_code = r.u16()?;
        let format = Format::from_bits(r.u16()?);
        let phnmr = r.u16()? as usize;
        let annmr = r.u16()? as usize;
        let dgnmr = r.u16()? as usize;

        check_limit("phasor", phnmr, MAX_PHASORS)?;
        check_limit("analog", annmr, MAX_ANALOGS)?;
        check_limit("digital word", dgnmr, MAX_DIGITAL_WORDS)?;

        // Names, units, FNOM and CFGCNT must all be present before allocating
        r.need(NAME_SIZE * (phnmr + annmr + DIGITAL_CHANNELS * dgnmr) + 4 * (phnmr + annmr + dgnmr) + 4)?;

        let phasor_names = (0..phnmr).map(|_| r.name()).collect::<Result<Vec<_>, _>>()?;
        let analog_names = (0..annmr).map(|_| r.name()).collect::<Result<Vec<_>, _>>()?;
        let digital_names = (0..dgnmr)
            .map(|_| {
                (0..DIGITAL_CHANNELS)
                    .map(|_| r.name())
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut phasors = Vec::with_capacity(phnmr);
        for name in phasor_names {
            phasors.push(PhasorChannel {
                name,
                unit: PhasorUnit::from_word(r.u32()?),
            });
        }
        let mut analogs = Vec::with_capacity(annmr);
        for name in analog_names {
            analogs.push(AnalogChannel {
                name,
                unit: AnalogUnit::from_word(r.u32()?),
            });
        }
        let mut digitals = Vec::with_capacity(dgnmr);
        for names in digital_names {
            digitals.push(DigitalWord {
                names,
                unit: DigitalUnit::from_word(r.u32()?),
            });
        }

        let nominal = NominalFrequency::from_fnom(r.u16()?);
        let cfg_count = r.u16()?;

        Ok(Self {
            name,
            id_code,
            format,
            phasors,
            analogs,
            digitals,
            nominal,
            cfg_count,
        })
    }

    /// Fails unless `values` has exactly this station's channel counts.
    pub fn check_shape(&self, values: &StationValues) -> Result<(), ProtocolError> {
        let mismatch = |what: &str, expected: usize, actual: usize| {
            ProtocolError::ShapeMismatch(format!(
                "station {} ({}): expected {} {}, got {}",
                self.id_code, self.name, expected, what, actual
            ))
        };
        if values.phasors.len() != self.phasors.len() {
            return Err(mismatch("phasors", self.phasors.len(), values.phasors.len()));
        }
        if values.analogs.len() != self.analogs.len() {
            return Err(mismatch("analogs", self.analogs.len(), values.analogs.len()));
        }
        if values.digitals.len() != self.digitals.len() {
            return Err(mismatch(
                "digital words",
                self.digitals.len(),
                values.digitals.len(),
            ));
        }
        Ok(())
    }

    pub(crate) fn encode_values(&self, values: &StationValues, w: &mut FrameWriter) {
        w.put_u16(values.stat);

        for (phasor, channel) in values.phasors.iter().zip(&self.phasors) {
            match (self.format.phasor_float, self.format.polar) {
                (true, false) => {
                    w.put_f32(phasor.re as f32);
                    w.put_f32(phasor.im as f32);
                }
                (true, true) => {
                    w.put_f32(phasor.magnitude() as f32);
                    w.put_f32(phasor.angle() as f32);
                }
                (false, false) => {
                    let factor = channel.unit.factor();
                    w.put_i16((phasor.re * PHASOR_SCALE / factor).round() as i16);
                    w.put_i16((phasor.im * PHASOR_SCALE / factor).round() as i16);
                }
                (false, true) => {
                    let factor = channel.unit.factor();
                    w.put_u16((phasor.magnitude() * PHASOR_SCALE / factor).round() as u16);
                    w.put_i16((phasor.angle() * ANGLE_SCALE).round() as i16);
                }
            }
        }

        if self.format.freq_float {
            w.put_f32(values.frequency);
            w.put_f32(values.rocof);
        } else {
            let deviation = (values.frequency - self.nominal.hz()) * FREQ_SCALE;
            w.put_i16(deviation.round() as i16);
            w.put_i16((values.rocof * ROCOF_SCALE).round() as i16);
        }

        for &analog in &values.analogs {
            if self.format.analog_float {
                w.put_f32(analog);
            } else {
                w.put_i16(analog.round() as i16);
            }
        }

        for &word in &values.digitals {
            w.put_u16(word);
        }
    }

    pub(crate) fn decode_values(&self, r: &mut WireReader<'_>) -> Result<StationValues, ProtocolError> {
        r.need(self.data_len())?;
        let stat = r.u16()?;

        let mut phasors = Vec::with_capacity(self.phasors.len());
        for channel in &self.phasors {
            let phasor = match (self.format.phasor_float, self.format.polar) {
                (true, false) => Phasor::new(r.f32()? as f64, r.f32()? as f64),
                (true, true) => {
                    let magnitude = r.f32()? as f64;
                    let angle = r.f32()? as f64;
                    Phasor::from_polar(magnitude, angle)
                }
                (false, false) => {
                    let factor = channel.unit.factor();
                    let re = r.i16()? as f64 * factor / PHASOR_SCALE;
                    let im = r.i16()? as f64 * factor / PHASOR_SCALE;
                    Phasor::new(re, im)
                }
                (false, true) => {
                    let factor = channel.unit.factor();
                    let magnitude = r.u16()? as f64 * factor / PHASOR_SCALE;
                    let angle = r.i16()? as f64 / ANGLE_SCALE;
                    Phasor::from_polar(magnitude, angle)
                }
            };
            phasors.push(phasor);
        }

        let (frequency, rocof) = if self.format.freq_float {
            (r.f32()?, r.f32()?)
        } else {
            let deviation = r.i16()? as f32 / FREQ_SCALE;
            let rocof = r.i16()? as f32 / ROCOF_SCALE;
            (self.nominal.hz() + deviation, rocof)
        };

        let mut analogs = Vec::with_capacity(self.analogs.len());
        for _ in &self.analogs {
            let value = if self.format.analog_float {
                r.f32()?
            } else {
                r.i16()? as f32
            };
            analogs.push(value);
        }

        let digitals = (0..self.digitals.len())
            .map(|_| r.u16())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StationValues {
            stat,
            phasors,
            frequency,
            rocof,
            analogs,
            digitals,
        })
    }
}

fn check_limit(what: &'static str, count: usize, max: usize) -> Result<(), ProtocolError> {
    if count > max {
        return Err(ProtocolError::LimitExceeded { what, count, max });
    }
    Ok(())
}
