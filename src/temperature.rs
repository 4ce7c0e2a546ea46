use std::fmt;

use crate::profile::{MAX_TEMP_F, MIN_TEMP_F};
use crate::types::TemperatureUnit;

/// Bias some firmware adds to its built-in sensor registers.
pub const TEMSEN_OFFSET: f64 = 40.0;

const AMBIENT_MIN_C: f64 = -15.0;
const AMBIENT_MAX_C: f64 = 40.0;
const MARGIN_C: f64 = 2.0;
const MAX_OBSERVATIONS: usize = 8;

/// Temperature stored as Celsius internally.
/// Fahrenheit output truncates toward zero to match the unit's own display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_fahrenheit(f: f64) -> Self {
        Self((f - 32.0) * (5.0 / 9.0))
    }

    pub fn from_unit(value: f64, unit: TemperatureUnit) -> Self {
        match unit {
            TemperatureUnit::Celsius => Self::from_celsius(value),
            TemperatureUnit::Fahrenheit => Self::from_fahrenheit(value),
        }
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    pub fn fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.0)
    }

    pub fn in_unit(&self, unit: TemperatureUnit) -> f64 {
        match unit {
            TemperatureUnit::Celsius => self.celsius(),
            TemperatureUnit::Fahrenheit => self.fahrenheit(),
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    (c * 9.0 / 5.0 + 32.0).trunc()
}

/// Encodes a Fahrenheit set point as the device's (`SetTem`, `TemRec`) pair:
/// whole Celsius plus a bit telling the unit the exact value lies above it.
pub fn fahrenheit_to_celsius(f: f64) -> (i64, i64) {
    let exact = (f - 32.0) * 5.0 / 9.0;
    let set_tem = exact.round();
    let tem_rec = i64::from(exact - set_tem > 0.0);
    (set_tem as i64, tem_rec)
}

/// Inverse of [`fahrenheit_to_celsius`] over the settable range. Pairs that no
/// whole Fahrenheit set point produces fall back to the truncating conversion.
pub fn fahrenheit_from_device(set_tem: i64, tem_rec: i64) -> f64 {
    let wanted = (set_tem, i64::from(tem_rec != 0));
    (MIN_TEMP_F as i64..=MAX_TEMP_F as i64)
        .map(|f| f as f64)
        .find(|f| fahrenheit_to_celsius(*f) == wanted)
        .unwrap_or_else(|| celsius_to_fahrenheit(set_tem as f64))
}

/// Decodes the split "Hi" sensor registers. The firmware reports the same high
/// byte twice and the reading is recombined as `hi * 256 + hi / 100`.
pub fn decode_composite(hi: i64) -> f64 {
    hi as f64 * 256.0 + hi as f64 / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetMode {
    /// Infer the bias from observed readings.
    #[default]
    Auto,
    /// `true` always subtracts [`TEMSEN_OFFSET`], `false` never does.
    Fixed(bool),
}

impl From<Option<bool>> for OffsetMode {
    fn from(flag: Option<bool>) -> Self {
        flag.map_or(OffsetMode::Auto, OffsetMode::Fixed)
    }
}

/// Per-sensor calibration state. Decides between "raw is Celsius" and
/// "raw is Celsius + 40" and sticks with the answer once made.
#[derive(Debug, Clone)]
pub struct TempOffsetResolver {
    offset: Option<f64>,
    lo: f64,
    hi: f64,
    sum: f64,
    count: usize,
}

impl TempOffsetResolver {
    pub fn new(mode: OffsetMode) -> Self {
        let offset = match mode {
            OffsetMode::Auto => None,
            OffsetMode::Fixed(true) => Some(TEMSEN_OFFSET),
            OffsetMode::Fixed(false) => Some(0.0),
        };
        Self {
            offset,
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    pub fn is_resolved(&self) -> bool {
        self.offset.is_some()
    }

    pub fn resolve(&mut self, raw: f64) -> f64 {
        if let Some(offset) = self.offset {
            return raw - offset;
        }

        self.lo = self.lo.min(raw);
        self.hi = self.hi.max(raw);
        self.sum += raw;
        self.count += 1;

        if self.hi > AMBIENT_MAX_C + MARGIN_C {
            // Too warm to be unbiased.
            self.offset = Some(TEMSEN_OFFSET);
        } else if self.lo - TEMSEN_OFFSET < AMBIENT_MIN_C - MARGIN_C {
            // Too cold to be biased.
            self.offset = Some(0.0);
        } else if self.count >= MAX_OBSERVATIONS {
            self.offset = Some(self.closest_candidate());
        }

        raw - self.offset.unwrap_or_else(|| self.closest_candidate())
    }

    fn closest_candidate(&self) -> f64 {
        let mean = self.sum / self.count.max(1) as f64;
        let mid = (AMBIENT_MIN_C + AMBIENT_MAX_C) / 2.0;
        let unbiased = (mean - mid).abs();
        let biased = (mean - TEMSEN_OFFSET - mid).abs();
        if biased < unbiased { TEMSEN_OFFSET } else { 0.0 }
    }
}

impl Default for TempOffsetResolver {
    fn default() -> Self {
        Self::new(OffsetMode::Auto)
    }
}
