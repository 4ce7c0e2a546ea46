use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::options::OptionSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionVersion {
    V1Ecb,
    V2Gcm,
}

impl EncryptionVersion {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(EncryptionVersion::V1Ecb),
            2 => Some(EncryptionVersion::V2Gcm),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            EncryptionVersion::V1Ecb => 1,
            EncryptionVersion::V2Gcm => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "\u{00b0}C",
            TemperatureUnit::Fahrenheit => "\u{00b0}F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    AwaitingKey,
    Ready,
    Offline,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::AwaitingKey => "awaiting key",
            SessionState::Ready => "ready",
            SessionState::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Outcome of one synchronization cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncResult {
    Success(OptionSet),
    CommunicationFailure(String),
    DecodeFailure(String),
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Success(_))
    }
}

/// Which step of a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Handshake,
    Fetch,
    Push,
}

/// Display values derived from the option set after each successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub availability: Availability,
    pub power: Option<bool>,
    pub mode: Option<String>,
    pub unit: TemperatureUnit,
    /// Target temperatures keyed by profile target name, in `unit`.
    pub targets: BTreeMap<String, f64>,
    /// Measured temperatures keyed by profile sensor name, in `unit`.
    pub sensors: BTreeMap<String, f64>,
}

/// Diagnostic events handed to `on_event` callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    KeyObtained,
    HandshakeFailed { reason: String },
    AvailabilityChanged { availability: Availability },
    OptionChanged { name: String, old: Option<i64>, new: Option<i64> },
    PowerChanged { on: bool },
    ModeChanged { mode: Option<String> },
    TargetTemperatureChanged { name: String, value: f64 },
    SensorTemperatureChanged { name: String, value: f64 },
    OffsetResolved { sensor: String, offset: f64 },
    CommandSent { options: Vec<(String, i64)> },
    SyncFailed { stage: SyncStage, reason: String },
}
