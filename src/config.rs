use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::cipher::SessionKey;
use crate::profile::DeviceProfile;
use crate::protocol::DEFAULT_PORT;
use crate::types::{EncryptionVersion, TemperatureUnit};
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;

/// Where a device lives and how it is addressed.
///
/// `mac` addresses the controller (the transport destination); `sub_mac` is the
/// physical unit behind a hub, when there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub ip: IpAddr,
    pub port: u16,
    pub mac: String,
    pub sub_mac: Option<String>,
}

impl DeviceIdentity {
    /// Accepts `"aa:bb:cc:dd:ee:ff"` or `"<sub-mac>@<mac>"`.
    pub fn new(ip: IpAddr, port: u16, mac: &str) -> Result<Self> {
        let (sub_mac, mac) = match mac.split_once('@') {
            Some((sub, main)) => (Some(normalize_mac(sub)?), normalize_mac(main)?),
            None => (None, normalize_mac(mac)?),
        };
        Ok(Self {
            ip,
            port,
            mac,
            sub_mac,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn sub_mac(&self) -> &str {
        self.sub_mac.as_deref().unwrap_or(&self.mac)
    }
}

fn normalize_mac(raw: &str) -> Result<String> {
    let mac: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .collect::<String>()
        .to_lowercase();
    if mac.is_empty() || !mac.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Config(format!("invalid MAC address: {raw:?}")));
    }
    Ok(mac)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinProfile {
    #[default]
    HeatPump,
    AirConditioner,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProfileSpec {
    Builtin(BuiltinProfile),
    Custom(DeviceProfile),
}

impl Default for ProfileSpec {
    fn default() -> Self {
        ProfileSpec::Builtin(BuiltinProfile::default())
    }
}

impl ProfileSpec {
    pub fn to_profile(&self) -> DeviceProfile {
        match self {
            ProfileSpec::Builtin(BuiltinProfile::HeatPump) => DeviceProfile::heat_pump(),
            ProfileSpec::Builtin(BuiltinProfile::AirConditioner) => {
                DeviceProfile::air_conditioner()
            }
            ProfileSpec::Custom(profile) => profile.clone(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_encryption_version() -> u8 {
    1
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

/// Per-device settings as stored by the host platform.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub mac: String,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default = "default_encryption_version")]
    pub encryption_version: u8,
    #[serde(default)]
    pub disable_available_check: bool,
    #[serde(default)]
    pub temp_sensor_offset: Option<bool>,
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
    #[serde(default)]
    pub profile: ProfileSpec,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl DeviceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn identity(&self) -> Result<DeviceIdentity> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| Error::Config(format!("host must be an IP address: {}", self.host)))?;
        DeviceIdentity::new(ip, self.port, &self.mac)
    }

    pub fn encryption_version(&self) -> Result<EncryptionVersion> {
        EncryptionVersion::from_number(self.encryption_version).ok_or_else(|| {
            Error::Config(format!(
                "encryption version {} is not implemented",
                self.encryption_version
            ))
        })
    }

    pub fn session_key(&self) -> Result<Option<SessionKey>> {
        match self.encryption_key.as_deref() {
            Some(key) if !key.is_empty() => SessionKey::try_from(key)
                .map(Some)
                .map_err(|e| Error::Config(e.to_string())),
            _ => Ok(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_normalized() {
        let id = DeviceIdentity::new("10.0.0.2".parse().unwrap(), 7000, "F4:91:1E:AA:BB:CC").unwrap();
        assert_eq!(id.mac, "f4911eaabbcc");
        assert_eq!(id.sub_mac(), "f4911eaabbcc");
        assert_eq!(id.socket_addr().to_string(), "10.0.0.2:7000");
    }

    #[test]
    fn sub_mac_routes_through_hub() {
        let id = DeviceIdentity::new("10.0.0.2".parse().unwrap(), 7000, "AABBCC000001@f4911eaabbcc").unwrap();
        assert_eq!(id.mac, "f4911eaabbcc");
        assert_eq!(id.sub_mac(), "aabbcc000001");
    }

    #[test]
    fn bad_mac_rejected() {
        let err = DeviceIdentity::new("10.0.0.2".parse().unwrap(), 7000, "not-a-mac").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn config_defaults() {
        let cfg = DeviceConfig::from_json(r#"{"host": "192.168.1.20", "mac": "f4911eaabbcc"}"#).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.encryption_version().unwrap(), EncryptionVersion::V1Ecb);
        assert!(cfg.session_key().unwrap().is_none());
        assert!(!cfg.disable_available_check);
        assert_eq!(cfg.temperature_unit, TemperatureUnit::Celsius);
        assert_eq!(cfg.profile, ProfileSpec::Builtin(BuiltinProfile::HeatPump));
        assert_eq!(cfg.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.scan_interval(), Duration::from_secs(60));
    }

    #[test]
    fn config_full() {
        let cfg = DeviceConfig::from_json(
            r#"{
                "host": "192.168.1.20",
                "port": 7001,
                "mac": "f4911eaabbcc",
                "encryption_key": "0123456789abcdef",
                "uid": 12,
                "encryption_version": 2,
                "disable_available_check": true,
                "temp_sensor_offset": true,
                "temperature_unit": "fahrenheit",
                "profile": "air_conditioner"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.encryption_version().unwrap(), EncryptionVersion::V2Gcm);
        assert!(cfg.session_key().unwrap().is_some());
        assert_eq!(cfg.profile.to_profile().name, "air_conditioner");
        assert_eq!(cfg.temp_sensor_offset, Some(true));
    }

    #[test]
    fn unsupported_version_is_config_error() {
        let cfg = DeviceConfig::from_json(
            r#"{"host": "192.168.1.20", "mac": "f4911eaabbcc", "encryption_version": 3}"#,
        )
        .unwrap();
        assert!(matches!(cfg.encryption_version(), Err(Error::Config(_))));
    }

    #[test]
    fn host_must_be_ip() {
        let cfg = DeviceConfig::from_json(r#"{"host": "gree.local", "mac": "f4911eaabbcc"}"#).unwrap();
        assert!(matches!(cfg.identity(), Err(Error::Config(_))));
    }
}
