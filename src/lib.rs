mod cipher;
mod client;
mod config;
mod diff;
mod error;
mod handshake;
mod logger;
mod options;
mod profile;
mod protocol;
mod temperature;
mod transport;
mod types;

pub use cipher::{CipherContext, KEY_LEN, Sealed, SessionKey};
pub use client::{DeviceHandle, GreeClient, GreeClientBuilder, Poller};
pub use config::{BuiltinProfile, DeviceConfig, DeviceIdentity, ProfileSpec};
pub use error::{Error, Result};
pub use handshake::{bootstrap_key, obtain_key};
pub use logger::MessageLogMode;
pub use options::{OptionChange, OptionSet};
pub use profile::{
    DeviceProfile, MAX_TEMP_F, MIN_TEMP_F, ModeTable, SensorEncoding, SensorSpec, TargetSpec,
};
pub use protocol::{
    DEFAULT_PORT, Envelope, Framed, GENERIC_KEY_V1, GENERIC_KEY_V2, Request, build_request,
    extract_values, frame_request, parse_response, seal,
};
pub use temperature::{
    OffsetMode, TEMSEN_OFFSET, TempOffsetResolver, Temperature, celsius_to_fahrenheit,
    decode_composite, fahrenheit_from_device, fahrenheit_to_celsius,
};
pub use transport::{Transport, UdpTransport};
pub use types::*;
