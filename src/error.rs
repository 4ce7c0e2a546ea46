use std::fmt;

#[derive(Debug)]
pub enum Error {
    Handshake(String),
    Timeout,
    Network(std::io::Error),
    Crypto(String),
    Codec(String),
    Config(String),
    InvalidMode(String),
    UnknownTarget(String),
    InvalidTemperature {
        target: String,
        value: f64,
        min: f64,
        max: f64,
    },
    Io(std::io::Error),
}

impl Error {
    /// Failures that mean "no usable reply from the device".
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Error::Handshake(_) | Error::Timeout | Error::Network(_) | Error::Crypto(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Handshake(msg) => write!(f, "key exchange failed: {msg}"),
            Error::Timeout => write!(f, "no reply from device before timeout"),
            Error::Network(e) => write!(f, "network error: {e}"),
            Error::Crypto(msg) => write!(f, "crypto error: {msg}"),
            Error::Codec(msg) => write!(f, "codec error: {msg}"),
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::InvalidMode(mode) => write!(f, "invalid mode: {mode}"),
            Error::UnknownTarget(name) => write!(f, "unknown temperature target: {name}"),
            Error::InvalidTemperature {
                target,
                value,
                min,
                max,
            } => write!(f, "temperature {value} for {target} outside {min}..{max}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Codec(format!("bad base64: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
