use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::cipher::{CipherContext, SessionKey};
use crate::config::DeviceIdentity;
use crate::protocol::{GENERIC_KEY_V1, GENERIC_KEY_V2, Request, build_request, parse_response};
use crate::transport::Transport;
use crate::types::EncryptionVersion;
use crate::{Error, Result};

pub fn bootstrap_key(version: EncryptionVersion) -> SessionKey {
    match version {
        EncryptionVersion::V1Ecb => SessionKey::from_bytes(*GENERIC_KEY_V1),
        EncryptionVersion::V2Gcm => SessionKey::from_bytes(*GENERIC_KEY_V2),
    }
}

/// Binds to the device under the bootstrap key and returns its private key.
/// Every failure is reported as [`Error::Handshake`].
pub async fn obtain_key(
    transport: &mut dyn Transport,
    identity: &DeviceIdentity,
    version: EncryptionVersion,
    timeout: Duration,
) -> Result<SessionKey> {
    let generic = CipherContext::new(version, &bootstrap_key(version));
    let wire = build_request(&Request::Bind, identity, 0, &generic).map_err(handshake_error)?;
    debug!(mac = %identity.mac, version = version.number(), "binding to device");

    let reply = transport
        .send_and_receive(identity.socket_addr(), &wire, timeout)
        .await
        .map_err(handshake_error)?;
    let body = parse_response(&reply, &generic).map_err(handshake_error)?;
    key_from_bind_reply(&body)
}

fn key_from_bind_reply(body: &Value) -> Result<SessionKey> {
    let key = body
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Handshake("bind reply carries no key".to_string()))?;
    SessionKey::try_from(key).map_err(handshake_error)
}

fn handshake_error(e: Error) -> Error {
    match e {
        Error::Handshake(_) => e,
        other => Error::Handshake(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_reply_key_extracted() {
        let body = json!({"t": "bindok", "mac": "f4911eaabbcc", "key": "St8Vw1Yz4Bc7Ef0H", "r": 200});
        let key = key_from_bind_reply(&body).unwrap();
        assert_eq!(key.as_bytes(), b"St8Vw1Yz4Bc7Ef0H");
    }

    #[test]
    fn bind_reply_without_key_fails() {
        let err = key_from_bind_reply(&json!({"t": "bindok"})).unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
        let err = key_from_bind_reply(&json!({"key": "short"})).unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
    }
}
