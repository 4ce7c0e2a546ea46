use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cipher::CipherContext;
use crate::config::DeviceIdentity;
use crate::types::EncryptionVersion;
use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 7000;

/// Well-known bootstrap keys, used only for the bind handshake.
pub const GENERIC_KEY_V1: &[u8; 16] = b"a3K8Bx%2r8Y7#xDh";
pub const GENERIC_KEY_V2: &[u8; 16] = b"{yxAHAY_Lm6pbC/<";

const ORIGINATOR: &str = "app";
const PACK: &str = "pack";

/// Outer datagram. Field order is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub i: u8,
    pub pack: String,
    #[serde(default)]
    pub t: String,
    #[serde(default)]
    pub tcid: String,
    #[serde(default)]
    pub uid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    cols: &'a [String],
    mac: &'a str,
    t: &'static str,
}

#[derive(Serialize)]
struct CommandBody<'a> {
    opt: &'a [String],
    p: &'a [i64],
    t: &'static str,
    sub: &'a str,
}

#[derive(Serialize)]
struct BindBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    cid: Option<&'a str>,
    mac: &'a str,
    t: &'static str,
    uid: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum Request<'a> {
    Status { cols: &'a [String] },
    Command { opt: &'a [String], p: &'a [i64] },
    Bind,
}

impl Request<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Status { .. } => "status",
            Request::Command { .. } => "cmd",
            Request::Bind => "bind",
        }
    }

    fn sequence(&self) -> u8 {
        match self {
            Request::Bind => 1,
            _ => 0,
        }
    }

    /// Inner JSON, before encryption.
    pub fn plaintext(&self, identity: &DeviceIdentity, version: EncryptionVersion) -> Result<String> {
        let json = match *self {
            Request::Status { cols } => serde_json::to_string(&StatusBody {
                cols,
                mac: identity.sub_mac(),
                t: "status",
            })?,
            Request::Command { opt, p } => {
                if opt.len() != p.len() {
                    return Err(Error::Codec(format!(
                        "{} option names for {} values",
                        opt.len(),
                        p.len()
                    )));
                }
                serde_json::to_string(&CommandBody {
                    opt,
                    p,
                    t: "cmd",
                    sub: identity.sub_mac(),
                })?
            }
            Request::Bind => serde_json::to_string(&BindBody {
                cid: match version {
                    EncryptionVersion::V1Ecb => None,
                    EncryptionVersion::V2Gcm => Some(identity.mac.as_str()),
                },
                mac: &identity.mac,
                t: "bind",
                uid: 0,
            })?,
        };
        Ok(json)
    }
}

/// A request ready for the wire, together with the JSON that was encrypted into it.
#[derive(Debug, Clone)]
pub struct Framed {
    pub plaintext: String,
    pub wire: Vec<u8>,
}

pub fn frame_request(
    request: &Request<'_>,
    identity: &DeviceIdentity,
    uid: u32,
    cipher: &CipherContext,
) -> Result<Framed> {
    let plaintext = request.plaintext(identity, cipher.version())?;
    let uid = match request {
        Request::Bind => 0,
        _ => uid,
    };
    let wire = seal(&plaintext, &identity.mac, request.sequence(), uid, cipher)?;
    Ok(Framed { plaintext, wire })
}

pub fn build_request(
    request: &Request<'_>,
    identity: &DeviceIdentity,
    uid: u32,
    cipher: &CipherContext,
) -> Result<Vec<u8>> {
    frame_request(request, identity, uid, cipher).map(|framed| framed.wire)
}

/// Encrypts `plaintext` and wraps it in a pack envelope addressed to `tcid`.
pub fn seal(plaintext: &str, tcid: &str, i: u8, uid: u32, cipher: &CipherContext) -> Result<Vec<u8>> {
    let sealed = cipher.encrypt(plaintext.as_bytes())?;
    let envelope = Envelope {
        cid: ORIGINATOR.to_string(),
        i,
        pack: STANDARD.encode(&sealed.ciphertext),
        t: PACK.to_string(),
        tcid: tcid.to_string(),
        uid: u64::from(uid),
        tag: sealed.tag.map(|tag| STANDARD.encode(tag)),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Unwraps and decrypts a pack envelope into its inner JSON body.
pub fn parse_response(wire: &[u8], cipher: &CipherContext) -> Result<Value> {
    let envelope: Envelope = serde_json::from_slice(wire)
        .map_err(|e| Error::Codec(format!("bad envelope: {e}")))?;
    let ciphertext = STANDARD.decode(envelope.pack.as_bytes())?;
    let tag = envelope
        .tag
        .as_deref()
        .map(|t| STANDARD.decode(t.as_bytes()))
        .transpose()?;
    let plaintext = cipher.decrypt(&ciphertext, tag.as_deref())?;
    // ECB under the wrong key "succeeds" with noise; that is a key problem, not a codec one.
    if !plaintext.starts_with(b"{") {
        return Err(Error::Crypto("payload did not decrypt to JSON".to_string()));
    }
    serde_json::from_slice(&plaintext).map_err(|e| Error::Codec(format!("bad payload: {e}")))
}

/// Pairs the `dat` values of a status reply with the requested names.
/// A single value may arrive as a bare scalar.
pub fn extract_values(body: &Value, cols: &[String]) -> Result<Vec<(String, Option<i64>)>> {
    let dat = body
        .get("dat")
        .ok_or_else(|| Error::Codec("reply has no dat field".to_string()))?;
    let values: Vec<&Value> = match dat {
        Value::Array(items) => items.iter().collect(),
        scalar => vec![scalar],
    };
    if values.len() != cols.len() {
        return Err(Error::Codec(format!(
            "requested {} values, device returned {}",
            cols.len(),
            values.len()
        )));
    }
    Ok(cols
        .iter()
        .zip(values)
        .map(|(name, value)| (name.clone(), register_value(value)))
        .collect())
}

fn register_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
