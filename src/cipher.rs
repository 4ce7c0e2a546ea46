use std::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::RngCore;

use crate::types::EncryptionVersion;
use crate::{Error, Result};

pub const KEY_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Associated data mixed into every GCM message by the device firmware.
const GCM_AAD: &[u8] = b"qualcomm-test";

/// 128-bit device key. Debug output never shows the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!(
                "key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub const fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl TryFrom<&str> for SessionKey {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        SessionKey::new(s.as_bytes())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Ciphertext plus the detached GCM tag (absent for ECB).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: Option<Vec<u8>>,
}

/// Expanded key schedule for one (version, key) pair.
#[derive(Clone)]
pub enum CipherContext {
    Ecb(Aes128),
    Gcm(Aes128Gcm),
}

impl CipherContext {
    pub fn new(version: EncryptionVersion, key: &SessionKey) -> Self {
        match version {
            EncryptionVersion::V1Ecb => CipherContext::Ecb(Aes128::new(key.as_bytes().into())),
            EncryptionVersion::V2Gcm => {
                CipherContext::Gcm(Aes128Gcm::new(key.as_bytes().into()))
            }
        }
    }

    pub fn version(&self) -> EncryptionVersion {
        match self {
            CipherContext::Ecb(_) => EncryptionVersion::V1Ecb,
            CipherContext::Gcm(_) => EncryptionVersion::V2Gcm,
        }
    }

    /// ECB pads and encrypts in place. GCM draws a fresh nonce, prepends it to the
    /// ciphertext and returns the tag separately.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed> {
        match self {
            CipherContext::Ecb(aes) => {
                let mut buf = pad(plaintext);
                for block in buf.chunks_exact_mut(BLOCK_LEN) {
                    aes.encrypt_block(GenericArray::from_mut_slice(block));
                }
                Ok(Sealed {
                    ciphertext: buf,
                    tag: None,
                })
            }
            CipherContext::Gcm(gcm) => {
                let mut nonce = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce);
                let mut body = gcm
                    .encrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: plaintext,
                            aad: GCM_AAD,
                        },
                    )
                    .map_err(|_| Error::Crypto("gcm encryption failed".to_string()))?;
                let tag = body.split_off(body.len() - TAG_LEN);
                let mut ciphertext = Vec::with_capacity(NONCE_LEN + body.len());
                ciphertext.extend_from_slice(&nonce);
                ciphertext.extend_from_slice(&body);
                Ok(Sealed {
                    ciphertext,
                    tag: Some(tag),
                })
            }
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8], tag: Option<&[u8]>) -> Result<Vec<u8>> {
        match self {
            CipherContext::Ecb(aes) => {
                if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
                    return Err(Error::Crypto(format!(
                        "ciphertext length {} is not a multiple of {BLOCK_LEN}",
                        ciphertext.len()
                    )));
                }
                let mut buf = ciphertext.to_vec();
                for block in buf.chunks_exact_mut(BLOCK_LEN) {
                    aes.decrypt_block(GenericArray::from_mut_slice(block));
                }
                Ok(unpad(buf))
            }
            CipherContext::Gcm(gcm) => {
                let tag = tag.ok_or_else(|| Error::Crypto("missing authentication tag".to_string()))?;
                if tag.len() != TAG_LEN {
                    return Err(Error::Crypto(format!(
                        "authentication tag must be {TAG_LEN} bytes, got {}",
                        tag.len()
                    )));
                }
                if ciphertext.len() < NONCE_LEN {
                    return Err(Error::Crypto("ciphertext shorter than nonce".to_string()));
                }
                let (nonce, body) = ciphertext.split_at(NONCE_LEN);
                let mut combined = Vec::with_capacity(body.len() + TAG_LEN);
                combined.extend_from_slice(body);
                combined.extend_from_slice(tag);
                gcm.decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: &combined,
                        aad: GCM_AAD,
                    },
                )
                .map_err(|_| Error::Crypto("authentication tag mismatch".to_string()))
            }
        }
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherContext({:?})", self.version())
    }
}

/// Pad byte value equals the pad length; aligned input gets a full extra block.
pub(crate) fn pad(plaintext: &[u8]) -> Vec<u8> {
    let n = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
    let mut out = Vec::with_capacity(plaintext.len() + n);
    out.extend_from_slice(plaintext);
    out.resize(plaintext.len() + n, n as u8);
    out
}

/// Some firmware pads replies with stray control bytes instead of a valid pad,
/// so anything that is not a well-formed pad is trimmed back to printable text.
pub(crate) fn unpad(mut data: Vec<u8>) -> Vec<u8> {
    if let Some(&last) = data.last() {
        let n = last as usize;
        if (1..=BLOCK_LEN).contains(&n)
            && n <= data.len()
            && data[data.len() - n..].iter().all(|&b| b == last)
        {
            data.truncate(data.len() - n);
            return data;
        }
    }
    while data.last().is_some_and(|&b| b < 0x20) {
        data.pop();
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::try_from("0123456789abcdef").unwrap()
    }

    #[test]
    fn ecb_padding_strips_back_to_plaintext() {
        let ctx = CipherContext::new(EncryptionVersion::V1Ecb, &key());
        for len in 0..=32 {
            let plaintext: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
            let sealed = ctx.encrypt(&plaintext).unwrap();
            assert_eq!(sealed.ciphertext.len() % 16, 0);
            assert!(sealed.tag.is_none());
            let opened = ctx.decrypt(&sealed.ciphertext, None).unwrap();
            assert_eq!(opened, plaintext, "length {len}");
        }
    }

    #[test]
    fn aligned_plaintext_gets_full_pad_block() {
        let padded = pad(&[b'x'; 16]);
        assert_eq!(padded.len(), 32);
        assert!(padded[16..].iter().all(|&b| b == 16));
        assert_eq!(pad(b"abc").len(), 16);
        assert_eq!(pad(b"abc")[15], 13);
    }

    #[test]
    fn ecb_rejects_misaligned_ciphertext() {
        let ctx = CipherContext::new(EncryptionVersion::V1Ecb, &key());
        let err = ctx.decrypt(&[0u8; 17], None).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)), "got {err:?}");
        assert!(ctx.decrypt(&[], None).is_err());
    }

    #[test]
    fn unpad_trims_stray_control_bytes() {
        let mut data = b"{\"t\":\"dat\"}".to_vec();
        data.extend_from_slice(&[0x00, 0x0f, 0x03]);
        assert_eq!(unpad(data), b"{\"t\":\"dat\"}".to_vec());
    }

    #[test]
    fn gcm_roundtrip_with_fresh_nonce() {
        let ctx = CipherContext::new(EncryptionVersion::V2Gcm, &key());
        let plaintext = br#"{"cols":["Pow"],"mac":"aabbcc","t":"status"}"#;
        let a = ctx.encrypt(plaintext).unwrap();
        let b = ctx.encrypt(plaintext).unwrap();
        assert_ne!(a.ciphertext[..12], b.ciphertext[..12]);
        assert_eq!(a.tag.as_ref().unwrap().len(), 16);
        let opened = ctx.decrypt(&a.ciphertext, a.tag.as_deref()).unwrap();
        assert_eq!(opened, plaintext.to_vec());
    }

    #[test]
    fn gcm_detects_tampering() {
        let ctx = CipherContext::new(EncryptionVersion::V2Gcm, &key());
        let sealed = ctx.encrypt(b"{}").unwrap();
        let mut tag = sealed.tag.clone().unwrap();
        tag[0] ^= 0xff;
        assert!(matches!(
            ctx.decrypt(&sealed.ciphertext, Some(&tag)),
            Err(Error::Crypto(_))
        ));
        assert!(matches!(
            ctx.decrypt(&sealed.ciphertext, None),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn gcm_rejects_other_key() {
        let ctx = CipherContext::new(EncryptionVersion::V2Gcm, &key());
        let other = CipherContext::new(
            EncryptionVersion::V2Gcm,
            &SessionKey::try_from("fedcba9876543210").unwrap(),
        );
        let sealed = ctx.encrypt(b"{\"t\":\"status\"}").unwrap();
        assert!(other.decrypt(&sealed.ciphertext, sealed.tag.as_deref()).is_err());
    }

    #[test]
    fn key_length_is_checked() {
        assert!(matches!(SessionKey::new(b"short"), Err(Error::Crypto(_))));
        assert_eq!(format!("{:?}", key()), "SessionKey(..)");
    }
}
