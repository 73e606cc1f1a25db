//! Signed and optionally encrypted value codec
//!
//! Seals a serializable value into a URL-safe string that carries its own timestamp and
//! an HMAC-SHA256 over `name|timestamp|payload`. Binding the name means a value sealed
//! for one cookie cannot be replayed under another. With a block key the JSON payload
//! is first encrypted with AES-256-GCM through the cookie crate's private jar.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use cookie::{Cookie, CookieJar, Key};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use sqlsess_core::{
    config_error, ErrorContext, KeyMaterial, SessionResult, SessionStoreError,
    MIN_BLOCK_KEY_BYTES,
};
use subtle::ConstantTimeEq;
use tracing::trace;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock difference between nodes, in seconds
const MAX_CLOCK_SKEW_SECS: i64 = 60;

fn decode_error(message: impl Into<String>) -> SessionStoreError {
    SessionStoreError::Decode {
        message: message.into(),
        context: ErrorContext::new("codec").with_operation("decode"),
    }
}

/// One key pair: a signing key and an optional encryption key
#[derive(Clone)]
pub struct SecureCodec {
    mac: HmacSha256,
    block: Option<Key>,
    /// Maximum age of a sealed value in seconds; `None` disables the check
    max_age: Option<i64>,
}

impl std::fmt::Debug for SecureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCodec")
            .field("mac", &"<redacted>")
            .field("encrypting", &self.block.is_some())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SecureCodec {
    pub fn new(hash_key: impl Into<Vec<u8>>) -> SessionResult<Self> {
        let hash_key = hash_key.into();
        if hash_key.is_empty() {
            return Err(config_error!("Signing key must not be empty", "codec"));
        }
        let mac = HmacSha256::new_from_slice(&hash_key)
            .map_err(|e| config_error!(format!("Unusable signing key: {}", e), "codec"))?;
        Ok(Self {
            mac,
            block: None,
            max_age: None,
        })
    }

    /// Build a codec from one decoded key pair
    pub fn from_material(material: &KeyMaterial) -> SessionResult<Self> {
        let codec = Self::new(material.hash_key.clone())?;
        match &material.block_key {
            Some(block_key) => codec.with_block_key(block_key),
            None => Ok(codec),
        }
    }

    /// Encrypt payloads with a key derived from `block_key`
    pub fn with_block_key(mut self, block_key: &[u8]) -> SessionResult<Self> {
        // Key::derive_from panics below this length.
        if block_key.len() < MIN_BLOCK_KEY_BYTES {
            return Err(config_error!(
                format!(
                    "Encryption key has {} bytes, at least {} are required",
                    block_key.len(),
                    MIN_BLOCK_KEY_BYTES
                ),
                "codec"
            ));
        }
        self.block = Some(Key::derive_from(block_key));
        Ok(self)
    }

    pub fn is_encrypting(&self) -> bool {
        self.block.is_some()
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = (seconds > 0).then_some(seconds);
        self
    }

    fn signature(&self, name: &str, timestamp: &str, payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Turn serialized JSON into the signed payload segment
    fn seal_payload(&self, name: &str, json: String) -> SessionResult<String> {
        let Some(key) = &self.block else {
            return Ok(URL_SAFE_NO_PAD.encode(json));
        };

        let mut jar = CookieJar::new();
        jar.private_mut(key).add(Cookie::new(name.to_string(), json));
        jar.get(name)
            .map(|sealed| sealed.value().to_string())
            .ok_or_else(|| SessionStoreError::Encode {
                message: format!("Failed to encrypt value for '{}'", name),
                source: None,
                context: ErrorContext::new("codec").with_operation("encrypt"),
            })
    }

    /// Recover the JSON bytes from a verified payload segment
    fn open_payload(&self, name: &str, payload: &str) -> SessionResult<Vec<u8>> {
        let Some(key) = &self.block else {
            return URL_SAFE_NO_PAD
                .decode(payload)
                .map_err(|_| decode_error("Payload is not base64"));
        };

        let jar = CookieJar::new();
        jar.private(key)
            .decrypt(Cookie::new(name.to_string(), payload.to_string()))
            .map(|opened| opened.value().as_bytes().to_vec())
            .ok_or_else(|| decode_error("Payload does not decrypt"))
    }

    /// Seal `value` for `name`
    pub fn encode<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> SessionResult<String> {
        self.encode_at(name, value, Utc::now().timestamp())
    }

    pub(crate) fn encode_at<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
        timestamp: i64,
    ) -> SessionResult<String> {
        let json = serde_json::to_string(value).map_err(|e| SessionStoreError::Encode {
            message: format!("Failed to serialize value for '{}': {}", name, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("codec")
                .with_operation("encode")
                .with_suggestion("Store only JSON-representable values in a session"),
        })?;

        let payload = self.seal_payload(name, json)?;
        let timestamp = timestamp.to_string();
        let mac = URL_SAFE_NO_PAD.encode(self.signature(name, &timestamp, &payload));

        Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}|{}", timestamp, payload, mac)))
    }

    /// Verify and open a value sealed for `name`
    pub fn decode<T: DeserializeOwned>(&self, name: &str, sealed: &str) -> SessionResult<T> {
        self.decode_at(name, sealed, Utc::now().timestamp())
    }

    pub(crate) fn decode_at<T: DeserializeOwned>(
        &self,
        name: &str,
        sealed: &str,
        now: i64,
    ) -> SessionResult<T> {
        let outer = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|e| decode_error(format!("Sealed value is not base64: {}", e)))?;
        let outer =
            String::from_utf8(outer).map_err(|_| decode_error("Sealed value is not UTF-8"))?;

        let mut parts = outer.splitn(3, '|');
        let (timestamp, payload, mac) = match (parts.next(), parts.next(), parts.next()) {
            (Some(timestamp), Some(payload), Some(mac)) => (timestamp, payload, mac),
            _ => return Err(decode_error("Sealed value is malformed")),
        };

        let given = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|_| decode_error("Signature is not base64"))?;
        let expected = self.signature(name, timestamp, payload);
        if expected.as_slice().ct_eq(given.as_slice()).unwrap_u8() != 1 {
            return Err(decode_error("Signature does not verify"));
        }

        let issued: i64 = timestamp
            .parse()
            .map_err(|_| decode_error("Timestamp is not a number"))?;
        if issued > now + MAX_CLOCK_SKEW_SECS {
            return Err(decode_error("Timestamp is in the future"));
        }
        if let Some(max_age) = self.max_age {
            if issued < now - max_age {
                return Err(decode_error("Sealed value is too old"));
            }
        }

        let json = self.open_payload(name, payload)?;
        serde_json::from_slice(&json)
            .map_err(|e| decode_error(format!("Payload does not deserialize: {}", e)))
    }
}

/// Ordered set of codecs supporting key rotation
///
/// Keys are kept oldest first. Values are sealed with the newest key and opened with
/// whichever configured key verifies them.
#[derive(Debug, Clone)]
pub struct CodecChain {
    codecs: Vec<SecureCodec>,
}

impl CodecChain {
    pub fn new(codecs: Vec<SecureCodec>) -> SessionResult<Self> {
        if codecs.is_empty() {
            return Err(config_error!("At least one key pair is required", "codec"));
        }
        Ok(Self { codecs })
    }

    /// Build a chain from raw keys, oldest first
    pub fn from_keys<K: AsRef<[u8]>>(keys: &[K]) -> SessionResult<Self> {
        let codecs = keys
            .iter()
            .map(|key| SecureCodec::new(key.as_ref().to_vec()))
            .collect::<SessionResult<Vec<_>>>()?;
        Self::new(codecs)
    }

    /// Build a chain from decoded key pairs, oldest first
    pub fn from_pairs(pairs: &[KeyMaterial]) -> SessionResult<Self> {
        let codecs = pairs
            .iter()
            .map(SecureCodec::from_material)
            .collect::<SessionResult<Vec<_>>>()?;
        Self::new(codecs)
    }

    /// Apply the same maximum age to every codec
    pub fn with_max_age(self, seconds: i64) -> Self {
        Self {
            codecs: self
                .codecs
                .into_iter()
                .map(|codec| codec.with_max_age(seconds))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    fn newest(&self) -> &SecureCodec {
        // Non-empty by construction.
        &self.codecs[self.codecs.len() - 1]
    }

    pub fn encode<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> SessionResult<String> {
        self.newest().encode(name, value)
    }

    pub fn decode<T: DeserializeOwned>(&self, name: &str, sealed: &str) -> SessionResult<T> {
        let mut last_error = None;
        for (index, codec) in self.codecs.iter().enumerate() {
            match codec.decode(name, sealed) {
                Ok(value) => {
                    trace!(key_index = index, "Value verified");
                    return Ok(value);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| decode_error("No codec configured")))
    }
}
