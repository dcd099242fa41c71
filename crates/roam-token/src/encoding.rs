//! Codecs and canonicalization.
//!
//! Signatures are computed over a *canonical* form of the session data so that
//! any implementation can reproduce the signing input byte-for-byte: maps become
//! arrays of `[key, value]` pairs sorted by key, arrays keep their order and
//! scalars pass through unchanged.

use crate::error::SessionError;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

const COOKIE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const URL_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A structured-data codec.
pub trait Codec {
    fn load(bytes: &[u8]) -> Result<Value, SessionError>;
    fn dump(value: &Value) -> Result<Vec<u8>, SessionError>;
}

/// Compact JSON text.
pub struct Json;

impl Codec for Json {
    fn load(bytes: &[u8]) -> Result<Value, SessionError> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Internal(e.into()))
    }

    fn dump(value: &Value) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(value).map_err(|e| SessionError::UnserializableType(e.to_string()))
    }
}

/// MessagePack binary encoding.
pub struct Msgpack;

impl Codec for Msgpack {
    fn load(bytes: &[u8]) -> Result<Value, SessionError> {
        let mut reader = bytes;
        let value = rmpv::decode::read_value(&mut reader)
            .map_err(|e| SessionError::Internal(anyhow::anyhow!("msgpack: {e}")))?;
        from_msgpack(value)
    }

    fn dump(value: &Value) -> Result<Vec<u8>, SessionError> {
        write_msgpack(&to_msgpack(value)?)
    }
}

pub(crate) fn write_msgpack(value: &rmpv::Value) -> Result<Vec<u8>, SessionError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("msgpack: {e}")))?;
    Ok(buf)
}

pub(crate) fn to_msgpack(value: &Value) -> Result<rmpv::Value, SessionError> {
    Ok(match value {
        Value::Null => rmpv::Value::Nil,
        Value::Bool(b) => rmpv::Value::Boolean(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                rmpv::Value::from(u)
            } else if let Some(i) = n.as_i64() {
                rmpv::Value::from(i)
            } else if let Some(f) = n.as_f64() {
                rmpv::Value::F64(f)
            } else {
                return Err(SessionError::UnserializableType(format!("number {n}")));
            }
        }
        Value::String(s) => rmpv::Value::from(s.as_str()),
        Value::Array(items) => {
            rmpv::Value::Array(items.iter().map(to_msgpack).collect::<Result<_, _>>()?)
        }
        Value::Object(map) => rmpv::Value::Map(
            map.iter()
                .map(|(k, v)| Ok((rmpv::Value::from(k.as_str()), to_msgpack(v)?)))
                .collect::<Result<_, SessionError>>()?,
        ),
    })
}

pub(crate) fn from_msgpack(value: rmpv::Value) -> Result<Value, SessionError> {
    let unsupported = |what: &str| SessionError::UnserializableType(format!("msgpack {what}"));
    Ok(match value {
        rmpv::Value::Nil => Value::Null,
        rmpv::Value::Boolean(b) => Value::Bool(b),
        rmpv::Value::Integer(i) => {
            if let Some(u) = i.as_u64() {
                Value::from(u)
            } else if let Some(n) = i.as_i64() {
                Value::from(n)
            } else {
                return Err(unsupported("integer"));
            }
        }
        rmpv::Value::F32(f) => float(f64::from(f))?,
        rmpv::Value::F64(f) => float(f)?,
        rmpv::Value::String(s) => Value::String(s.into_str().ok_or_else(|| unsupported("non UTF-8 string"))?),
        rmpv::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_msgpack).collect::<Result<_, _>>()?)
        }
        rmpv::Value::Map(pairs) => {
            let mut map = Map::new();
            for (k, v) in pairs {
                let rmpv::Value::String(k) = k else {
                    return Err(unsupported("non-string map key"));
                };
                let k = k.into_str().ok_or_else(|| unsupported("non UTF-8 map key"))?;
                map.insert(k, from_msgpack(v)?);
            }
            Value::Object(map)
        }
        rmpv::Value::Binary(_) => return Err(unsupported("binary")),
        rmpv::Value::Ext(..) => return Err(unsupported("extension")),
    })
}

fn float(f: f64) -> Result<Value, SessionError> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| SessionError::UnserializableType(format!("float {f}")))
}

/// URL-safe base64 with padding, used for cookie bodies.
pub struct Base64Cookie;

impl Base64Cookie {
    pub fn dump(bytes: &[u8]) -> String {
        COOKIE_ENGINE.encode(bytes)
    }

    /// Decode; missing padding is tolerated.
    pub fn load(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
        COOKIE_ENGINE.decode(text.trim())
    }
}

/// URL-safe base64 without padding, used for JWT segments.
pub struct Base64Url;

impl Base64Url {
    pub fn dump(bytes: &[u8]) -> String {
        URL_ENGINE.encode(bytes)
    }

    pub fn load(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
        URL_ENGINE.decode(text)
    }
}

/// Canonicalize any serializable value.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Value, SessionError> {
    let value =
        serde_json::to_value(value).map_err(|e| SessionError::UnserializableType(e.to_string()))?;
    Ok(canonical(&value))
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Array(
                keys.into_iter()
                    .map(|k| Value::Array(vec![Value::String(k.clone()), canonical(&map[k])]))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        scalar => scalar.clone(),
    }
}

/// The exact byte sequence that gets signed: the codec dump of the canonical form.
pub fn canonical_bytes<C: Codec>(value: &Value) -> Result<Vec<u8>, SessionError> {
    C::dump(&canonical(value))
}

/// Signing input for signed-hash framing: `data` and its expiry, canonicalized
/// together so that a tampered expiry invalidates the signature.
pub(crate) fn signed_hash_plaintext<C: Codec>(data: &Value, expires_at: i64) -> Result<Vec<u8>, SessionError> {
    let frame = serde_json::json!({
        "data": data,
        "metadata": { "expires_at": expires_at },
    });
    canonical_bytes::<C>(&frame)
}

/// Lowercase hex SHA-1.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}
