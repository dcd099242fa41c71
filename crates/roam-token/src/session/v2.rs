//! V2: MessagePack array `[id, a, tc, te, ds, dx, s]`, raw signed-hash signature.

use super::{now, timestamp, Decoded, Session};
use crate::encoding::{from_msgpack, signed_hash_plaintext, to_msgpack, write_msgpack, Base64Cookie, Msgpack};
use crate::error::SessionError;
use crate::keys::{PrivateKey, PublicKey, SignatureMode};
use serde_json::{json, Map, Value};

const FIELDS: usize = 7;

fn read_array(cookie: &str) -> Result<Vec<rmpv::Value>, SessionError> {
    let bytes = Base64Cookie::load(cookie)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by base64: {e}")))?;
    let mut reader = bytes.as_slice();
    match rmpv::decode::read_value(&mut reader) {
        Ok(rmpv::Value::Array(items)) if items.len() == FIELDS => Ok(items),
        Ok(_) => Err(SessionError::malformed(cookie, "expected a 7-element array")),
        Err(e) => Err(SessionError::malformed(cookie, format!("caused by msgpack: {e}"))),
    }
}

fn text(value: rmpv::Value, field: &str) -> Result<String, String> {
    match value {
        rmpv::Value::String(s) => s.into_str().ok_or_else(|| format!("{field} is not UTF-8")),
        _ => Err(format!("{field} is not a string")),
    }
}

fn integer(value: &rmpv::Value, field: &str) -> Result<i64, String> {
    value.as_i64().ok_or_else(|| format!("{field} is not an integer"))
}

fn map(value: rmpv::Value, field: &str) -> Result<Map<String, Value>, String> {
    match from_msgpack(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(format!("{field} is not a map")),
        Err(e) => Err(format!("{field}: {e}")),
    }
}

fn bytes(value: rmpv::Value) -> Result<Vec<u8>, String> {
    match value {
        rmpv::Value::Binary(b) => Ok(b),
        rmpv::Value::String(s) => Ok(s.into_bytes()),
        _ => Err("s is not binary".to_string()),
    }
}

pub(super) fn decode_cookie(cookie: &str) -> Result<Value, SessionError> {
    let mut items = read_array(cookie)?;
    let signature = items.pop().map(bytes).transpose().map_err(|e| SessionError::malformed(cookie, e))?;
    let mut out = items
        .into_iter()
        .map(from_msgpack)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SessionError::malformed(cookie, e))?;
    out.push(signature.map_or(Value::Null, |s| Value::String(Base64Cookie::dump(&s))));
    Ok(Value::Array(out))
}

pub(super) fn decode(cookie: &str) -> Result<Decoded, SessionError> {
    let items = read_array(cookie)?;
    parse(items).map_err(|e| SessionError::malformed(cookie, e))
}

fn parse(items: Vec<rmpv::Value>) -> Result<Decoded, String> {
    let mut items = items.into_iter();
    let mut next = || items.next().ok_or_else(|| "truncated array".to_string());

    let id = text(next()?, "id")?;
    let authority = text(next()?, "a")?;
    let tc = integer(&next()?, "tc")?;
    let te = integer(&next()?, "te")?;
    let signed = map(next()?, "ds")?;
    let insecure = map(next()?, "dx")?;
    let signature = bytes(next()?)?;

    Ok(Decoded {
        id,
        authority,
        key_id: None,
        algorithm: None,
        created_at: timestamp(tc).ok_or("tc out of range")?,
        expired_at: timestamp(te).ok_or("te out of range")?,
        not_before: None,
        signed,
        insecure,
        signature,
        seal: None,
    })
}

fn plaintext(id: &str, authority: &str, tc: i64, te: i64, ds: &Map<String, Value>) -> Result<Vec<u8>, SessionError> {
    let hash = json!({ "id": id, "a": authority, "tc": tc, "te": te, "ds": ds });
    signed_hash_plaintext::<Msgpack>(&hash, te)
}

/// Signature first, then the expiry bound into it.
pub(super) fn verify(decoded: &Decoded, key: &PublicKey) -> Result<(), SessionError> {
    let te = decoded.expired_at.timestamp();
    let message = plaintext(
        &decoded.id,
        &decoded.authority,
        decoded.created_at.timestamp(),
        te,
        &decoded.signed,
    )?;
    key.verify_sha1(&message, &decoded.signature, SignatureMode::Raw)
        .map_err(|e| SessionError::InvalidSignature(format!("global session signature verification failed: {e}")))?;

    if decoded.expired_at <= now() {
        return Err(SessionError::ExpiredSession {
            expired_at: decoded.expired_at,
        });
    }
    Ok(())
}

pub(super) fn sign(session: &Session, key: &PrivateKey) -> Result<Vec<u8>, SessionError> {
    let message = plaintext(
        session.id_str()?,
        session.authority_str()?,
        session.created_at.timestamp(),
        session.expired_at.timestamp(),
        &session.signed,
    )?;
    key.sign_sha1(&message, SignatureMode::Raw)
}

pub(super) fn encode(session: &Session) -> Result<String, SessionError> {
    let array = rmpv::Value::Array(vec![
        rmpv::Value::from(session.id_str()?),
        rmpv::Value::from(session.authority_str()?),
        rmpv::Value::from(session.created_at.timestamp()),
        rmpv::Value::from(session.expired_at.timestamp()),
        to_msgpack(&Value::Object(session.signed.clone()))?,
        to_msgpack(&Value::Object(session.insecure.clone()))?,
        rmpv::Value::Binary(session.signature_bytes()?.to_vec()),
    ]);
    Ok(Base64Cookie::dump(&write_msgpack(&array)?))
}
