//! V3: `[3, id, a, tc, te, ds, dx]` as JSON, a NUL byte, then the detached
//! envelope signature.

use super::{now, timestamp, Decoded, Session};
use crate::encoding::{signed_hash_plaintext, Base64Cookie, Json};
use crate::error::SessionError;
use crate::keys::{PrivateKey, PublicKey, SignatureMode};
use serde_json::{json, Map, Value};

const VERSION: u8 = 3;

type Body = (u8, String, String, i64, i64, Map<String, Value>, Option<Map<String, Value>>);

fn split(cookie: &str) -> Result<(Vec<u8>, Vec<u8>), SessionError> {
    let mut bytes = Base64Cookie::load(cookie)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by base64: {e}")))?;
    let null_at = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| SessionError::malformed(cookie, "input does not contain a 0x00 byte"))?;
    let signature = bytes.split_off(null_at + 1);
    bytes.truncate(null_at);
    Ok((bytes, signature))
}

pub(super) fn decode_cookie(cookie: &str) -> Result<Value, SessionError> {
    let (json, signature) = split(cookie)?;
    let body: Value = serde_json::from_slice(&json)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by JSON: {e}")))?;
    Ok(Value::Array(vec![body, Value::String(Base64Cookie::dump(&signature))]))
}

pub(super) fn decode(cookie: &str) -> Result<Decoded, SessionError> {
    let (json, signature) = split(cookie)?;
    let (version, id, authority, tc, te, signed, insecure): Body = serde_json::from_slice(&json)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by JSON: {e}")))?;
    if version != VERSION {
        return Err(SessionError::malformed(cookie, format!("unexpected version {version}")));
    }

    Ok(Decoded {
        id,
        authority,
        key_id: None,
        algorithm: None,
        created_at: timestamp(tc).ok_or_else(|| SessionError::malformed(cookie, "tc out of range"))?,
        expired_at: timestamp(te).ok_or_else(|| SessionError::malformed(cookie, "te out of range"))?,
        not_before: None,
        signed,
        insecure: insecure.unwrap_or_default(),
        signature,
        seal: None,
    })
}

fn plaintext(id: &str, authority: &str, tc: i64, te: i64, ds: &Map<String, Value>) -> Result<Vec<u8>, SessionError> {
    let hash = json!({ "v": VERSION, "id": id, "a": authority, "tc": tc, "te": te, "ds": ds });
    signed_hash_plaintext::<Json>(&hash, te)
}

pub(super) fn verify(decoded: &Decoded, key: &PublicKey) -> Result<(), SessionError> {
    let message = plaintext(
        &decoded.id,
        &decoded.authority,
        decoded.created_at.timestamp(),
        decoded.expired_at.timestamp(),
        &decoded.signed,
    )?;
    key.verify_sha1(&message, &decoded.signature, SignatureMode::Envelope)
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
    key.sign_sha1(&message, SignatureMode::Envelope)
}

pub(super) fn encode(session: &Session) -> Result<String, SessionError> {
    let body = (
        VERSION,
        session.id_str()?,
        session.authority_str()?,
        session.created_at.timestamp(),
        session.expired_at.timestamp(),
        &session.signed,
        &session.insecure,
    );
    let mut bytes =
        serde_json::to_vec(&body).map_err(|e| SessionError::UnserializableType(e.to_string()))?;
    bytes.push(0);
    bytes.extend_from_slice(session.signature_bytes()?);
    Ok(Base64Cookie::dump(&bytes))
}
