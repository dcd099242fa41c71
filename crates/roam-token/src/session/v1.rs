//! V1: zlib-compressed JSON object, RSA private-encrypt of a hex SHA-1 digest.

use super::{timestamp, Decoded, Session};
use crate::encoding::{canonical_bytes, sha1_hex, Base64Cookie, Json};
use crate::error::SessionError;
use crate::keys::{PrivateKey, PublicKey};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::{Read, Write};

#[derive(Deserialize)]
struct Body {
    id: String,
    a: String,
    tc: i64,
    te: i64,
    ds: Map<String, Value>,
    #[serde(default)]
    dx: Option<Map<String, Value>>,
    s: String,
}

#[derive(Serialize)]
struct BodyRef<'a> {
    id: &'a str,
    tc: i64,
    te: i64,
    ds: &'a Map<String, Value>,
    a: &'a str,
    dx: &'a Map<String, Value>,
    s: String,
}

pub(super) fn decode_cookie(cookie: &str) -> Result<Value, SessionError> {
    let zbin = Base64Cookie::load(cookie)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by base64: {e}")))?;
    let mut json = Vec::new();
    ZlibDecoder::new(zbin.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by zlib: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| SessionError::malformed(cookie, format!("caused by JSON: {e}")))
}

pub(super) fn decode(cookie: &str) -> Result<Decoded, SessionError> {
    let body: Body = serde_json::from_value(decode_cookie(cookie)?)
        .map_err(|e| SessionError::malformed(cookie, e))?;
    let signature = Base64Cookie::load(&body.s)
        .map_err(|e| SessionError::malformed(cookie, format!("signature: {e}")))?;

    Ok(Decoded {
        created_at: timestamp(body.tc).ok_or_else(|| SessionError::malformed(cookie, "tc out of range"))?,
        expired_at: timestamp(body.te).ok_or_else(|| SessionError::malformed(cookie, "te out of range"))?,
        id: body.id,
        authority: body.a,
        key_id: None,
        algorithm: None,
        not_before: None,
        signed: body.ds,
        insecure: body.dx.unwrap_or_default(),
        signature,
        seal: None,
    })
}

fn digest(id: &str, authority: &str, tc: i64, te: i64, ds: &Map<String, Value>) -> Result<String, SessionError> {
    let hash = json!({ "id": id, "a": authority, "tc": tc, "te": te, "ds": ds });
    Ok(sha1_hex(&canonical_bytes::<Json>(&hash)?))
}

pub(super) fn verify(decoded: &Decoded, key: &PublicKey) -> Result<(), SessionError> {
    let expected = digest(
        &decoded.id,
        &decoded.authority,
        decoded.created_at.timestamp(),
        decoded.expired_at.timestamp(),
        &decoded.signed,
    )?;
    key.verify_private_encrypt(&decoded.signature, expected.as_bytes())
}

pub(super) fn sign(session: &Session, key: &PrivateKey) -> Result<Vec<u8>, SessionError> {
    let expected = digest(
        session.id_str()?,
        session.authority_str()?,
        session.created_at.timestamp(),
        session.expired_at.timestamp(),
        &session.signed,
    )?;
    key.private_encrypt(expected.as_bytes())
}

pub(super) fn encode(session: &Session) -> Result<String, SessionError> {
    let body = BodyRef {
        id: session.id_str()?,
        tc: session.created_at.timestamp(),
        te: session.expired_at.timestamp(),
        ds: &session.signed,
        a: session.authority_str()?,
        dx: &session.insecure,
        s: Base64Cookie::dump(session.signature_bytes()?),
    };
    let json = serde_json::to_vec(&body).map_err(|e| SessionError::UnserializableType(e.to_string()))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    Ok(Base64Cookie::dump(&encoder.finish()?))
}
