//! V4: a JWT carrying the signed attributes as claims, with insecure attributes
//! in an optional unsigned fourth segment.

use super::{timestamp, Decoded, Session};
use crate::encoding::{sha1_hex, Base64Url};
use crate::error::SessionError;
use crate::keys::{PrivateKey, PublicKey};
use serde_json::{Map, Value};

const ID: &str = "id";
const EXPIRED_AT: &str = "exp";
const ISSUED_AT: &str = "iat";
const ISSUER: &str = "iss";
const NOT_BEFORE: &str = "nbf";
const JWT_ID: &str = "jti";

const RESERVED: [&str; 5] = [ID, EXPIRED_AT, ISSUED_AT, ISSUER, NOT_BEFORE];

fn segment(cookie: &str, text: &str, what: &str) -> Result<Value, SessionError> {
    let bytes = Base64Url::load(text)
        .map_err(|e| SessionError::malformed(cookie, format!("JWT {what}: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| SessionError::malformed(cookie, format!("JWT {what}: {e}")))
}

struct Parts {
    header: Map<String, Value>,
    payload: Map<String, Value>,
    signature: Vec<u8>,
    insecure: Map<String, Value>,
    seal: String,
}

/// Break a JWT into its parts.
///
/// A `typ` other than `JWT` is rejected, but a missing or null `typ` is
/// accepted: RFC 7519 makes the header optional and several issuers omit it.
fn split(cookie: &str) -> Result<Parts, SessionError> {
    let segments: Vec<&str> = cookie.split('.').collect();
    if !(3..=4).contains(&segments.len()) {
        return Err(SessionError::malformed(cookie, "JWT must have 3 or 4 segments"));
    }

    let Value::Object(header) = segment(cookie, segments[0], "header")? else {
        return Err(SessionError::malformed(cookie, "JWT header not present"));
    };
    if let Some(typ) = header.get("typ").filter(|typ| !typ.is_null()) {
        if !typ.as_str().is_some_and(|t| t.eq_ignore_ascii_case("JWT")) {
            return Err(SessionError::malformed(cookie, "JWT header not present"));
        }
    }
    let Value::Object(payload) = segment(cookie, segments[1], "payload")? else {
        return Err(SessionError::malformed(cookie, "JWT payload not present"));
    };
    let signature = Base64Url::load(segments[2])
        .map_err(|e| SessionError::malformed(cookie, format!("JWT signature: {e}")))?;
    let insecure = match segments.get(3) {
        None => Map::new(),
        Some(text) => match segment(cookie, text, "insecure segment")? {
            Value::Object(map) => map,
            _ => return Err(SessionError::malformed(cookie, "JWT insecure segment is not an object")),
        },
    };

    Ok(Parts {
        header,
        payload,
        signature,
        insecure,
        seal: segments[..3].join("."),
    })
}

pub(super) fn decode_cookie(cookie: &str) -> Result<Value, SessionError> {
    let parts = split(cookie)?;
    Ok(Value::Array(vec![
        Value::Object(parts.header),
        Value::Object(parts.payload),
        Value::String(Base64Url::dump(&parts.signature)),
        Value::Object(parts.insecure),
    ]))
}

fn claim_time(payload: &Map<String, Value>, claim: &str) -> Result<chrono::DateTime<chrono::Utc>, SessionError> {
    payload
        .get(claim)
        .and_then(Value::as_i64)
        .and_then(timestamp)
        .ok_or_else(|| SessionError::InvalidSignature(format!("JWT {claim} claim missing/wrong")))
}

pub(super) fn decode(cookie: &str) -> Result<Decoded, SessionError> {
    let Parts {
        header,
        mut payload,
        signature,
        insecure,
        seal,
    } = split(cookie)?;

    let algorithm = header
        .get("alg")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::malformed(cookie, "JWT header has no alg"))?
        .to_string();
    let key_id = header.get("kid").and_then(Value::as_str).map(str::to_string);

    let created_at = claim_time(&payload, ISSUED_AT)?;
    let expired_at = claim_time(&payload, EXPIRED_AT)?;
    let not_before = payload
        .get(NOT_BEFORE)
        .and_then(Value::as_f64)
        .and_then(|nbf| timestamp(nbf.floor() as i64));

    let authority = payload
        .get(ISSUER)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let id = payload
        .get(ID)
        .or_else(|| payload.get(JWT_ID))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| sha1_hex(&signature));

    for claim in RESERVED {
        payload.remove(claim);
    }

    Ok(Decoded {
        id,
        authority,
        key_id,
        algorithm: Some(algorithm),
        created_at,
        expired_at,
        not_before,
        signed: payload,
        insecure,
        signature,
        seal: Some(seal),
    })
}

fn signing_input(seal: &str) -> &str {
    seal.rsplit_once('.').map_or(seal, |(input, _)| input)
}

pub(super) fn verify(decoded: &Decoded, key: &PublicKey) -> Result<(), SessionError> {
    let (Some(algorithm), Some(seal)) = (&decoded.algorithm, &decoded.seal) else {
        return Err(SessionError::InvalidSignature("JWT is incomplete".to_string()));
    };
    key.verify_jwt(algorithm, signing_input(seal).as_bytes(), &decoded.signature)
        .map_err(|e| SessionError::InvalidSignature(format!("global session signature verification failed: {e}")))
}

/// Returns the signature and the signed `header.payload.signature` text.
pub(super) fn sign(session: &Session, key: &PrivateKey) -> Result<(Vec<u8>, String), SessionError> {
    let algorithm = key.jwt_algorithm()?;
    let header = format!(r#"{{"typ":"JWT","alg":"{algorithm}"}}"#);

    let mut payload = session.signed.clone();
    payload.insert(ID.to_string(), Value::from(session.id_str()?));
    payload.insert(EXPIRED_AT.to_string(), Value::from(session.expired_at.timestamp()));
    payload.insert(ISSUED_AT.to_string(), Value::from(session.created_at.timestamp()));
    payload.insert(ISSUER.to_string(), Value::from(session.authority_str()?));
    let payload =
        serde_json::to_vec(&payload).map_err(|e| SessionError::UnserializableType(e.to_string()))?;

    let input = format!("{}.{}", Base64Url::dump(header.as_bytes()), Base64Url::dump(&payload));
    let signature = key.sign_jwt(input.as_bytes())?;
    let seal = format!("{input}.{}", Base64Url::dump(&signature));
    Ok((signature, seal))
}

pub(super) fn encode(session: &Session) -> Result<String, SessionError> {
    let seal = session
        .seal
        .as_deref()
        .ok_or_else(|| SessionError::Internal(anyhow::anyhow!("V4 session has no signed JWT")))?;
    if session.insecure.is_empty() {
        return Ok(seal.to_string());
    }
    let insecure = serde_json::to_vec(&session.insecure)
        .map_err(|e| SessionError::UnserializableType(e.to_string()))?;
    Ok(format!("{seal}.{}", Base64Url::dump(&insecure)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(header: &str, payload: &str) -> String {
        format!(
            "{}.{}.{}",
            Base64Url::dump(header.as_bytes()),
            Base64Url::dump(payload.as_bytes()),
            Base64Url::dump(b"sig")
        )
    }

    #[test]
    fn test_missing_typ_is_tolerated() {
        let cookie = jwt(r#"{"alg":"RS256"}"#, r#"{"iat":1,"exp":2,"iss":"a","sub":"me"}"#);
        let decoded = decode(&cookie).unwrap();
        assert_eq!(decoded.authority, "a");
        assert_eq!(decoded.signed["sub"], "me");
        assert!(!decoded.signed.contains_key("iat"));
        assert_eq!(decoded.id, sha1_hex(b"sig"));
    }

    #[test]
    fn test_foreign_typ_is_malformed() {
        let cookie = jwt(r#"{"typ":"JWE","alg":"RS256"}"#, r#"{"iat":1,"exp":2,"iss":"a"}"#);
        assert!(matches!(decode(&cookie), Err(SessionError::MalformedCookie { .. })));
    }

    #[test]
    fn test_non_integer_times_fail_signature() {
        let cookie = jwt(r#"{"typ":"JWT","alg":"RS256"}"#, r#"{"iat":"yesterday","exp":2}"#);
        assert!(matches!(decode(&cookie), Err(SessionError::InvalidSignature(_))));
    }

    #[test]
    fn test_non_object_header_is_malformed() {
        let cookie = jwt("[1]", r#"{"iat":1,"exp":2}"#);
        assert!(matches!(decode(&cookie), Err(SessionError::MalformedCookie { .. })));
        assert!(matches!(decode("eyJhbGciOi"), Err(SessionError::MalformedCookie { .. })));
    }

    #[test]
    fn test_kid_and_insecure_segment() {
        let mut cookie = jwt(
            r#"{"typ":"JWT","alg":"ES256","kid":"authority1"}"#,
            r#"{"iat":1,"exp":2,"iss":"https://idp.example.com","jti":"abc"}"#,
        );
        cookie.push('.');
        cookie.push_str(&Base64Url::dump(br#"{"favorite_color":"blue"}"#));

        let decoded = decode(&cookie).unwrap();
        assert_eq!(decoded.key_id.as_deref(), Some("authority1"));
        assert_eq!(decoded.id, "abc");
        assert_eq!(decoded.insecure["favorite_color"], "blue");
        assert_eq!(signing_input(decoded.seal.as_deref().unwrap()).matches('.').count(), 1);
    }
}
