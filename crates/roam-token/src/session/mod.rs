//! The session token family.
//!
//! Four wire versions share one [`Session`] type. The version is sniffed from
//! the literal prefix of a serialized cookie:
//!
//! | Prefix | Version | Layout |
//! |--------|---------|--------|
//! | `eyJ`  | V4 | JWT, optional fourth segment with insecure attributes |
//! | `WzM`  | V3 | JSON array, NUL byte, detached signature |
//! | `l`    | V2 | MessagePack array with binary signature |
//! | other  | V1 | zlib-compressed JSON object |
//!
//! Loading verifies, in order: authority trust, signature, expiry, revocation.
//! Serializing re-signs only when signed attributes or timestamps changed;
//! insecure attributes travel outside the signature.

mod v1;
mod v2;
mod v3;
mod v4;

use crate::directory::Directory;
use crate::encoding::sha1_hex;
use crate::error::SessionError;
use crate::keys::PublicKey;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use roam_core::Settings;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Wire-format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    V1,
    V2,
    V3,
    V4,
}

impl Version {
    /// Used when `cookie.version` is not configured.
    pub const LATEST: Version = Version::V4;

    /// Guess the version of a serialized session from its prefix.
    pub fn detect(cookie: &str) -> Version {
        if cookie.starts_with("eyJ") {
            Version::V4
        } else if cookie.starts_with("WzM") {
            Version::V3
        } else if cookie.starts_with('l') {
            Version::V2
        } else {
            Version::V1
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Version::V1 => 1,
            Version::V2 => 2,
            Version::V3 => 3,
            Version::V4 => 4,
        }
    }

    /// Decode a cookie without verifying it. For debugging only.
    pub fn decode_cookie(cookie: &str) -> Result<Value, SessionError> {
        match Version::detect(cookie) {
            Version::V1 => v1::decode_cookie(cookie),
            Version::V2 => v2::decode_cookie(cookie),
            Version::V3 => v3::decode_cookie(cookie),
            Version::V4 => v4::decode_cookie(cookie),
        }
    }

    fn decode(self, cookie: &str) -> Result<Decoded, SessionError> {
        match self {
            Version::V1 => v1::decode(cookie),
            Version::V2 => v2::decode(cookie),
            Version::V3 => v3::decode(cookie),
            Version::V4 => v4::decode(cookie),
        }
    }

    fn verify(self, decoded: &Decoded, key: &PublicKey) -> Result<(), SessionError> {
        match self {
            Version::V1 => v1::verify(decoded, key),
            Version::V2 => v2::verify(decoded, key),
            Version::V3 => v3::verify(decoded, key),
            Version::V4 => v4::verify(decoded, key),
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = SessionError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        match number {
            1 => Ok(Version::V1),
            2 => Ok(Version::V2),
            3 => Ok(Version::V3),
            4 => Ok(Version::V4),
            other => Err(SessionError::config(format!(
                "unknown value {other} for cookie.version"
            ))),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.number())
    }
}

/// Which attribute names are signed and which are insecure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    signed: BTreeSet<String>,
    insecure: BTreeSet<String>,
}

impl Schema {
    pub fn new<S, A, B>(signed: A, insecure: B) -> Self
    where
        S: Into<String>,
        A: IntoIterator<Item = S>,
        B: IntoIterator<Item = S>,
    {
        Self {
            signed: signed.into_iter().map(Into::into).collect(),
            insecure: insecure.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.attributes.signed.iter().cloned(),
            settings.attributes.insecure.iter().cloned(),
        )
    }

    pub fn is_signed(&self, key: &str) -> bool {
        self.signed.contains(key)
    }

    pub fn is_insecure(&self, key: &str) -> bool {
        self.insecure.contains(key)
    }
}

/// Fields extracted from a cookie before verification.
#[derive(Debug)]
pub(crate) struct Decoded {
    id: String,
    authority: String,
    key_id: Option<String>,
    algorithm: Option<String>,
    created_at: DateTime<Utc>,
    expired_at: DateTime<Utc>,
    not_before: Option<DateTime<Utc>>,
    signed: Map<String, Value>,
    insecure: Map<String, Value>,
    signature: Vec<u8>,
    seal: Option<String>,
}

/// A session token.
#[derive(Clone)]
pub struct Session {
    directory: Arc<dyn Directory>,
    version: Version,
    id: Option<String>,
    authority: Option<String>,
    created_at: DateTime<Utc>,
    expired_at: DateTime<Utc>,
    signed: Map<String, Value>,
    insecure: Map<String, Value>,
    signature: Option<Vec<u8>>,
    /// V4 only: `header.payload.signature` as last signed.
    seal: Option<String>,
    cookie: Option<String>,
    dirty_secure: bool,
    dirty_insecure: bool,
    dirty_timestamps: bool,
    new_record: bool,
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub(crate) fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

impl Session {
    /// Load `cookie` when present and non-empty, otherwise create a session in
    /// the configured version.
    pub fn new(directory: Arc<dyn Directory>, cookie: Option<&str>) -> Result<Self, SessionError> {
        match cookie {
            Some(cookie) if !cookie.is_empty() => Self::load(directory, cookie),
            _ => {
                let version = match directory.configuration().settings().cookie.version {
                    Some(number) => Version::try_from(number)?,
                    None => Version::LATEST,
                };
                Self::create(directory, version)
            }
        }
    }

    /// A fresh session signed by the local authority, or the invalid
    /// placeholder when this node has no private key.
    pub fn create(directory: Arc<dyn Directory>, version: Version) -> Result<Self, SessionError> {
        let now = now();
        let authority = directory.local_authority_name().map(str::to_string);
        let mut session = Session {
            directory,
            version,
            id: None,
            authority: None,
            created_at: now,
            expired_at: now,
            signed: Map::new(),
            insecure: Map::new(),
            signature: None,
            seal: None,
            cookie: None,
            dirty_secure: false,
            dirty_insecure: false,
            dirty_timestamps: false,
            new_record: true,
        };

        if authority.is_some() {
            session.id = Some(uuid::Uuid::new_v4().to_string());
            session.authority = authority;
            session.renew(None)?;
        }
        Ok(session)
    }

    /// Decode and verify a serialized session.
    pub fn load(directory: Arc<dyn Directory>, cookie: &str) -> Result<Self, SessionError> {
        let version = Version::detect(cookie);
        let decoded = version.decode(cookie)?;
        let now = now();

        if let Some(not_before) = decoded.not_before {
            if not_before > now {
                return Err(SessionError::PrematureSession { not_before });
            }
        }

        let authority = if directory.trusted_authority(&decoded.authority) {
            decoded.authority.clone()
        } else {
            match &decoded.key_id {
                Some(kid) if directory.trusted_authority(kid) => kid.clone(),
                _ => {
                    return Err(SessionError::InvalidSignature(format!(
                        "global sessions signed by '{}' are not trusted",
                        decoded.authority
                    )));
                }
            }
        };

        let key = directory.public_key(&authority).ok_or_else(|| {
            SessionError::InvalidSignature(format!("no public key for authority '{authority}'"))
        })?;
        version.verify(&decoded, key)?;

        if decoded.expired_at <= now {
            return Err(SessionError::ExpiredSession {
                expired_at: decoded.expired_at,
            });
        }
        if !directory.valid_session(&decoded.id, decoded.expired_at) {
            return Err(SessionError::InvalidSession);
        }

        Ok(Session {
            directory,
            version,
            id: Some(decoded.id),
            authority: Some(authority),
            created_at: decoded.created_at,
            expired_at: decoded.expired_at,
            signed: decoded.signed,
            insecure: decoded.insecure,
            signature: Some(decoded.signature),
            seal: decoded.seal,
            cookie: Some(cookie.to_string()),
            dirty_secure: false,
            dirty_insecure: false,
            dirty_timestamps: false,
            new_record: false,
        })
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// `None` for the invalid placeholder.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expired_at(&self) -> DateTime<Utc> {
        self.expired_at
    }

    pub fn signed(&self) -> &Map<String, Value> {
        &self.signed
    }

    pub fn insecure(&self) -> &Map<String, Value> {
        &self.insecure
    }

    /// True until the session has been serialized once.
    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    /// Not expired, not revoked, not a placeholder.
    pub fn is_valid(&self) -> bool {
        match &self.id {
            Some(id) => self.directory.valid_session(id, self.expired_at),
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.new_record || self.dirty_secure || self.dirty_insecure || self.dirty_timestamps
    }

    /// Signed attributes first, then insecure ones.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.signed.get(key).or_else(|| self.insecure.get(key))
    }

    /// Set an attribute. Signed attributes require a local authority.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SessionError> {
        if !self.is_valid() {
            return Err(SessionError::InvalidSession);
        }
        let value = serde_json::to_value(value)
            .map_err(|e| SessionError::UnserializableType(e.to_string()))?;

        let schema = self.directory.schema();
        if schema.is_signed(key) {
            self.authority_check()?;
            self.signed.insert(key.to_string(), value);
            self.dirty_secure = true;
        } else if schema.is_insecure(key) {
            self.insecure.insert(key.to_string(), value);
            self.dirty_insecure = true;
        } else {
            return Err(SessionError::UnknownAttribute(key.to_string()));
        }
        Ok(())
    }

    /// Remove an attribute, returning its previous value.
    pub fn delete(&mut self, key: &str) -> Result<Option<Value>, SessionError> {
        if !self.is_valid() {
            return Err(SessionError::InvalidSession);
        }

        let schema = self.directory.schema();
        if schema.is_signed(key) {
            self.authority_check()?;
            let removed = self.signed.remove(key);
            self.dirty_secure |= removed.is_some();
            Ok(removed)
        } else if schema.is_insecure(key) {
            let removed = self.insecure.remove(key);
            self.dirty_insecure |= removed.is_some();
            Ok(removed)
        } else {
            Err(SessionError::UnknownAttribute(key.to_string()))
        }
    }

    /// Restart the session clock. Defaults to `timeout` minutes from now.
    pub fn renew(&mut self, expired_at: Option<DateTime<Utc>>) -> Result<(), SessionError> {
        self.authority_check()?;
        let now = now();
        self.expired_at = match expired_at {
            Some(at) => at.trunc_subsecs(0),
            None => {
                let timeout = self.directory.configuration().settings().timeout;
                i64::try_from(timeout)
                    .ok()
                    .and_then(Duration::try_minutes)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        SessionError::config(format!("timeout of {timeout} minutes is out of range"))
                    })?
            }
        };
        self.created_at = now;
        self.dirty_timestamps = true;
        Ok(())
    }

    /// Report this session as revoked. The session itself stays readable.
    pub fn invalidate(&self) {
        if let Some(id) = &self.id {
            self.directory.report_invalid_session(id, self.expired_at);
        }
    }

    /// Serialize, re-signing only when secure state changed.
    pub fn to_cookie(&mut self) -> Result<String, SessionError> {
        if let Some(cookie) = &self.cookie {
            if !self.is_dirty() {
                return Ok(cookie.clone());
            }
        }

        let Some(id) = self.id.clone() else {
            return Err(match self.directory.local_authority_name() {
                None => SessionError::NoAuthority,
                Some(_) => SessionError::InvalidSession,
            });
        };

        if self.signature.is_none() || self.dirty_secure || self.dirty_timestamps {
            let directory = Arc::clone(&self.directory);
            let authority = directory.local_authority_name().ok_or(SessionError::NoAuthority)?;
            let key = directory.private_key().ok_or(SessionError::NoAuthority)?;
            // The signers read the authority; keep the old one if signing fails.
            let previous = self.authority.replace(authority.to_string());
            let signed = match self.version {
                Version::V1 => v1::sign(self, key).map(|signature| (signature, None)),
                Version::V2 => v2::sign(self, key).map(|signature| (signature, None)),
                Version::V3 => v3::sign(self, key).map(|signature| (signature, None)),
                Version::V4 => v4::sign(self, key).map(|(signature, seal)| (signature, Some(seal))),
            };
            let (signature, seal) = match signed {
                Ok(signed) => signed,
                Err(e) => {
                    self.authority = previous;
                    return Err(e);
                }
            };
            self.signature = Some(signature);
            if seal.is_some() {
                self.seal = seal;
            }
            debug!(session_id = %id, version = %self.version, authority, "Session signed");
        }

        let cookie = match self.version {
            Version::V1 => v1::encode(self)?,
            Version::V2 => v2::encode(self)?,
            Version::V3 => v3::encode(self)?,
            Version::V4 => v4::encode(self)?,
        };

        self.cookie = Some(cookie.clone());
        self.dirty_secure = false;
        self.dirty_insecure = false;
        self.dirty_timestamps = false;
        self.new_record = false;
        Ok(cookie)
    }

    /// Attribute names, signed first.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.signed.keys().chain(self.insecure.keys())
    }

    /// Attribute pairs, signed first.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.signed.iter().chain(self.insecure.iter())
    }

    /// Metadata plus both attribute maps.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "metadata": {
                "id": self.id,
                "authority": self.authority,
                "created_at": self.created_at,
                "expired_at": self.expired_at,
            },
            "signed": self.signed,
            "insecure": self.insecure,
        })
    }

    /// Hex SHA-1 of the cached signature.
    pub fn signature_digest(&self) -> Option<String> {
        self.signature.as_deref().map(sha1_hex)
    }

    fn authority_check(&self) -> Result<(), SessionError> {
        match self.directory.local_authority_name() {
            Some(_) => Ok(()),
            None => Err(SessionError::NoAuthority),
        }
    }

    fn id_str(&self) -> Result<&str, SessionError> {
        self.id.as_deref().ok_or(SessionError::InvalidSession)
    }

    fn authority_str(&self) -> Result<&str, SessionError> {
        self.authority.as_deref().ok_or(SessionError::NoAuthority)
    }

    fn signature_bytes(&self) -> Result<&[u8], SessionError> {
        self.signature.as_deref().ok_or(SessionError::NoAuthority)
    }
}

/// `session["user"]`; missing attributes read as `null`.
impl std::ops::Index<&str> for Session {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.get(key).unwrap_or(&NULL)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session {}({})", self.version, self.id.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryExt, KeystoreDirectory};
    use crate::keys::{create_keypair, KeyAlgorithm};
    use crate::keystore::Keystore;
    use roam_core::Configuration;

    fn directory(authority: bool, version: Option<u8>) -> Arc<dyn Directory> {
        let mut yaml = String::from(
            "attributes:\n  signed: [user]\n  insecure: [favorite_color]\ntimeout: 60\n",
        );
        if let Some(v) = version {
            yaml.push_str(&format!("cookie:\n  version: {v}\n"));
        }
        let configuration = Arc::new(Configuration::from_yaml_str(&yaml, "test").unwrap());
        let key = create_keypair(&KeyAlgorithm::Ec { curve: "P-256".into() }).unwrap();
        let mut keystore = Keystore::default();
        keystore.add_public_key("authority1", key.public_key()).unwrap();
        if authority {
            keystore.set_private_key("authority1", key).unwrap();
        }
        KeystoreDirectory::with_keystore(configuration, keystore).into_shared()
    }

    #[test]
    fn test_failed_signing_keeps_authority() {
        let yaml = "attributes:\n  signed: [user]\ntimeout: 60\ncookie:\n  version: 1\n";
        let configuration = Arc::new(Configuration::from_yaml_str(yaml, "test").unwrap());
        let rsa = create_keypair(&KeyAlgorithm::Rsa { bits: 1024 }).unwrap();
        let rsa_public = rsa.public_key();
        let ec = create_keypair(&KeyAlgorithm::Ec { curve: "P-256".into() }).unwrap();

        let mut issuer_keys = Keystore::default();
        issuer_keys.add_public_key("authority2", rsa_public.clone()).unwrap();
        issuer_keys.set_private_key("authority2", rsa).unwrap();
        let issuer = KeystoreDirectory::with_keystore(configuration.clone(), issuer_keys).into_shared();
        let mut session = issuer.create_session().unwrap();
        session.set("user", "alice").unwrap();
        let cookie = session.to_cookie().unwrap();

        // V1 needs RSA, so this node cannot re-sign.
        let mut node_keys = Keystore::default();
        node_keys.add_public_key("authority2", rsa_public).unwrap();
        node_keys.add_public_key("authority1", ec.public_key()).unwrap();
        node_keys.set_private_key("authority1", ec).unwrap();
        let node = KeystoreDirectory::with_keystore(configuration, node_keys).into_shared();

        let mut loaded = node.load_session(&cookie).unwrap();
        loaded.set("user", "bob").unwrap();
        assert!(loaded.to_cookie().is_err());
        assert_eq!(loaded.authority(), Some("authority2"));
    }

    #[test]
    fn test_detect_version_from_prefix() {
        assert_eq!(Version::detect("eyJ0eXAi"), Version::V4);
        assert_eq!(Version::detect("WzMsIm"), Version::V3);
        assert_eq!(Version::detect("l9kAJD"), Version::V2);
        assert_eq!(Version::detect("eNqrVg"), Version::V1);
        assert_eq!(Version::detect(""), Version::V1);
        assert_eq!(Version::detect("{garbage"), Version::V1);
    }

    #[test]
    fn test_version_numbers() {
        assert_eq!(Version::try_from(3).unwrap(), Version::V3);
        assert!(matches!(Version::try_from(5), Err(SessionError::Configuration(_))));
        assert_eq!(Version::V2.to_string(), "V2");
    }

    #[test]
    fn test_create_uses_configured_version() {
        let session = directory(true, Some(2)).create_session().unwrap();
        assert_eq!(session.version(), Version::V2);
        let session = directory(true, None).create_session().unwrap();
        assert_eq!(session.version(), Version::LATEST);
        assert!(directory(true, Some(9)).create_session().is_err());
    }

    #[test]
    fn test_new_session_state() {
        let session = Session::new(directory(true, None), None).unwrap();
        assert!(session.is_new_record());
        assert!(session.is_valid());
        assert!(session.is_dirty());
        assert_eq!(session.authority(), Some("authority1"));
        assert_eq!(
            session.expired_at() - session.created_at(),
            Duration::minutes(60)
        );
        assert_eq!(format!("{session:?}"), format!("Session V4({})", session.id().unwrap()));
    }

    #[test]
    fn test_placeholder_without_authority() {
        let mut session = Session::new(directory(false, None), Some("")).unwrap();
        assert!(session.id().is_none());
        assert!(!session.is_valid());
        assert_eq!(session.created_at(), session.expired_at());
        assert!(matches!(
            session.set("favorite_color", "red"),
            Err(SessionError::InvalidSession)
        ));
        assert!(matches!(session.to_cookie(), Err(SessionError::NoAuthority)));
        assert!(matches!(session.renew(None), Err(SessionError::NoAuthority)));
    }

    #[test]
    fn test_schema_routing() {
        let mut session = directory(true, None).create_session().unwrap();
        session.set("user", "alice").unwrap();
        session.set("favorite_color", "red").unwrap();
        assert_eq!(session.get("user"), Some(&Value::from("alice")));
        assert_eq!(session.signed().len(), 1);
        assert_eq!(session.insecure().len(), 1);
        assert_eq!(session.keys().cloned().collect::<Vec<_>>(), vec!["user", "favorite_color"]);

        let err = session.set("shoe_size", 9).unwrap_err();
        assert!(matches!(err, SessionError::UnknownAttribute(ref k) if k == "shoe_size"));
        assert!(session.delete("shoe_size").is_err());
    }

    #[test]
    fn test_delete_marks_dirty_only_when_present() {
        let d = directory(true, Some(3));
        let mut session = d.create_session().unwrap();
        session.set("favorite_color", "red").unwrap();
        let cookie = session.to_cookie().unwrap();
        let mut session = d.load_session(&cookie).unwrap();

        assert_eq!(session.delete("user").unwrap(), None);
        assert!(!session.is_dirty());
        assert_eq!(session.delete("favorite_color").unwrap(), Some(Value::from("red")));
        assert!(session.is_dirty());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut original = directory(true, None).create_session().unwrap();
        original.set("user", "alice").unwrap();
        let mut copy = original.clone();
        copy.set("user", "bob").unwrap();
        assert_eq!(original.get("user"), Some(&Value::from("alice")));
        assert_eq!(copy.get("user"), Some(&Value::from("bob")));
    }

    #[test]
    fn test_snapshot_and_signature_digest() {
        let mut session = directory(true, Some(3)).create_session().unwrap();
        assert!(session.signature_digest().is_none());
        session.set("user", "alice").unwrap();
        session.to_cookie().unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot["signed"]["user"], "alice");
        assert_eq!(snapshot["metadata"]["authority"], "authority1");
        assert_eq!(session.signature_digest().unwrap().len(), 40);
    }

    #[test]
    fn test_renew_with_explicit_expiry() {
        let mut session = directory(true, None).create_session().unwrap();
        let at = Utc::now() + Duration::minutes(5);
        session.renew(Some(at)).unwrap();
        assert_eq!(session.expired_at(), at.trunc_subsecs(0));
    }

    #[test]
    fn test_invalidate_revokes() {
        let d = directory(true, None);
        let mut session = d.create_session().unwrap();
        let cookie = session.to_cookie().unwrap();
        session.invalidate();
        assert!(!session.is_valid());
        assert_eq!(session.get("user"), None);
        assert!(matches!(d.load_session(&cookie), Err(SessionError::InvalidSession)));
    }

    #[test]
    fn test_unserializable_value() {
        let mut session = directory(true, None).create_session().unwrap();
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 2u8);
        assert!(matches!(
            session.set("user", map),
            Err(SessionError::UnserializableType(_))
        ));
    }
}
