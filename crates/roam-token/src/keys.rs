//! Authority key material.
//!
//! Keys are PEM files on disk. RSA, ECDSA (P-256, P-384, P-521) and DSA keys are
//! supported; which signing primitive is used depends on the token version.

use crate::error::SessionError;
use rand_core::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use signature::{DigestSigner, DigestVerifier, SignatureEncoding, Signer, Verifier};
use std::fmt;
use std::path::{Path, PathBuf};

/// How a SHA-1 signature is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    /// RSA private-encrypt of the bare digest (no DigestInfo).
    Raw,
    /// Standard signature over the message.
    Envelope,
}

/// A private key; this node's signing identity.
pub enum PrivateKey {
    Rsa(RsaPrivateKey),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::SecretKey),
    Dsa(dsa::SigningKey),
}

/// A public key of a known authority.
#[derive(Clone)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::PublicKey),
    Dsa(dsa::VerifyingKey),
}

/// Key generation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa { bits: usize },
    Dsa { bits: usize },
    Ec { curve: String },
}

impl KeyAlgorithm {
    /// Parse an algorithm name (`rsa`, `dsa`, `ec`) and its parameter
    /// (bit length or curve name).
    pub fn from_parts(algorithm: &str, parameter: &str) -> Result<Self, SessionError> {
        let bits = || {
            parameter
                .parse::<usize>()
                .map_err(|_| SessionError::config(format!("invalid key size '{parameter}'")))
        };
        match algorithm.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyAlgorithm::Rsa { bits: bits()? }),
            "dsa" => Ok(KeyAlgorithm::Dsa { bits: bits()? }),
            "ec" | "ecdsa" => Ok(KeyAlgorithm::Ec {
                curve: parameter.to_string(),
            }),
            other => Err(SessionError::config(format!("unknown key algorithm '{other}'"))),
        }
    }
}

fn pem_label(pem: &str) -> Option<&str> {
    pem.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("-----BEGIN "))
        .and_then(|rest| rest.strip_suffix("-----"))
}

/// Whether a PEM document holds a private key.
pub fn is_private_pem(pem: &str) -> bool {
    pem_label(pem).is_some_and(|label| label.ends_with("PRIVATE KEY"))
}

fn invalid_key(kind: &str, e: impl fmt::Display) -> SessionError {
    SessionError::config(format!("failed to parse {kind}: {e}"))
}

fn mismatch() -> SessionError {
    SessionError::InvalidSignature("signature mismatch; tampering suspected".to_string())
}

fn sign_failed(e: impl fmt::Display) -> SessionError {
    SessionError::Internal(anyhow::anyhow!("signing failed: {e}"))
}

/// SHA-1 is shorter than half of a P-384 or P-521 scalar; left-pad it so
/// the prehash is accepted while keeping its integer value.
fn widen<const N: usize>(digest: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out[N - digest.len()..].copy_from_slice(digest);
    out
}

fn p521_signer(secret: &p521::SecretKey) -> Result<p521::ecdsa::SigningKey, SessionError> {
    p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes()).map_err(sign_failed)
}

fn p521_verifier(key: &p521::PublicKey) -> Result<p521::ecdsa::VerifyingKey, SessionError> {
    p521::ecdsa::VerifyingKey::from_affine(*key.as_affine()).map_err(|_| mismatch())
}

impl PrivateKey {
    /// Parse a PEM-encoded private key.
    pub fn from_pem(pem: &str) -> Result<Self, SessionError> {
        match pem_label(pem) {
            Some("RSA PRIVATE KEY") => RsaPrivateKey::from_pkcs1_pem(pem)
                .map(PrivateKey::Rsa)
                .map_err(|e| invalid_key("RSA private key", e)),
            Some("EC PRIVATE KEY") => {
                if let Ok(secret) = p256::SecretKey::from_sec1_pem(pem) {
                    return Ok(PrivateKey::P256(secret.into()));
                }
                if let Ok(secret) = p384::SecretKey::from_sec1_pem(pem) {
                    return Ok(PrivateKey::P384(secret.into()));
                }
                p521::SecretKey::from_sec1_pem(pem)
                    .map(PrivateKey::P521)
                    .map_err(|e| invalid_key("EC private key", e))
            }
            Some("PRIVATE KEY") => {
                if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::Rsa(key));
                }
                if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::P256(key));
                }
                if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::P384(key));
                }
                if let Ok(key) = p521::SecretKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::P521(key));
                }
                dsa::SigningKey::from_pkcs8_pem(pem)
                    .map(PrivateKey::Dsa)
                    .map_err(|e| invalid_key("private key", e))
            }
            Some(label) => Err(SessionError::config(format!(
                "unsupported PEM label '{label}' for a private key"
            ))),
            None => Err(SessionError::config("not a PEM document")),
        }
    }

    /// Load a private key from a PEM file.
    pub fn load_from_file(path: &Path) -> Result<Self, SessionError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// PKCS#8 PEM encoding.
    pub fn to_pem(&self) -> Result<String, SessionError> {
        let pem = match self {
            PrivateKey::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateKey::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateKey::P384(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateKey::P521(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateKey::Dsa(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("failed to encode private key: {e}")))?;
        Ok(pem.as_str().to_owned())
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            PrivateKey::P256(key) => PublicKey::P256(p256::ecdsa::VerifyingKey::from(key)),
            PrivateKey::P384(key) => PublicKey::P384(p384::ecdsa::VerifyingKey::from(key)),
            PrivateKey::P521(key) => PublicKey::P521(key.public_key()),
            PrivateKey::Dsa(key) => PublicKey::Dsa(key.verifying_key().clone()),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            PrivateKey::Rsa(_) => "RSA",
            PrivateKey::P256(_) => "EC P-256",
            PrivateKey::P384(_) => "EC P-384",
            PrivateKey::P521(_) => "EC P-521",
            PrivateKey::Dsa(_) => "DSA",
        }
    }

    /// RSA private-encrypt with PKCS#1 v1.5 type 1 padding.
    pub fn private_encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        match self {
            PrivateKey::Rsa(key) => key
                .sign(Pkcs1v15Sign::new_unprefixed(), data)
                .map_err(sign_failed),
            other => Err(SessionError::config(format!(
                "raw private-encrypt requires an RSA key, not {}",
                other.algorithm()
            ))),
        }
    }

    /// Sign `message` using SHA-1 as the digest.
    pub fn sign_sha1(&self, message: &[u8], mode: SignatureMode) -> Result<Vec<u8>, SessionError> {
        let digest = Sha1::digest(message);
        match self {
            PrivateKey::Rsa(key) => match mode {
                SignatureMode::Raw => self.private_encrypt(&digest),
                SignatureMode::Envelope => key
                    .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
                    .map_err(sign_failed),
            },
            PrivateKey::P256(key) => {
                let sig: p256::ecdsa::Signature =
                    key.sign_prehash(&widen::<32>(&digest)).map_err(sign_failed)?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            PrivateKey::P384(key) => {
                let sig: p384::ecdsa::Signature =
                    key.sign_prehash(&widen::<32>(&digest)).map_err(sign_failed)?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            PrivateKey::P521(key) => {
                let sig: p521::ecdsa::Signature = p521_signer(key)?
                    .sign_prehash(&widen::<66>(&digest))
                    .map_err(sign_failed)?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            PrivateKey::Dsa(key) => {
                let sig: dsa::Signature = key
                    .try_sign_digest(Sha1::new_with_prefix(message))
                    .map_err(sign_failed)?;
                Ok(sig.to_bytes().into_vec())
            }
        }
    }

    /// JWS algorithm name implied by the key type.
    pub fn jwt_algorithm(&self) -> Result<&'static str, SessionError> {
        self.public_key().jwt_algorithm()
    }

    /// JWS signature over `message`.
    pub fn sign_jwt(&self, message: &[u8]) -> Result<Vec<u8>, SessionError> {
        match self {
            PrivateKey::Rsa(key) => key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message))
                .map_err(sign_failed),
            PrivateKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key.try_sign(message).map_err(sign_failed)?;
                Ok(sig.to_bytes().to_vec())
            }
            PrivateKey::P384(key) => {
                let sig: p384::ecdsa::Signature = key.try_sign(message).map_err(sign_failed)?;
                Ok(sig.to_bytes().to_vec())
            }
            PrivateKey::P521(key) => {
                let sig: p521::ecdsa::Signature =
                    p521_signer(key)?.try_sign(message).map_err(sign_failed)?;
                Ok(sig.to_bytes().to_vec())
            }
            PrivateKey::Dsa(_) => Err(SessionError::config("DSA keys cannot sign JWTs")),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.algorithm())
    }
}

impl PublicKey {
    /// Parse a PEM-encoded public key. A private key PEM yields its public half.
    pub fn from_pem(pem: &str) -> Result<Self, SessionError> {
        match pem_label(pem) {
            Some("RSA PUBLIC KEY") => RsaPublicKey::from_pkcs1_pem(pem)
                .map(PublicKey::Rsa)
                .map_err(|e| invalid_key("RSA public key", e)),
            Some("PUBLIC KEY") => {
                if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::Rsa(key));
                }
                if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::P256(key));
                }
                if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::P384(key));
                }
                if let Ok(key) = p521::PublicKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::P521(key));
                }
                dsa::VerifyingKey::from_public_key_pem(pem)
                    .map(PublicKey::Dsa)
                    .map_err(|e| invalid_key("public key", e))
            }
            Some(_) if is_private_pem(pem) => PrivateKey::from_pem(pem).map(|k| k.public_key()),
            Some(label) => Err(SessionError::config(format!(
                "unsupported PEM label '{label}' for a public key"
            ))),
            None => Err(SessionError::config("not a PEM document")),
        }
    }

    /// Load a public key from a PEM file.
    pub fn load_from_file(path: &Path) -> Result<Self, SessionError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// SubjectPublicKeyInfo PEM encoding.
    pub fn to_pem(&self) -> Result<String, SessionError> {
        match self {
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P256(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P384(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P521(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::Dsa(key) => key.to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("failed to encode public key: {e}")))
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            PublicKey::Rsa(_) => "RSA",
            PublicKey::P256(_) => "EC P-256",
            PublicKey::P384(_) => "EC P-384",
            PublicKey::P521(_) => "EC P-521",
            PublicKey::Dsa(_) => "DSA",
        }
    }

    /// Check a raw RSA private-encrypt result against the expected plaintext.
    pub fn verify_private_encrypt(&self, signature: &[u8], expected: &[u8]) -> Result<(), SessionError> {
        match self {
            PublicKey::Rsa(key) => key
                .verify(Pkcs1v15Sign::new_unprefixed(), expected, signature)
                .map_err(|_| mismatch()),
            other => Err(SessionError::InvalidSignature(format!(
                "cannot verify a raw RSA signature with a {} key",
                other.algorithm()
            ))),
        }
    }

    /// Verify a SHA-1 signature produced by [`PrivateKey::sign_sha1`].
    pub fn verify_sha1(&self, message: &[u8], signature: &[u8], mode: SignatureMode) -> Result<(), SessionError> {
        let digest = Sha1::digest(message);
        match self {
            PublicKey::Rsa(key) => {
                let scheme = match mode {
                    SignatureMode::Raw => Pkcs1v15Sign::new_unprefixed(),
                    SignatureMode::Envelope => Pkcs1v15Sign::new::<Sha1>(),
                };
                key.verify(scheme, &digest, signature).map_err(|_| mismatch())
            }
            PublicKey::P256(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature).map_err(|_| mismatch())?;
                key.verify_prehash(&widen::<32>(&digest), &sig).map_err(|_| mismatch())
            }
            PublicKey::P384(key) => {
                let sig = p384::ecdsa::Signature::from_der(signature).map_err(|_| mismatch())?;
                key.verify_prehash(&widen::<32>(&digest), &sig).map_err(|_| mismatch())
            }
            PublicKey::P521(key) => {
                let sig = p521::ecdsa::Signature::from_der(signature).map_err(|_| mismatch())?;
                p521_verifier(key)?
                    .verify_prehash(&widen::<66>(&digest), &sig)
                    .map_err(|_| mismatch())
            }
            PublicKey::Dsa(key) => {
                let sig = dsa::Signature::try_from(signature).map_err(|_| mismatch())?;
                key.verify_digest(Sha1::new_with_prefix(message), &sig)
                    .map_err(|_| mismatch())
            }
        }
    }

    pub fn jwt_algorithm(&self) -> Result<&'static str, SessionError> {
        match self {
            PublicKey::Rsa(_) => Ok("RS256"),
            PublicKey::P256(_) => Ok("ES256"),
            PublicKey::P384(_) => Ok("ES384"),
            PublicKey::P521(_) => Ok("ES512"),
            PublicKey::Dsa(_) => Err(SessionError::config("DSA keys cannot verify JWTs")),
        }
    }

    /// Verify a JWS signature; `algorithm` must match the key type.
    pub fn verify_jwt(&self, algorithm: &str, message: &[u8], signature: &[u8]) -> Result<(), SessionError> {
        let expected = self
            .jwt_algorithm()
            .map_err(|e| SessionError::InvalidSignature(e.to_string()))?;
        if !expected.eq_ignore_ascii_case(algorithm) {
            return Err(SessionError::InvalidSignature(format!(
                "JWT algorithm {algorithm} does not match {} key",
                self.algorithm()
            )));
        }
        match self {
            PublicKey::Rsa(key) => key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message), signature)
                .map_err(|_| mismatch()),
            PublicKey::P256(key) => {
                let sig = p256::ecdsa::Signature::from_slice(signature).map_err(|_| mismatch())?;
                key.verify(message, &sig).map_err(|_| mismatch())
            }
            PublicKey::P384(key) => {
                let sig = p384::ecdsa::Signature::from_slice(signature).map_err(|_| mismatch())?;
                key.verify(message, &sig).map_err(|_| mismatch())
            }
            PublicKey::P521(key) => {
                let sig = p521::ecdsa::Signature::from_slice(signature).map_err(|_| mismatch())?;
                p521_verifier(key)?.verify(message, &sig).map_err(|_| mismatch())
            }
            PublicKey::Dsa(_) => Err(mismatch()),
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.algorithm())
    }
}

/// Generate a new authority keypair.
pub fn create_keypair(algorithm: &KeyAlgorithm) -> Result<PrivateKey, SessionError> {
    match algorithm {
        KeyAlgorithm::Rsa { bits } => RsaPrivateKey::new(&mut OsRng, *bits)
            .map(PrivateKey::Rsa)
            .map_err(|e| SessionError::config(format!("cannot generate {bits}-bit RSA key: {e}"))),
        KeyAlgorithm::Dsa { bits } => {
            #[allow(deprecated)]
            let size = match bits {
                1024 => dsa::KeySize::DSA_1024_160,
                2048 => dsa::KeySize::DSA_2048_256,
                3072 => dsa::KeySize::DSA_3072_256,
                other => {
                    return Err(SessionError::config(format!("unsupported DSA key size {other}")));
                }
            };
            let components = dsa::Components::generate(&mut OsRng, size);
            Ok(PrivateKey::Dsa(dsa::SigningKey::generate(&mut OsRng, components)))
        }
        KeyAlgorithm::Ec { curve } => match curve.as_str() {
            "prime256v1" | "secp256r1" | "P-256" => {
                Ok(PrivateKey::P256(p256::ecdsa::SigningKey::random(&mut OsRng)))
            }
            "secp384r1" | "P-384" => Ok(PrivateKey::P384(p384::ecdsa::SigningKey::random(&mut OsRng))),
            "secp521r1" | "P-521" => Ok(PrivateKey::P521(p521::SecretKey::random(&mut OsRng))),
            other => Err(SessionError::config(format!("unsupported EC curve '{other}'"))),
        },
    }
}

/// Write `<name>.key` and `<name>.pub` into `dir`. Returns both paths.
pub fn write_keypair(dir: &Path, name: &str, key: &PrivateKey) -> Result<(PathBuf, PathBuf), SessionError> {
    let private_path = dir.join(format!("{name}.key"));
    let public_path = dir.join(format!("{name}.pub"));
    std::fs::write(&private_path, key.to_pem()?)?;
    std::fs::write(&public_path, key.public_key().to_pem()?)?;
    Ok((private_path, public_path))
}
