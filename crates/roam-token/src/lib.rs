//! # roam-token
//!
//! Signed session tokens shared between cooperating web nodes.
//!
//! This crate provides functionality for:
//! - Loading authority keys from PEM files on disk
//! - Deciding which authorities are trusted and which sessions were revoked
//! - Creating, verifying, mutating and serializing session tokens
//!
//! ## Signed vs Insecure Attributes
//!
//! | Kind | Written by | Covered by signature | Changing it costs |
//! |------|------------|----------------------|-------------------|
//! | **Signed** | Authorities only | Yes | A new signature |
//! | **Insecure** | Any node | No | Re-encoding only |
//!
//! ## Wire Versions
//!
//! Four cookie layouts are understood; new sessions use `cookie.version` or V4
//! (a JWT). See [`session`] for the layouts.

pub mod directory;
pub mod encoding;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod session;

pub use directory::{
    DEFAULT_DIRECTORY, Directory, DirectoryExt, DirectoryRegistry, InMemoryRevocationStore,
    KeystoreDirectory, RevocationStore,
};
pub use error::{ErrorClass, SessionError};
pub use keys::{KeyAlgorithm, PrivateKey, PublicKey, create_keypair, write_keypair};
pub use keystore::Keystore;
pub use session::{Schema, Session, Version};
