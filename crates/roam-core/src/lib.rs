//! # roam-core
//!
//! Configuration shared by the roam crates.
//!
//! roam nodes cooperate through a single signed session token. Every node reads the
//! same configuration document, which decides:
//!
//! | Setting | Meaning |
//! |---------|---------|
//! | `attributes.signed` | Attributes only an authority may write |
//! | `attributes.insecure` | Attributes any node may write |
//! | `cookie.*` | Cookie name, domain and forced wire version |
//! | `timeout` / `renew` | Session lifetime and renewal window (minutes) |
//! | `trust` | Explicit allow-list of authorities |
//! | `keystore.*` | Where public and private keys live |
//! | `directory` | Which trust directory implementation to build |

pub mod config;
pub mod error;

pub use config::{
    AttributesConfig, Configuration, CookieConfig, DirectoryConfig, KeystoreConfig, Settings,
    COMMON_SECTION,
};
pub use error::ConfigError;
