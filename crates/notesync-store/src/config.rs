//! Store configuration.
//!
//! Everything the store needs to talk to one database: connection options,
//! the optional end-to-end encryption passphrases, and the chunking knobs.

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::types::{DEFAULT_MINIMUM_CHUNK_SIZE, MAX_DOC_SIZE_BIN};

/// Errors raised by invalid or missing configuration. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid remote url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("database name must not be empty")]
    EmptyDatabase,

    #[error("invalid chunk sizing: {0}")]
    InvalidChunkSize(String),

    #[error("path '{0}' maps onto a reserved document id")]
    ReservedPath(String),
}

/// Configuration for one remote database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Base URL of the CouchDB-compatible server.
    pub url: String,
    pub username: String,
    pub password: SecretString,
    pub database: String,

    /// When set, chunk payloads (and paths, together with
    /// [`obfuscate_passphrase`](Self::obfuscate_passphrase)) are encrypted
    /// end-to-end.
    #[serde(default)]
    pub passphrase: Option<SecretString>,

    /// When set, document ids are derived from paths by salted hashing so the
    /// id never leaks the path, and the `path` field is stored encrypted.
    #[serde(default)]
    pub obfuscate_passphrase: Option<SecretString>,

    /// Derive the KDF iteration count from the passphrase instead of the
    /// fixed default. Ignored in V1 mode.
    #[serde(default)]
    pub use_dynamic_iteration_count: bool,

    /// Multiplier for the piece size; `0` keeps the baseline.
    #[serde(default)]
    pub custom_chunk_size: u32,

    /// Lower bound for piece bytes.
    #[serde(default = "default_minimum_chunk_size")]
    pub minimum_chunk_size: usize,

    /// Legacy chunking and encryption envelope.
    #[serde(default)]
    pub use_v1: bool,
}

fn default_minimum_chunk_size() -> usize {
    DEFAULT_MINIMUM_CHUNK_SIZE
}

impl StoreConfig {
    /// Validate the configuration. Must pass before the store is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "scheme must be http or https".to_owned(),
            });
        }
        if self.database.is_empty() {
            return Err(ConfigError::EmptyDatabase);
        }
        if self.minimum_chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(
                "minimum chunk size must be positive".to_owned(),
            ));
        }
        if self.minimum_chunk_size >= self.piece_size() {
            return Err(ConfigError::InvalidChunkSize(format!(
                "minimum chunk size {} must be below the piece size {}",
                self.minimum_chunk_size,
                self.piece_size()
            )));
        }
        Ok(())
    }

    /// Upper bound for piece bytes under the current settings.
    ///
    /// `custom_chunk_size` scales the baseline; V1 applied the multiplier ten
    /// times as aggressively.
    pub fn piece_size(&self) -> usize {
        let factor = f64::from(self.custom_chunk_size) * if self.use_v1 { 1.0 } else { 0.1 };
        (MAX_DOC_SIZE_BIN as f64 * (factor + 1.0)).floor() as usize
    }
}
