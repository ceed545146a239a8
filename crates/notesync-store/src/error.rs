//! Error types for the store.
//!
//! Each layer owns its error enum; this module re-exports them and defines
//! the aggregate [`StoreError`] that store operations surface.

pub use crate::config::ConfigError;
pub use crate::crypto::CryptoError;
pub use crate::remote::RemoteError;

use thiserror::Error;

use crate::types::DocumentId;

/// A metadata entry referenced chunk data that the remote cannot produce.
/// Always a hard error for the enclosing read.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("metadata references chunk '{id}' but no such leaf exists")]
    MissingChunk { id: DocumentId },

    #[error("document '{id}' is not a leaf where a leaf was expected")]
    NotALeaf { id: DocumentId },

    #[error("leaf '{id}' carries no data")]
    EmptyLeaf { id: DocumentId },
}

/// Aggregate error surfaced by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A per-document failure inside a bulk upload that was not a benign
    /// content-addressed conflict.
    #[error("write of '{id}' failed: {reason}")]
    Write { id: DocumentId, reason: String },
}

impl StoreError {
    /// Revision mismatch on a metadata put.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Remote(e) if e.is_conflict())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, StoreError::Remote(e) if e.is_auth())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, StoreError::Remote(RemoteError::Aborted))
    }
}
