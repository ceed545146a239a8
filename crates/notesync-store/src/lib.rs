//! Client-side content-addressed store for note files on a
//! CouchDB-compatible server.
//!
//! Files are split into deduplicable chunks (leaf documents addressed by
//! content hash) plus one metadata entry per path holding the ordered chunk
//! list. Optionally both chunk payloads and paths are encrypted end-to-end.
//! Remote changes arrive through the server's `_changes` feed, either as a
//! continuous stream or in catch-up pages.

pub mod cache;
pub mod chunker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ids;
pub mod remote;
pub mod store;
pub mod types;
pub mod watch;

pub use config::StoreConfig;
pub use error::{ConfigError, CryptoError, IntegrityError, RemoteError, StoreError};
pub use store::NoteStore;
pub use types::{
    DocumentId, EntryDoc, FilePath, LeafEntry, LoadedEntry, NoteEntry, NoteInfo, NoteKind, Seq,
};
pub use watch::{WatchHandle, WatchState};
