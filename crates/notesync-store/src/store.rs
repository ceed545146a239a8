//! Store core: content-addressed reads and writes of note files.
//!
//! A write splits the content into pieces, derives a content-addressed id
//! per piece, probes the remote for leaves it already holds, uploads only
//! the missing ones, and finally writes the metadata entry with the prior
//! revision attached. A read walks the same path backwards. The store owns
//! the chunk cache and the change-feed cursor; the adapter owns connection
//! state.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use async_stream::stream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, trace, warn};

use crate::cache::{CacheStats, ChunkCache, DEFAULT_CACHE_BYTES, DEFAULT_CACHE_ENTRIES};
use crate::chunker::{self, ChunkSettings};
use crate::config::{ConfigError, StoreConfig};
use crate::crypto::{self, CryptoError};
use crate::error::{IntegrityError, StoreError};
use crate::ids;
use crate::remote::{AllDocsResponse, CouchClient};
use crate::types::{
    DocumentId, EntryDoc, FilePath, LeafEntry, LoadedEntry, NoteEntry, NoteInfo, NoteKind, Seq,
};

/// Page size for enumeration queries.
const ENUMERATION_PAGE: usize = 100;
/// Concurrent decrypt+assembly tasks per enumeration page.
const ASSEMBLY_CONCURRENCY: usize = 5;

/// Client-side content-addressed store bound to one remote database.
pub struct NoteStore {
    pub(crate) config: StoreConfig,
    pub(crate) remote: CouchClient,
    pub(crate) cache: Mutex<ChunkCache>,
    pub(crate) since: Mutex<Seq>,
}

impl NoteStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let remote = CouchClient::new(&config)?;
        Ok(Self {
            config,
            remote,
            cache: Mutex::new(ChunkCache::new(DEFAULT_CACHE_ENTRIES, DEFAULT_CACHE_BYTES)),
            since: Mutex::new(Seq::zero()),
        })
    }

    /// The underlying adapter, for identity-level access to system entries.
    pub fn remote(&self) -> &CouchClient {
        &self.remote
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Current change-feed cursor. Persisting it across runs is the
    /// caller's job.
    pub fn since(&self) -> Seq {
        self.since.lock().clone()
    }

    pub fn set_since(&self, seq: Seq) {
        *self.since.lock() = seq;
    }

    /// Probe the database info endpoint, surfacing authentication and
    /// connectivity problems before the first real operation.
    pub async fn check_remote(&self) -> Result<(), StoreError> {
        self.remote.db_info().await?;
        Ok(())
    }

    pub(crate) fn dynamic_iterations(&self) -> bool {
        self.config.use_dynamic_iteration_count && !self.config.use_v1
    }

    fn passphrase(&self) -> Option<&SecretString> {
        self.config.passphrase.as_ref()
    }

    fn doc_id(&self, path: &FilePath) -> Result<DocumentId, StoreError> {
        let obfuscate = self
            .config
            .obfuscate_passphrase
            .as_ref()
            .map(ExposeSecret::expose_secret);
        let id = ids::path_to_id(path, obfuscate);
        if id.is_reserved() {
            return Err(ConfigError::ReservedPath(path.to_string()).into());
        }
        Ok(id)
    }

    /// The `path` field as it goes onto the wire.
    fn stored_path(&self, plain: &FilePath) -> Result<FilePath, StoreError> {
        match &self.config.obfuscate_passphrase {
            Some(pass) => Ok(FilePath::new(crypto::encrypt(
                plain.as_str(),
                pass,
                self.dynamic_iterations(),
            )?)),
            None => Ok(plain.clone()),
        }
    }

    /// The logical path recovered from a wire entry.
    pub(crate) fn plain_path(&self, stored: &FilePath) -> Result<FilePath, StoreError> {
        match &self.config.obfuscate_passphrase {
            Some(pass) => Ok(FilePath::new(crypto::decrypt(
                stored.as_str(),
                pass,
                self.dynamic_iterations(),
            )?)),
            None => Ok(stored.clone()),
        }
    }

    /// Read one file. `None` when the path has no metadata entry (documents
    /// of other types do not count as present).
    #[instrument(level = "debug", skip(self), fields(path = %path, meta_only))]
    pub async fn get(
        &self,
        path: &FilePath,
        meta_only: bool,
    ) -> Result<Option<LoadedEntry>, StoreError> {
        let id = self.doc_id(path)?;
        let Some(value) = self.remote.get_doc(&id).await? else {
            return Ok(None);
        };
        let Some((note, kind)) = EntryDoc::from_value(value).and_then(EntryDoc::into_note) else {
            trace!("document exists but is not a note entry");
            return Ok(None);
        };
        Ok(Some(self.get_by_meta(note, kind, meta_only).await?))
    }

    /// Assemble a loaded entry from an already-fetched metadata entry, as
    /// handed out by the change feed or enumeration.
    pub async fn get_by_meta(
        &self,
        note: NoteEntry,
        kind: NoteKind,
        meta_only: bool,
    ) -> Result<LoadedEntry, StoreError> {
        let path = self.plain_path(&note.path)?;
        let data = if meta_only {
            Vec::new()
        } else {
            self.collect_chunks(&note.children).await?
        };
        Ok(LoadedEntry {
            id: note.id,
            rev: note.rev,
            path,
            kind,
            children: note.children,
            data,
            ctime: note.ctime,
            mtime: note.mtime,
            size: note.size,
            deleted: note.deleted,
        })
    }

    /// Resolve chunk ids to plaintexts, in order. Any chunk the remote
    /// cannot produce is a hard integrity error.
    pub(crate) async fn collect_chunks(
        &self,
        children: &[DocumentId],
    ) -> Result<Vec<String>, StoreError> {
        let mut resolved: HashMap<DocumentId, String> = HashMap::new();
        let mut missing: Vec<DocumentId> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for id in children {
                if resolved.contains_key(id) || missing.contains(id) {
                    continue;
                }
                match cache.get(id) {
                    Some(text) => {
                        resolved.insert(id.clone(), text.to_string());
                    }
                    None => missing.push(id.clone()),
                }
            }
        }
        trace!(
            total = children.len(),
            cached = resolved.len(),
            fetching = missing.len(),
            "resolving chunks"
        );

        if !missing.is_empty() {
            let response = self.remote.all_docs_by_keys(&missing, true).await?;
            for row in response.rows {
                let row_id = row
                    .id
                    .clone()
                    .unwrap_or_else(|| DocumentId::new(row.key.clone()));
                let Some(value) = row.doc else {
                    continue; // absent or deleted; caught as MissingChunk below
                };
                let declares_leaf =
                    value.get("type").and_then(serde_json::Value::as_str) == Some("leaf");
                let Some(EntryDoc::Leaf(leaf)) = EntryDoc::from_value(value) else {
                    let err = if declares_leaf {
                        IntegrityError::EmptyLeaf { id: row_id }
                    } else {
                        IntegrityError::NotALeaf { id: row_id }
                    };
                    return Err(err.into());
                };
                let text = if leaf.id.is_encrypted_chunk() {
                    let Some(pass) = self.passphrase() else {
                        return Err(CryptoError::MissingPassphrase.into());
                    };
                    crypto::decrypt(&leaf.data, pass, self.dynamic_iterations())?
                } else {
                    leaf.data
                };
                self.cache.lock().insert(leaf.id.clone(), &text);
                resolved.insert(leaf.id, text);
            }
        }

        let mut out = Vec::with_capacity(children.len());
        for id in children {
            match resolved.get(id) {
                Some(text) => out.push(text.clone()),
                None => return Err(IntegrityError::MissingChunk { id: id.clone() }.into()),
            }
        }
        Ok(out)
    }

    /// Write one file.
    ///
    /// Chunk uploads go out as a single bulk request before the metadata
    /// put; a per-chunk `conflict` means the leaf already exists and is
    /// fine, any other per-chunk error aborts the write. A stale metadata
    /// revision surfaces as a conflict from the adapter.
    #[instrument(level = "debug", skip(self, data, info), fields(path = %path, size = info.size))]
    pub async fn put(
        &self,
        path: &FilePath,
        data: Vec<String>,
        info: NoteInfo,
        kind: NoteKind,
    ) -> Result<(), StoreError> {
        let id = self.doc_id(path)?;
        let settings = ChunkSettings::for_path(&self.config, path);
        let pieces: Vec<String> = chunker::split_pieces(data, settings)?.collect();

        // Derive ids; a reverse-cache hit skips hashing the piece again.
        let mut children = Vec::with_capacity(pieces.len());
        let mut unique: Vec<(DocumentId, String)> = Vec::new();
        {
            let mut cache = self.cache.lock();
            let passphrase = self.passphrase().map(ExposeSecret::expose_secret);
            let mut seen: HashSet<DocumentId> = HashSet::new();
            for piece in &pieces {
                let chunk_id = cache
                    .id_for_text(piece)
                    .unwrap_or_else(|| ids::leaf_id(piece, passphrase));
                if seen.insert(chunk_id.clone()) {
                    unique.push((chunk_id.clone(), piece.clone()));
                }
                children.push(chunk_id);
            }
        }

        // One existence probe over the unique id set.
        let keys: Vec<DocumentId> = unique.iter().map(|(chunk_id, _)| chunk_id.clone()).collect();
        let mut present: HashSet<DocumentId> = HashSet::new();
        if !keys.is_empty() {
            let response = self.remote.all_docs_by_keys(&keys, false).await?;
            for row in response.rows {
                if row.exists()
                    && let Some(row_id) = row.id
                {
                    present.insert(row_id);
                }
            }
        }

        // Upload only what the remote is missing.
        let mut docs = Vec::new();
        for (chunk_id, piece) in &unique {
            if present.contains(chunk_id) {
                continue;
            }
            let payload = match self.passphrase() {
                Some(pass) => crypto::encrypt(piece, pass, self.dynamic_iterations())?,
                None => piece.clone(),
            };
            docs.push(EntryDoc::Leaf(LeafEntry {
                id: chunk_id.clone(),
                rev: None,
                data: payload,
                is_corrupted: false,
            }));
        }
        if !docs.is_empty() {
            let results = self.remote.bulk_docs(&docs).await?;
            for result in results {
                if result.is_benign_conflict() {
                    trace!(id = %result.id, "chunk raced into existence; reusing");
                    continue;
                }
                if let Some(error) = result.error {
                    let reason = match result.reason {
                        Some(reason) => format!("{error}: {reason}"),
                        None => error,
                    };
                    return Err(StoreError::Write {
                        id: result.id,
                        reason,
                    });
                }
            }
        }
        debug!(
            pieces = pieces.len(),
            unique = unique.len(),
            uploaded = docs.len(),
            "chunks settled"
        );
        {
            let mut cache = self.cache.lock();
            for (chunk_id, piece) in &unique {
                cache.insert(chunk_id.clone(), piece);
            }
        }

        // Prior revision, then the metadata entry strictly after the bulk
        // upload acknowledgement.
        let rev = self.remote.get_doc(&id).await?.and_then(|value| {
            value
                .get("_rev")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        });
        let note = NoteEntry {
            id,
            rev,
            path: self.stored_path(path)?,
            children,
            ctime: info.ctime,
            mtime: info.mtime,
            size: info.size,
            deleted: false,
        };
        let doc = match kind {
            NoteKind::NewNote => EntryDoc::NewNote(note),
            NoteKind::Plain => EntryDoc::Plain(note),
        };
        let ack = self.remote.put_doc(&doc).await?;
        debug!(rev = %ack.rev, "metadata entry written");
        Ok(())
    }

    /// Tombstone one file. Idempotent: an absent or already-deleted path is
    /// success.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub async fn delete(&self, path: &FilePath) -> Result<(), StoreError> {
        let id = self.doc_id(path)?;
        let Some(value) = self.remote.get_doc(&id).await? else {
            debug!("path already absent");
            return Ok(());
        };
        let Some((mut note, kind)) = EntryDoc::from_value(value).and_then(EntryDoc::into_note)
        else {
            return Ok(());
        };
        if note.deleted {
            debug!("path already deleted");
            return Ok(());
        }
        // The stored path field is reused as-is, so no re-encryption happens
        // on the delete path.
        note.children.clear();
        note.size = 0;
        note.deleted = true;
        note.mtime = now_ms();
        let doc = match kind {
            NoteKind::NewNote => EntryDoc::NewNote(note),
            NoteKind::Plain => EntryDoc::Plain(note),
        };
        let ack = self.remote.put_doc(&doc).await?;
        debug!(rev = %ack.rev, "tombstone written");
        Ok(())
    }

    /// Lazily enumerate every non-chunk metadata entry.
    ///
    /// Five disjoint key ranges exclude the reserved prefixes; within a
    /// range entries come back in ascending id order, with the next page
    /// requested while the current one is still being consumed. Entries
    /// that fail to decrypt or assemble are logged and skipped.
    pub fn enumerate_all_normal_docs(
        &self,
        meta_only: bool,
    ) -> impl Stream<Item = LoadedEntry> + '_ {
        let remote = self.remote.clone();
        let spawn_fetch = move |startkey: String, endkey: String| {
            let remote = remote.clone();
            tokio::spawn(async move {
                remote
                    .all_docs_range(&startkey, &endkey, ENUMERATION_PAGE, true)
                    .await
            })
        };

        stream! {
            for (start, end) in normal_id_ranges() {
                let mut resume_key: Option<String> = None;
                let mut in_flight = spawn_fetch(start, end.clone());
                loop {
                    let page: AllDocsResponse = match in_flight.await {
                        Ok(Ok(page)) => page,
                        Ok(Err(error)) => {
                            warn!(error = %error, "enumeration page failed; abandoning range");
                            break;
                        }
                        Err(error) => {
                            warn!(error = %error, "enumeration task failed; abandoning range");
                            break;
                        }
                    };

                    // Issue the read-ahead before touching the page content.
                    let next = if page.rows.len() == ENUMERATION_PAGE {
                        page.rows
                            .last()
                            .map(|row| (row.key.clone(), spawn_fetch(row.key.clone(), end.clone())))
                    } else {
                        None
                    };

                    // A resumed page re-reports the row the cursor points at.
                    let rows: Vec<_> = page
                        .rows
                        .into_iter()
                        .filter(|row| resume_key.as_deref() != Some(row.key.as_str()))
                        .collect();

                    let mut assembly = futures::stream::iter(
                        rows.into_iter()
                            .filter_map(|row| row.doc)
                            .filter_map(EntryDoc::from_value)
                            .filter_map(EntryDoc::into_note)
                            .map(|(note, kind)| self.get_by_meta(note, kind, meta_only)),
                    )
                    .buffered(ASSEMBLY_CONCURRENCY);
                    while let Some(result) = assembly.next().await {
                        match result {
                            Ok(entry) => yield entry,
                            Err(error) => {
                                warn!(error = %error, "skipping entry that failed to assemble");
                            }
                        }
                    }

                    match next {
                        Some((key, handle)) => {
                            resume_key = Some(key);
                            in_flight = handle;
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

/// The five key ranges that partition the non-chunk id space, skipping the
/// reserved `h:`, `i:`, `ix:` and `ps:` prefixes.
fn normal_id_ranges() -> [(String, String); 5] {
    const HIGH: char = '\u{10FFFF}';
    [
        (String::new(), "h:".to_owned()),
        (format!("h:{HIGH}"), "i:".to_owned()),
        (format!("i:{HIGH}"), "ix:".to_owned()),
        (format!("ix:{HIGH}"), "ps:".to_owned()),
        (format!("ps:{HIGH}"), HIGH.to_string()),
    ]
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}
