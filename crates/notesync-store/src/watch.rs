//! Change-feed readers.
//!
//! Two modes share the store's `since` cursor: a continuous long-lived feed
//! driven by an explicit reconnecting state machine, and a paged catch-up
//! that drains the feed until nothing is pending. In both, one failing
//! document is logged and skipped; the stream keeps going.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{AbortHandle, AbortRegistration, Abortable};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::StoreError;
use crate::remote::ChangeRow;
use crate::store::NoteStore;
use crate::types::{EntryDoc, LoadedEntry, Seq};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const FOLLOW_PAGE_LIMIT: usize = 25;

/// Continuous-watch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Connecting,
    Streaming,
    Disconnected,
    Stopped,
}

/// Cancellation handle for a continuous watch.
///
/// [`end_watch`](WatchHandle::end_watch) aborts whatever the watcher is
/// doing right now (connecting, streaming, or waiting out the reconnect
/// delay) and pins it in [`WatchState::Stopped`]; a stopped watcher never
/// reconnects.
#[derive(Clone, Default)]
pub struct WatchHandle {
    inner: Arc<WatchShared>,
}

struct WatchShared {
    stopped: AtomicBool,
    state: Mutex<WatchState>,
    current: Mutex<Option<AbortHandle>>,
}

impl Default for WatchShared {
    fn default() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            state: Mutex::new(WatchState::Idle),
            current: Mutex::new(None),
        }
    }
}

impl WatchHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WatchState {
        *self.inner.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop the watch: no further callbacks, no reconnection.
    pub fn end_watch(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.inner.current.lock().take() {
            handle.abort();
        }
    }

    fn set_state(&self, state: WatchState) {
        *self.inner.state.lock() = state;
    }

    /// Register the next abortable step.
    fn arm(&self) -> AbortRegistration {
        let (handle, registration) = AbortHandle::new_pair();
        *self.inner.current.lock() = Some(handle);
        registration
    }
}

/// Incremental splitter for line-delimited feeds.
///
/// Bytes arrive in arbitrary pieces; complete `\n`-terminated lines come
/// out, the trailing partial line stays buffered for the next push.
#[derive(Default)]
pub(crate) struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            match std::str::from_utf8(&raw[..raw.len() - 1]) {
                Ok(line) => lines.push(line.trim_end_matches('\r').to_owned()),
                Err(_) => warn!("dropping non-utf8 feed line"),
            }
        }
        lines
    }
}

impl NoteStore {
    /// Follow the continuous changes feed, invoking `callback` once per
    /// changed note in `seq` order.
    ///
    /// Runs until [`WatchHandle::end_watch`] is called. Stream and connect
    /// failures reconnect after a short delay; authentication failures
    /// propagate, since retrying cannot fix credentials.
    pub async fn begin_watch<F, Fut>(
        &self,
        handle: &WatchHandle,
        mut callback: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(LoadedEntry, Seq) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            if handle.is_stopped() {
                handle.set_state(WatchState::Stopped);
                return Ok(());
            }
            handle.set_state(WatchState::Connecting);
            let since = self.since();
            let connect = Abortable::new(self.remote.open_changes_stream(&since), handle.arm());
            let stream = match connect.await {
                Err(_aborted) => {
                    handle.set_state(WatchState::Stopped);
                    return Ok(());
                }
                Ok(Ok(stream)) => stream,
                Ok(Err(error)) if error.is_auth() => {
                    handle.set_state(WatchState::Stopped);
                    return Err(error.into());
                }
                Ok(Err(error)) => {
                    warn!(error = %error, "changes feed connect failed");
                    self.await_reconnect(handle).await;
                    continue;
                }
            };

            handle.set_state(WatchState::Streaming);
            let mut stream = Abortable::new(stream, handle.arm());
            let mut framer = LineFramer::default();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        for line in framer.push(&bytes) {
                            self.apply_change_line(&line, &mut callback).await;
                        }
                    }
                    Err(error) => {
                        warn!(error = %error, "changes stream broke");
                        break;
                    }
                }
            }

            if handle.is_stopped() {
                handle.set_state(WatchState::Stopped);
                return Ok(());
            }
            self.await_reconnect(handle).await;
        }
    }

    async fn await_reconnect(&self, handle: &WatchHandle) {
        handle.set_state(WatchState::Disconnected);
        debug!(delay = ?RECONNECT_DELAY, "changes feed disconnected; reconnecting");
        // An abortable sleep lets end_watch cut the reconnect timer.
        let _ = Abortable::new(tokio::time::sleep(RECONNECT_DELAY), handle.arm()).await;
    }

    /// Drain the feed in pages until the server reports nothing pending.
    /// Returns the final cursor.
    pub async fn follow_updates<F, Fut>(&self, mut callback: F) -> Result<Seq, StoreError>
    where
        F: FnMut(LoadedEntry, Seq) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let since = self.since();
            let page = self.remote.changes_page(&since, FOLLOW_PAGE_LIMIT).await?;
            let fetched = page.results.len();
            for row in page.results {
                self.apply_change_row(row, &mut callback).await;
            }
            self.set_since(page.last_seq.clone());
            trace!(fetched, pending = ?page.pending, since = %page.last_seq, "follow page drained");
            if page.pending.unwrap_or(0) == 0 {
                return Ok(self.since());
            }
        }
    }

    async fn apply_change_line<F, Fut>(&self, line: &str, callback: &mut F)
    where
        F: FnMut(LoadedEntry, Seq) -> Fut,
        Fut: Future<Output = ()>,
    {
        if line.trim().is_empty() {
            return; // heartbeat
        }
        match serde_json::from_str::<ChangeRow>(line) {
            Ok(row) => self.apply_change_row(row, callback).await,
            Err(error) => trace!(error = %error, "ignoring unparseable feed line"),
        }
    }

    async fn apply_change_row<F, Fut>(&self, row: ChangeRow, callback: &mut F)
    where
        F: FnMut(LoadedEntry, Seq) -> Fut,
        Fut: Future<Output = ()>,
    {
        if let Some(seq) = &row.seq {
            self.set_since(seq.clone());
        }
        let seq = row.seq.unwrap_or_else(|| self.since());
        let Some(doc) = row.doc else {
            return;
        };
        let Some((note, kind)) = EntryDoc::from_value(doc).and_then(EntryDoc::into_note) else {
            return;
        };
        match self.get_by_meta(note, kind, false).await {
            Ok(entry) => callback(entry, seq).await,
            Err(error) => {
                warn!(id = %row.id, error = %error, "skipping change that failed to assemble");
            }
        }
    }
}
