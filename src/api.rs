//! # Public API: `StreamVault`
//!
//! The handle the rest of an application holds. A [`StreamVault`] is a cheap
//! clone (an `Arc` around shared state) so it can be passed freely between
//! tasks; all clones share one store.
//!
//! ## Lifecycle
//!
//! A vault starts disconnected. [`StreamVault::connect`] opens (or creates)
//! the data directory, recovers the log, rebuilds the version index, and
//! spawns the writer thread. Every operation other than connect/disconnect
//! fails with [`Error::NotConnected`] while disconnected. Both `connect` and
//! `disconnect` are idempotent.
//!
//! ## Reads Are Snapshots
//!
//! [`StreamVault::read`] captures the checkpoint at call time and streams
//! every matching record below it, in commit order. Events appended after
//! the call never appear in that read; use [`StreamVault::subscribe`] for
//! a live feed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::index::VersionIndex;
use crate::log::{LogReader, LogStore, DEFAULT_READ_BLOCK_SIZE};
use crate::subscription::{Subscription, SubscriptionRegistry, DEFAULT_SUBSCRIPTION_WARN_DEPTH};
use crate::types::{
    Checkpoint, EventData, ExpectedVersion, LogPosition, RecordedEvent, StreamFilter, StreamId,
    WriteResult,
};
use crate::writer::{spawn_writer, WriterHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Capacity of the channel between a read's file scanner and its consumer.
/// Bounding it keeps a slow consumer from buffering the whole log in memory.
const READ_CHANNEL_SIZE: usize = 256;

/// Configuration for a [`StreamVault`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the log file. Created on connect if absent.
    pub data_dir: PathBuf,

    /// Block size used when scanning the log file.
    pub read_block_size: usize,

    /// Queue depth at which a lagging subscriber is logged.
    pub subscription_warn_depth: usize,
}

impl StoreConfig {
    /// Configuration with default tuning for the given data directory.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            read_block_size: DEFAULT_READ_BLOCK_SIZE,
            subscription_warn_depth: DEFAULT_SUBSCRIPTION_WARN_DEPTH,
        }
    }
}

// =============================================================================
// Store Handle
// =============================================================================

/// Per-connection state, present only while connected.
struct Connected {
    writer: WriterHandle,
    checkpoint_cell: Arc<AtomicU64>,
    log_path: PathBuf,
}

struct Inner {
    config: StoreConfig,
    state: Mutex<Option<Connected>>,
    registry: Arc<SubscriptionRegistry>,
}

/// Handle to an embedded event store. Clones share the same store.
#[derive(Clone)]
pub struct StreamVault {
    inner: Arc<Inner>,
}

impl StreamVault {
    /// Creates a disconnected handle. Call [`StreamVault::connect`] before
    /// using it.
    pub fn new(config: StoreConfig) -> Self {
        let registry = SubscriptionRegistry::new(config.subscription_warn_depth);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(None),
                registry,
            }),
        }
    }

    /// Opens the store: recovers the log, rebuilds the index, and starts the
    /// writer. Calling this while already connected is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let data_dir = self.inner.config.data_dir.clone();
        let block_size = self.inner.config.read_block_size;

        // Recovery scans the whole file; keep it off the async runtime.
        let (store, report) = tokio::task::spawn_blocking(move || {
            LogStore::open(&data_dir, block_size)
        })
        .await
        .map_err(|e| {
            Error::Durability(std::io::Error::new(std::io::ErrorKind::Other, e))
        })??;

        tracing::info!(
            path = %store.path().display(),
            checkpoint = report.checkpoint.as_raw(),
            streams = report.replayed.len(),
            "store opened"
        );

        let index = VersionIndex::rebuild(&report.replayed);
        let checkpoint_cell = Arc::new(AtomicU64::new(report.checkpoint.as_raw()));
        let log_path = store.path().to_path_buf();
        let writer = spawn_writer(
            store,
            index,
            Arc::clone(&self.inner.registry),
            Arc::clone(&checkpoint_cell),
        )?;

        *state = Some(Connected {
            writer,
            checkpoint_cell,
            log_path,
        });
        Ok(())
    }

    /// Stops the writer and ends all subscriptions. Calling this while
    /// already disconnected is a no-op. The data on disk is untouched and a
    /// later [`StreamVault::connect`] resumes from it.
    pub async fn disconnect(&self) {
        let connected = self.inner.state.lock().await.take();
        if let Some(connected) = connected {
            connected.writer.shutdown().await;
            // Dropping the senders lets every live Subscription observe
            // end-of-stream instead of waiting forever.
            self.inner.registry.clear();
            tracing::info!("store closed");
        }
    }

    /// Whether the store is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.is_some()
    }

    /// Appends `events` to `stream_id`, all-or-nothing, after checking
    /// `expected` against the stream's current version.
    pub async fn append(
        &self,
        stream_id: StreamId,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult> {
        if events.is_empty() {
            return Err(Error::InvalidAppend(
                "append requires at least one event".to_string(),
            ));
        }
        for event in &events {
            if event.stream_id != stream_id {
                return Err(Error::InvalidAppend(format!(
                    "event '{}' is addressed to stream '{}', not '{}'",
                    event.event_type, event.stream_id, stream_id
                )));
            }
        }

        // Clone the command sender out of the lock so an in-flight append
        // never blocks reads or subscribes.
        let tx = {
            let state = self.inner.state.lock().await;
            let connected = state.as_ref().ok_or(Error::NotConnected)?;
            connected.writer.sender()
        };
        crate::writer::submit_append(&tx, stream_id, expected, events).await
    }

    /// Reads every committed record matching `filter`, in commit order, as
    /// of the moment of the call. Later appends are not included.
    pub async fn read(&self, filter: impl Into<StreamFilter>) -> Result<ReadStream> {
        let filter = filter.into();
        let (log_path, limit) = {
            let state = self.inner.state.lock().await;
            let connected = state.as_ref().ok_or(Error::NotConnected)?;
            let limit = Checkpoint::from_raw(
                connected.checkpoint_cell.load(Ordering::Acquire),
            );
            (connected.log_path.clone(), limit)
        };
        let block_size = self.inner.config.read_block_size;

        let (tx, rx) = mpsc::channel(READ_CHANNEL_SIZE);
        tokio::task::spawn_blocking(move || {
            scan_log(&log_path, limit, block_size, &filter, tx);
        });

        Ok(ReadStream { rx })
    }

    /// Subscribes to events committed after this call that match `filter`.
    /// There is no catch-up: already-committed events are never delivered.
    pub async fn subscribe(&self, filter: impl Into<StreamFilter>) -> Result<Subscription> {
        let state = self.inner.state.lock().await;
        if state.is_none() {
            return Err(Error::NotConnected);
        }
        Ok(self.inner.registry.subscribe(filter.into()))
    }

    /// The total number of bytes committed to the log, or zero while
    /// disconnected. This is also the position the next record will start at.
    pub async fn checkpoint(&self) -> Checkpoint {
        match self.inner.state.lock().await.as_ref() {
            Some(connected) => {
                Checkpoint::from_raw(connected.checkpoint_cell.load(Ordering::Acquire))
            }
            None => Checkpoint::ZERO,
        }
    }
}

/// Blocking scan of the log file up to `limit`, pushing matches into `tx`.
/// Runs on the blocking thread pool; stops early when the consumer drops
/// its [`ReadStream`].
fn scan_log(
    log_path: &Path,
    limit: Checkpoint,
    block_size: usize,
    filter: &StreamFilter,
    tx: mpsc::Sender<Result<RecordedEvent>>,
) {
    let mut reader = match LogReader::open(log_path, LogPosition::START, limit, block_size) {
        Ok(reader) => reader,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                if !filter.matches(&record.stream_id) {
                    continue;
                }
                if tx.blocking_send(Ok(record)).is_err() {
                    // Consumer went away; abandon the scan.
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

// =============================================================================
// Read Stream
// =============================================================================

/// An in-order stream of committed records produced by [`StreamVault::read`].
/// Dropping it cancels the underlying scan.
pub struct ReadStream {
    rx: mpsc::Receiver<Result<RecordedEvent>>,
}

impl ReadStream {
    /// The next matching record, `None` once the snapshot is exhausted.
    pub async fn next(&mut self) -> Option<Result<RecordedEvent>> {
        self.rx.recv().await
    }

    /// Drains the remainder of the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<RecordedEvent>> {
        let mut records = Vec::new();
        while let Some(record) = self.rx.recv().await {
            records.push(record?);
        }
        Ok(records)
    }
}

impl futures::Stream for ReadStream {
    type Item = Result<RecordedEvent>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
