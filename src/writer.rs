//! # Writer: the Append Critical Section
//!
//! All writes go through a single dedicated OS thread that owns the
//! [`LogStore`] and the [`VersionIndex`]. Commands arrive over an async
//! channel and are answered over oneshot replies, so async callers never
//! block on file I/O and concurrent appends are serialized by construction:
//! two writers can never compute the same "current version" and both succeed.
//!
//! ## The Critical Section
//!
//! One append executes as a single atomic sequence:
//!
//! 1. reconcile the caller's [`ExpectedVersion`] against the index
//! 2. encode every record up front (encoding errors abort before any I/O)
//! 3. one durable append of the concatenated frames (all-or-nothing)
//! 4. fold the index forward
//! 5. notify the dispatcher once per record, in order
//! 6. reply with the last record's [`WriteResult`]
//!
//! On failure at any step, nothing is written and the index is unchanged.
//!
//! ## Checkpoint Publication
//!
//! After each commit the writer publishes the checkpoint to a shared atomic
//! cell. The read path snapshots that cell to bound its scan, which is how
//! readers run freely in parallel with appends while only ever observing a
//! monotonically growing, never-mutated prefix of the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};

use crate::codec::encode_record;
use crate::error::{Error, Result};
use crate::index::VersionIndex;
use crate::log::LogStore;
use crate::subscription::SubscriptionRegistry;
use crate::types::{
    EventData, ExpectedVersion, RecordedEvent, StreamId, StreamVersion, WriteResult,
};

// =============================================================================
// Configuration
// =============================================================================

/// Size of the command channel between async callers and the writer thread.
const COMMAND_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// Commands
// =============================================================================

/// A request executed on the writer thread.
pub(crate) enum WriterCommand {
    Append {
        stream_id: StreamId,
        expected: ExpectedVersion,
        events: Vec<EventData>,
        reply: oneshot::Sender<Result<WriteResult>>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Async handle to the writer thread. Dropping the last sender shuts the
/// thread down; [`WriterHandle::shutdown`] does so explicitly and joins.
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
    join: Option<JoinHandle<()>>,
}

impl WriterHandle {
    /// Submits one append and waits for the writer's reply.
    pub(crate) async fn append(
        &self,
        stream_id: StreamId,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult> {
        submit_append(&self.tx, stream_id, expected, events).await
    }

    /// A clone of the command sender, so callers need not hold this handle
    /// while an append is in flight.
    pub(crate) fn sender(&self) -> mpsc::Sender<WriterCommand> {
        self.tx.clone()
    }

    /// Closes the command channel and joins the writer thread.
    pub(crate) async fn shutdown(mut self) {
        drop(self.tx);
        if let Some(join) = self.join.take() {
            // Joining an OS thread blocks; keep it off the async runtime.
            let _ = tokio::task::spawn_blocking(move || {
                let _ = join.join();
            })
            .await;
        }
    }
}

/// Sends one append over `tx` and waits for the writer's reply. A closed
/// channel on either leg means the store has been disconnected.
pub(crate) async fn submit_append(
    tx: &mpsc::Sender<WriterCommand>,
    stream_id: StreamId,
    expected: ExpectedVersion,
    events: Vec<EventData>,
) -> Result<WriteResult> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(WriterCommand::Append {
        stream_id,
        expected,
        events,
        reply: reply_tx,
    })
    .await
    .map_err(|_| Error::NotConnected)?;
    reply_rx.await.map_err(|_| Error::NotConnected)?
}

/// Spawns the writer thread, which takes ownership of the store and index.
///
/// `checkpoint_cell` is the shared cell the writer publishes the checkpoint
/// to after each commit; it is seeded with the recovered checkpoint by the
/// caller.
pub(crate) fn spawn_writer(
    store: LogStore,
    index: VersionIndex,
    registry: Arc<SubscriptionRegistry>,
    checkpoint_cell: Arc<AtomicU64>,
) -> Result<WriterHandle> {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let join = thread::Builder::new()
        .name("streamvault-writer".to_string())
        .spawn(move || writer_loop(rx, store, index, registry, checkpoint_cell))?;

    Ok(WriterHandle {
        tx,
        join: Some(join),
    })
}

fn writer_loop(
    mut rx: mpsc::Receiver<WriterCommand>,
    mut store: LogStore,
    mut index: VersionIndex,
    registry: Arc<SubscriptionRegistry>,
    checkpoint_cell: Arc<AtomicU64>,
) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            WriterCommand::Append {
                stream_id,
                expected,
                events,
                reply,
            } => {
                let result = execute_append(
                    &mut store,
                    &mut index,
                    &registry,
                    &checkpoint_cell,
                    &stream_id,
                    expected,
                    events,
                );
                // A caller that stopped waiting does not undo a commit.
                let _ = reply.send(result);
            }
        }
    }
    tracing::debug!(
        checkpoint = store.checkpoint().as_raw(),
        "writer thread stopping"
    );
}

// =============================================================================
// Append Execution
// =============================================================================

/// Reconciles the expected version against the index per the concurrency
/// table. Returns the version the first new event will get.
fn reconcile(
    stream_id: &StreamId,
    expected: ExpectedVersion,
    actual: Option<StreamVersion>,
) -> Result<StreamVersion> {
    match (expected, actual) {
        (ExpectedVersion::NoStream, None) => Ok(StreamVersion::FIRST),
        (ExpectedVersion::NoStream, Some(actual)) => Err(Error::Conflict {
            stream_id: stream_id.to_string(),
            expected,
            actual,
        }),
        (ExpectedVersion::Any, None) => Ok(StreamVersion::FIRST),
        (ExpectedVersion::Any, Some(actual)) => Ok(actual.next()),
        (ExpectedVersion::Exact(_), None) => Err(Error::StreamNotFound(stream_id.to_string())),
        (ExpectedVersion::Exact(n), Some(actual)) => {
            if n == actual.as_raw() {
                Ok(actual.next())
            } else {
                Err(Error::Conflict {
                    stream_id: stream_id.to_string(),
                    expected,
                    actual,
                })
            }
        }
    }
}

fn execute_append(
    store: &mut LogStore,
    index: &mut VersionIndex,
    registry: &SubscriptionRegistry,
    checkpoint_cell: &AtomicU64,
    stream_id: &StreamId,
    expected: ExpectedVersion,
    events: Vec<EventData>,
) -> Result<WriteResult> {
    if events.is_empty() {
        return Err(Error::InvalidAppend(
            "append requires at least one event".to_string(),
        ));
    }
    let first_version = reconcile(stream_id, expected, index.current_version(stream_id))?;

    // Encode everything before touching the file, so an encoding rejection
    // leaves no partial state anywhere.
    let mut batch = Vec::new();
    let mut committed = Vec::with_capacity(events.len());
    let mut version = first_version;
    for event in &events {
        let position = store.checkpoint().advance(batch.len() as u64).as_position();
        let frame = encode_record(event, version, position)?;
        batch.extend_from_slice(&frame);
        committed.push(RecordedEvent {
            stream_id: event.stream_id.clone(),
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            metadata: event.metadata.clone(),
            payload: event.payload.clone(),
            version,
            position,
        });
        version = version.next();
    }

    // One durable write for the whole append: all records commit or none do.
    let checkpoint = store.append_raw(&batch)?;

    let last = committed.last().expect("append has at least one event");
    index.record(stream_id, last.version, last.position);
    checkpoint_cell.store(checkpoint.as_raw(), Ordering::Release);

    for record in &committed {
        registry.notify(record);
    }

    tracing::debug!(
        stream = %stream_id,
        events = committed.len(),
        version = last.version.as_raw(),
        checkpoint = checkpoint.as_raw(),
        "append committed"
    );

    Ok(WriteResult {
        next_expected_version: last.version,
        log_position: last.position,
    })
}

// =============================================================================
// Tests
// =============================================================================
