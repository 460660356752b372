//! # Version Index
//!
//! In-memory mapping from stream address to current version and last log
//! position, used to enforce optimistic concurrency on appends.
//!
//! The index is a derived cache: it is rebuilt at startup by folding the
//! recovery scan ([`crate::log::recover`]) and never persisted on its own.
//! It is mutated only inside the writer's append critical section, after the
//! corresponding bytes are durable, so memory may lag disk but never leads it.
//!
//! ## Keying
//!
//! Entries are keyed by the normalized stream address: the flattened segments
//! joined by the codec's field separator byte. The separator never survives
//! encoding (the encoder refuses it in string fields), so the key is
//! injective over every stream that can actually be written.

use std::collections::HashMap;

use crate::log::ReplayedRecord;
use crate::types::{LogPosition, StreamId, StreamVersion};

// =============================================================================
// Index Entry
// =============================================================================

/// Current state of one stream.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Version of the last record written to the stream.
    pub version: StreamVersion,

    /// Log position of that record.
    pub last_position: LogPosition,
}

// =============================================================================
// Version Index
// =============================================================================

/// The stream-address to current-version mapping.
///
/// Owned by the writer; constructed at `connect()` and dropped at
/// `disconnect()`. Absence of a key means the stream has never been written.
#[derive(Debug, Default)]
pub struct VersionIndex {
    entries: HashMap<String, IndexEntry>,
}

/// Joins the flattened address segments with the codec's field separator.
fn normalized_key(id: &StreamId) -> String {
    id.segments().join("\u{1f}")
}

impl VersionIndex {
    /// An empty index (a log with no committed records).
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the index by folding every record of a recovery scan, in log
    /// order. After the fold, `current_version(s)` equals the version of the
    /// last record in log order addressed to `s`.
    pub fn rebuild(replayed: &[ReplayedRecord]) -> Self {
        let mut index = Self::new();
        for record in replayed {
            index.record(&record.stream_id, record.version, record.position);
        }
        index
    }

    /// The stream's current version, or `None` if it has never been written.
    pub fn current_version(&self, id: &StreamId) -> Option<StreamVersion> {
        self.entries.get(&normalized_key(id)).map(|e| e.version)
    }

    /// The full entry for a stream.
    pub fn entry(&self, id: &StreamId) -> Option<&IndexEntry> {
        self.entries.get(&normalized_key(id))
    }

    /// Records a committed write. Called only from the writer's append
    /// critical section, after the record's bytes are durable.
    pub fn record(&mut self, id: &StreamId, version: StreamVersion, position: LogPosition) {
        self.entries.insert(
            normalized_key(id),
            IndexEntry {
                version,
                last_position: position,
            },
        );
    }

    /// Number of distinct streams seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no stream has been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
