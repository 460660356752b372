//! # Domain Types for StreamVault
//!
//! This module defines the core types used throughout StreamVault: stream
//! addresses, filter keys, versions, positions, and the write-side/read-side
//! event shapes.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! We use the "newtype pattern" extensively. Wrapping primitive types in
//! single-field structs provides:
//!
//! - **Type safety**: Can't accidentally pass a [`LogPosition`] where a
//!   [`StreamVersion`] is expected
//! - **Self-documenting code**: Function signatures tell you what they expect
//! - **Encapsulation**: Representation can change without touching callers
//!
//! ## Invariants
//!
//! - [`LogPosition`]: byte offset of a record's start in the log, strictly
//!   increasing across all records regardless of stream
//! - [`StreamVersion`]: starts at 0 for a stream's first event, increases by
//!   exactly 1 per event within the stream, no gaps
//! - [`Checkpoint`]: total bytes durably flushed to the log, never decreases
//! - [`StreamKey`] matching is pure: no I/O, no allocation beyond comparison

use std::fmt;

use uuid::Uuid;

// =============================================================================
// Stream Identification
// =============================================================================

/// The identity of one logical event stream.
///
/// A stream address is hierarchical: a tenant, an ordered category path, and a
/// local id. For example the stream for order 42 of tenant "acme" under the
/// "Sales/Orders" category is `StreamId::new("acme", ["Sales", "Orders"], "42")`.
///
/// For matching and indexing purposes the address is flattened to the segment
/// sequence `[tenant, ...categories, id]`.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    tenant: String,
    categories: Vec<String>,
    id: String,
}

impl StreamId {
    /// Creates a new stream id.
    pub fn new<T, C, S, I>(tenant: T, categories: C, id: I) -> Self
    where
        T: Into<String>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
        I: Into<String>,
    {
        Self {
            tenant: tenant.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            id: id.into(),
        }
    }

    /// The tenant segment.
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The ordered category path between tenant and local id.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// The local id segment.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the flattened segment sequence `[tenant, ...categories, id]`.
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = Vec::with_capacity(self.categories.len() + 2);
        segments.push(self.tenant.as_str());
        segments.extend(self.categories.iter().map(String::as_str));
        segments.push(self.id.as_str());
        segments
    }

    /// Number of flattened segments.
    pub fn segment_count(&self) -> usize {
        self.categories.len() + 2
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

/// A filter pattern over stream addresses.
///
/// A key is an ordered sequence of segments compared against a stream's
/// flattened address. A key **matches** a [`StreamId`] when, segment by
/// segment, each key segment equals the corresponding id segment or is the
/// wildcard `"*"`. A key shorter than the id's segment sequence matches as a
/// prefix, which is what enables "all streams under this category"
/// subscriptions. A key longer than the id never matches.
///
/// # Examples
///
/// ```rust
/// use streamvault::types::{StreamId, StreamKey};
///
/// let order_a = StreamId::new("tenant1", ["Orders"], "A");
///
/// assert!(StreamKey::new(["tenant1", "Orders", "*"]).matches(&order_a));
/// assert!(StreamKey::new(["tenant1"]).matches(&order_a)); // prefix
/// assert!(StreamKey::all().matches(&order_a));
/// assert!(!StreamKey::new(["tenant2", "Orders", "*"]).matches(&order_a));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey(Vec<String>);

/// The wildcard segment, matching any value in its position.
pub const WILDCARD_SEGMENT: &str = "*";

impl StreamKey {
    /// Creates a key from an ordered sequence of segments.
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The single-segment wildcard key, matching every stream.
    pub fn all() -> Self {
        Self(vec![WILDCARD_SEGMENT.to_string()])
    }

    /// The key's segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Tests this key against a stream's flattened address.
    ///
    /// Pure and total: no I/O, no allocation.
    pub fn matches(&self, id: &StreamId) -> bool {
        let key_len = self.0.len();
        if key_len > id.segment_count() {
            return false;
        }
        // Walk the id's segments in flattened order without collecting them.
        let id_segments = std::iter::once(id.tenant.as_str())
            .chain(id.categories.iter().map(String::as_str))
            .chain(std::iter::once(id.id.as_str()));
        for (key_segment, id_segment) in self.0.iter().zip(id_segments) {
            if key_segment != WILDCARD_SEGMENT && key_segment != id_segment {
                return false;
            }
        }
        true
    }
}

impl From<StreamId> for StreamKey {
    /// A stream id flattens to its full-address key.
    fn from(id: StreamId) -> Self {
        Self(
            id.segments()
                .into_iter()
                .map(str::to_string)
                .collect(),
        )
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

// =============================================================================
// Engine-Level Filters
// =============================================================================

/// What a read or subscription is interested in.
///
/// `Stream` matches by exact identity. This matters: converting a full
/// [`StreamId`] into a [`StreamKey`] and using the prefix rule would also
/// match deeper streams whose address starts with the same segments, which is
/// never what a caller asking for one stream wants.
#[derive(Debug, Clone)]
pub enum StreamFilter {
    /// Every stream.
    All,
    /// Exactly one stream.
    Stream(StreamId),
    /// All streams matching a key pattern.
    Key(StreamKey),
}

impl StreamFilter {
    /// Tests a stream address against this filter.
    pub fn matches(&self, id: &StreamId) -> bool {
        match self {
            StreamFilter::All => true,
            StreamFilter::Stream(target) => target == id,
            StreamFilter::Key(key) => key.matches(id),
        }
    }
}

impl From<StreamId> for StreamFilter {
    fn from(id: StreamId) -> Self {
        StreamFilter::Stream(id)
    }
}

impl From<StreamKey> for StreamFilter {
    fn from(key: StreamKey) -> Self {
        StreamFilter::Key(key)
    }
}

// =============================================================================
// Versions, Positions, Checkpoint
// =============================================================================

/// A version number within a stream.
///
/// The first event of a stream is version 0; each subsequent event increments
/// by exactly 1, with no gaps. Used for optimistic concurrency: the version a
/// caller observed feeds the next append's [`ExpectedVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamVersion(u64);

impl StreamVersion {
    /// The version of a stream's first event.
    pub const FIRST: StreamVersion = StreamVersion(0);

    /// Creates a version from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The durable byte offset of a record's start in the log.
///
/// Strictly increasing across all records regardless of stream. Restartable
/// reads resume from a previously observed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The position of the very first record (offset 0).
    pub const START: LogPosition = LogPosition(0);

    /// Creates a position from a raw byte offset.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw byte offset.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Total bytes durably flushed to the log file.
///
/// Advanced only after a physical write+flush succeeds; never decreases;
/// never persisted separately from the log file (it is always recomputable by
/// replaying the file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Checkpoint(u64);

impl Checkpoint {
    /// The checkpoint of an empty log.
    pub const ZERO: Checkpoint = Checkpoint(0);

    /// Creates a checkpoint from a raw byte count.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw byte count.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the checkpoint advanced by `bytes`.
    pub fn advance(&self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    /// The log position at which the next record will start.
    pub fn as_position(&self) -> LogPosition {
        LogPosition(self.0)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Optimistic Concurrency
// =============================================================================

/// The caller's assumption about a stream's current state, checked at commit.
///
/// | expected | stream absent | stream present at version v |
/// |---|---|---|
/// | `NoStream` | succeeds, starts at version 0 | fails with `Conflict` |
/// | `Any` | succeeds, starts at version 0 | succeeds, continues at v+1 |
/// | `Exact(n)` | fails with `StreamNotFound` | succeeds iff n == v |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet (this is the first event).
    NoStream,
    /// Skip the concurrency check entirely.
    Any,
    /// The stream's current version must equal exactly this value.
    Exact(u64),
}

impl From<StreamVersion> for ExpectedVersion {
    /// An aggregate that observed version `v` expects exactly `v`.
    fn from(version: StreamVersion) -> Self {
        ExpectedVersion::Exact(version.as_raw())
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::Any => write!(f, "any version"),
            ExpectedVersion::Exact(v) => write!(f, "version {}", v),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// An event to be appended: the write-side shape, caller-constructed.
///
/// StreamVault is payload-agnostic. `metadata` and `payload` are opaque bytes
/// produced by a serialization collaborator (typically: a type descriptor in
/// the metadata, the serialized domain event in the payload). The engine only
/// constrains them at the framing level (see [`crate::codec`]).
#[derive(Debug, Clone)]
pub struct EventData {
    /// The stream this event is addressed to.
    pub stream_id: StreamId,

    /// Unique event identity, assigned by the caller.
    pub event_id: Uuid,

    /// Event classification, e.g. "OrderPlaced".
    pub event_type: String,

    /// Opaque metadata bytes (type descriptors, correlation ids, ...).
    pub metadata: Vec<u8>,

    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl EventData {
    /// Creates an event with a freshly generated event id.
    pub fn new(
        stream_id: StreamId,
        event_type: impl Into<String>,
        metadata: impl Into<Vec<u8>>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            stream_id,
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            metadata: metadata.into(),
            payload: payload.into(),
        }
    }

    /// Overrides the generated event id (builder pattern).
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }
}

/// A committed event: the read-side shape, produced by the engine.
///
/// Carries everything from [`EventData`] plus the version and log position
/// assigned at commit time. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// The stream this event belongs to.
    pub stream_id: StreamId,

    /// Unique event identity.
    pub event_id: Uuid,

    /// Event classification.
    pub event_type: String,

    /// Opaque metadata bytes.
    pub metadata: Vec<u8>,

    /// Opaque payload bytes.
    pub payload: Vec<u8>,

    /// Version within the stream, assigned at commit.
    pub version: StreamVersion,

    /// Byte offset of this record's start in the log, assigned at commit.
    pub position: LogPosition,
}

// =============================================================================
// Write Results
// =============================================================================

/// The result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// The version of the last event written. Feeds the next append's
    /// [`ExpectedVersion`] via `From<StreamVersion>`.
    pub next_expected_version: StreamVersion,

    /// Log position of the last record written.
    pub log_position: LogPosition,
}

// =============================================================================
// Tests
// =============================================================================
