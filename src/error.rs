//! # Error Handling for StreamVault
//!
//! This module defines the error types used throughout StreamVault. We use a
//! single error enum ([`Error`]) to represent all possible failure modes, which
//! simplifies error handling for library users.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations.
//! This provides:
//! - Automatic `Display` implementation from the `#[error(...)]` attributes
//! - Automatic `From` implementations from the `#[from]` attributes
//! - Proper error source chaining via `#[source]`
//!
//! ## Error Categories
//!
//! Errors fall into these categories:
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Conflict | Version mismatch, absent stream | Re-read and retry with fresh data |
//! | Rejection | Reserved-byte collision, empty append | Fix the input, nothing was written |
//! | Durability | Write or flush failed | Caller decides whether to retry the whole append |
//! | Corruption | Undecodable bytes in the log | Investigate; recovery truncates, live reads stop |
//!
//! None of these are retried internally and none are silently swallowed. The
//! one exception to propagation is subscriber-side delivery failure, which is
//! isolated per subscriber and reported through `tracing` (see
//! [`crate::subscription`]).

use thiserror::Error;

use crate::types::{ExpectedVersion, StreamVersion};

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in StreamVault operations.
///
/// # Example
///
/// ```rust,ignore
/// use streamvault::{Error, Result};
///
/// match store.append(stream_id, expected, events).await {
///     Ok(result) => println!("now at version {}", result.next_expected_version),
///     Err(Error::Conflict { actual, .. }) => {
///         // Re-read the stream, rebuild expectations, retry.
///     }
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Conflict Errors (Client can retry with updated data)
    // =========================================================================

    /// Optimistic concurrency conflict: the stream was modified since last read.
    ///
    /// The caller provided an [`ExpectedVersion`] that does not match the
    /// stream's actual current version. Nothing was written; the log,
    /// checkpoint, and version index are unchanged.
    ///
    /// # Recovery
    ///
    /// 1. Re-read the stream to get current state
    /// 2. Re-apply business logic with new data
    /// 3. Retry the append with a fresh expected version
    #[error("conflict on stream '{stream_id}': expected {expected}, but found version {actual}")]
    Conflict {
        /// The stream where the conflict occurred
        stream_id: String,
        /// The version the client expected
        expected: ExpectedVersion,
        /// The actual current version
        actual: StreamVersion,
    },

    /// An exact version was expected, but the stream has never been written.
    ///
    /// Returned only for `ExpectedVersion::Exact(_)` against an absent stream.
    /// Appending with `ExpectedVersion::NoStream` or `ExpectedVersion::Any` is
    /// the way to create a stream.
    #[error("stream '{0}' does not exist")]
    StreamNotFound(String),

    // =========================================================================
    // Rejection Errors (Nothing was written; fix the input)
    // =========================================================================

    /// Event content collides with a reserved framing byte.
    ///
    /// The record framing reserves `0x00` (end-of-data sentinel) and `0x1E`
    /// (record terminator) in all content, and `0x1F` (field separator) in
    /// string fields. The encoder rejects colliding input before any write
    /// occurs instead of silently truncating at the offending byte.
    #[error("encoding rejected: {0}")]
    Encoding(String),

    /// The append request itself is malformed.
    ///
    /// Covers an empty event sequence and events whose embedded stream id
    /// does not match the append's target stream. Checked before the request
    /// reaches the writer; no state changes.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================

    /// The underlying write, flush, or file operation failed.
    ///
    /// For appends the checkpoint is left exactly where it was before the
    /// attempt. The append is never retried internally; the caller decides
    /// whether to retry the whole append.
    #[error("durability failure: {0}")]
    Durability(#[from] std::io::Error),

    /// Bytes in the log cannot form a complete record.
    ///
    /// During recovery this is handled internally (the checkpoint is truncated
    /// to the last good record and the anomaly is logged). During live reads
    /// it is surfaced to the caller rather than guessed around.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord {
        /// Byte offset of the record that failed to decode
        offset: u64,
        /// What went wrong while decoding
        reason: String,
    },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================

    /// The operation requires a connected store.
    ///
    /// Returned by append/read/subscribe when `connect()` has not been called
    /// (or `disconnect()` already was).
    #[error("store is not connected")]
    NotConnected,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
