//! # StreamVault - Embedded Event Store
//!
//! StreamVault is an embedded, file-backed event store for a single process.
//! It provides:
//!
//! - **Event sourcing primitives**: hierarchical streams, versions, one ordered log
//! - **Optimistic concurrency**: expected-version checks on every append
//! - **Point-in-time reads**: checkpoint-bounded scans in commit order
//! - **Live subscriptions**: filtered delivery of newly committed events
//! - **Crash recovery**: a torn tail is detected and discarded on open
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │              (connect, append, read, subscribe)                 │
//! └──────────────┬────────────────────────────────┬─────────────────┘
//!                │ appends                        │ reads
//!                ▼                                ▼
//! ┌──────────────────────────────┐  ┌─────────────────────────────┐
//! │        Writer Thread         │  │        Log Readers          │
//! │ (single thread, owns the log │  │ (blocking scans, bounded by │
//! │  file and the version index) │  │  a checkpoint snapshot)     │
//! └──────────────┬───────────────┘  └──────────────┬──────────────┘
//!                │                                 │
//!                ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          chunk.dat                              │
//! │                (append-only, flushed per append)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! These invariants are enforced throughout the codebase and must never be violated:
//!
//! 1. **Single writer**: one thread performs every append
//! 2. **Positions are offsets**: a record's position is its byte offset in the log
//! 3. **Versions are gapless**: per stream, versions start at 0 and increase by 1
//! 4. **Checkpoint is truth**: bytes past the checkpoint do not exist logically
//! 5. **Appends are atomic**: a multi-event append commits fully or not at all
//!
//! ## Module Organization
//!
//! - [`error`]: Custom error types for all failure modes
//! - [`types`]: Domain types (StreamId, EventData, versions, positions)
//! - [`codec`]: Record framing, encoding, and incremental decoding
//! - [`log`]: Append-only log file, readers, and crash recovery
//! - [`index`]: In-memory stream-to-current-version index
//! - [`subscription`]: Live subscriptions with filtered delivery
//! - [`writer`]: Dedicated writer thread (the append critical section)
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for StreamVault operations.
///
/// This module defines all error variants that can occur during store
/// operations. Using a single error enum simplifies error handling for callers.
pub mod error;

/// Domain types for event sourcing.
///
/// This module defines the core types: stream addresses, filters, events,
/// versions, positions, and checkpoints. Uses the newtype pattern for type
/// safety.
pub mod types;

/// Record framing and the wire codec.
///
/// This module encodes events into self-delimiting frames and decodes them
/// incrementally from partial buffers, detecting corruption and the
/// end-of-data sentinel along the way.
pub mod codec;

/// The append-only log file.
///
/// This module owns the on-disk representation: durable appends, block-wise
/// scanning, and the recovery pass that discards a torn tail after a crash.
pub mod log;

/// In-memory version index.
///
/// This module tracks each stream's current version so expected-version
/// checks never touch the disk. Rebuilt from the log on connect.
pub mod index;

/// Subscriptions and live tailing.
///
/// This module implements real-time event subscriptions. Subscribers receive
/// events committed after they subscribe, filtered by stream address or key.
///
/// Key features:
/// - Decoupled delivery (a slow subscriber never stalls the writer)
/// - Registration-order notification per committed event
/// - Idempotent, drop-based unsubscription
pub mod subscription;

/// Dedicated writer thread.
///
/// This module serializes all appends on one OS thread that owns the log
/// and the version index, making the version check and the durable write a
/// single critical section.
pub mod writer;

/// Async API for StreamVault.
///
/// This module provides the public async interface using Tokio. It wraps the
/// synchronous storage layer with async primitives, enabling non-blocking
/// usage from async applications.
///
/// The main entry point is [`StreamVault`](api::StreamVault).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{ReadStream, StoreConfig, StreamVault};
pub use error::{Error, Result};
pub use subscription::Subscription;

// Re-export commonly used types from the types module
pub use types::{
    Checkpoint, EventData, ExpectedVersion, LogPosition, RecordedEvent, StreamFilter, StreamId,
    StreamKey, StreamVersion, WriteResult,
};
