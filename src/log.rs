//! # Durable Append-Only Log
//!
//! This module owns the on-disk log file. It provides:
//!
//! - [`LogStore`]: the single append handle. Writes are framed bytes followed
//!   by a flush; the [`Checkpoint`] advances only after the flush succeeds.
//! - [`LogReader`]: a resumable block reader that decodes whole records from
//!   fixed-size block reads, buffering records split across block boundaries.
//! - Recovery: a full scan from offset 0 that recomputes the checkpoint and
//!   replays every record so the version index can be rebuilt.
//!
//! ## Invariant: Checkpoint Is the Only Truth
//!
//! The checkpoint is never persisted separately. It is always recomputable
//! from the file, and after a restart the recovery scan is its sole source.
//! Readers are bounded by a checkpoint snapshot taken when the read starts,
//! so a reader never races a concurrent, possibly partial, write.
//!
//! ## Invariant: Offsets Are Positions
//!
//! A record's [`LogPosition`] is the physical byte offset of its frame. For
//! that to hold, the file must never contain committed records after
//! non-record bytes. A failed write therefore rolls the physical file back to
//! the checkpoint; if the rollback itself fails, the store poisons itself and
//! refuses further appends.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::{decode_next, DecodeOutcome};
use crate::error::{Error, Result};
use crate::types::{Checkpoint, LogPosition, RecordedEvent, StreamId, StreamVersion};

// =============================================================================
// Configuration
// =============================================================================

/// Name of the log file within the data directory.
pub const DATA_FILE_NAME: &str = "chunk.dat";

/// Default block size for reads.
pub const DEFAULT_READ_BLOCK_SIZE: usize = 4096;

// =============================================================================
// Recovery
// =============================================================================

/// Per-record summary produced by the recovery scan, enough to rebuild the
/// version index without holding payloads in memory.
#[derive(Debug, Clone)]
pub struct ReplayedRecord {
    pub stream_id: StreamId,
    pub version: StreamVersion,
    pub position: LogPosition,
}

/// What the recovery scan found.
#[derive(Debug)]
pub struct RecoveryReport {
    /// Offset immediately following the last successfully decoded record.
    pub checkpoint: Checkpoint,

    /// Every decoded record, in log order.
    pub replayed: Vec<ReplayedRecord>,

    /// Bytes past the checkpoint that were discarded as an uncommitted write
    /// artifact (partial tail, sentinel padding, or a corrupt region).
    pub discarded_bytes: u64,
}

// =============================================================================
// Log Store (write side)
// =============================================================================

/// The exclusive owner of the on-disk log file's write path.
///
/// Exactly one `LogStore` exists per store instance, held by the writer's
/// critical section. No other component mutates log bytes.
pub struct LogStore {
    path: PathBuf,
    file: File,
    checkpoint: Checkpoint,
    block_size: usize,
    poisoned: bool,
}

impl LogStore {
    /// Opens (creating if necessary) the log under `data_dir` and runs
    /// recovery.
    ///
    /// Recovery scans the entire file sequentially, computes the checkpoint
    /// as the offset after the last decodable record, and truncates any
    /// partial or corrupt tail so the next append resumes cleanly from the
    /// checkpoint. The anomaly, if any, is reported via `tracing::warn!`.
    pub fn open(data_dir: &Path, block_size: usize) -> Result<(Self, RecoveryReport)> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DATA_FILE_NAME);

        // Ensure the file exists before scanning it.
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let report = recover(&path, block_size)?;

        let physical_len = file.metadata()?.len();
        if physical_len > report.checkpoint.as_raw() {
            tracing::warn!(
                checkpoint = report.checkpoint.as_raw(),
                discarded = physical_len - report.checkpoint.as_raw(),
                path = %path.display(),
                "discarding uncommitted log tail during recovery"
            );
            file.set_len(report.checkpoint.as_raw())?;
        }

        Ok((
            Self {
                path,
                file,
                checkpoint: report.checkpoint,
                block_size,
                poisoned: false,
            },
            report,
        ))
    }

    /// The current checkpoint: total bytes durably committed.
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The block size readers opened through this store use.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Appends pre-framed bytes, flushes to durable storage, and returns the
    /// new checkpoint.
    ///
    /// On any I/O failure the checkpoint does not move and the physical file
    /// is rolled back to it, so the append fails atomically from the caller's
    /// point of view. The write is never retried internally: bytes that did
    /// reach the disk cannot be safely un-written, only truncated away.
    pub fn append_raw(&mut self, frame: &[u8]) -> Result<Checkpoint> {
        if self.poisoned {
            return Err(Error::Durability(io::Error::new(
                io::ErrorKind::Other,
                "log store poisoned by an earlier failed write",
            )));
        }
        if frame.is_empty() {
            return Ok(self.checkpoint);
        }

        let outcome = self
            .file
            .write_all(frame)
            .and_then(|()| self.file.sync_data());

        match outcome {
            Ok(()) => {
                self.checkpoint = self.checkpoint.advance(frame.len() as u64);
                Ok(self.checkpoint)
            }
            Err(e) => {
                // Roll the file back so offsets and positions never diverge.
                if self.file.set_len(self.checkpoint.as_raw()).is_err() {
                    self.poisoned = true;
                    tracing::error!(
                        checkpoint = self.checkpoint.as_raw(),
                        path = %self.path.display(),
                        "failed to roll back a failed append; store is poisoned"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Opens a reader over this store's already-committed bytes.
    ///
    /// The reader is bounded by the checkpoint at the moment of this call.
    pub fn reader(&self) -> Result<LogReader> {
        LogReader::open(&self.path, LogPosition::START, self.checkpoint, self.block_size)
    }
}

// =============================================================================
// Log Reader (read side)
// =============================================================================

/// A lazy, restartable reader over committed log bytes.
///
/// Streams the file in fixed-size blocks and decodes whole records only; a
/// record split across a block boundary is buffered and completed on the
/// next block. The reader stops at its `limit` (a checkpoint snapshot) or at
/// the end-of-data sentinel, whichever comes first. A partial, undecodable
/// tail at the limit is discarded silently as an uncommitted write artifact;
/// malformed bytes in front of a terminator surface as
/// [`Error::CorruptRecord`].
pub struct LogReader {
    file: File,
    block_size: usize,
    /// Absolute byte bound; nothing at or past this offset is read.
    limit: u64,
    /// Buffered bytes not yet decoded.
    pending: Vec<u8>,
    /// Absolute offset of `pending[0]`; always a record boundary.
    boundary: u64,
    /// Absolute offset of the next file read.
    read_cursor: u64,
    finished: bool,
}

impl LogReader {
    /// Opens a reader starting at `start` (which must be a previously
    /// observed record boundary, or 0) bounded by `limit`.
    pub fn open(
        path: &Path,
        start: LogPosition,
        limit: Checkpoint,
        block_size: usize,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start.as_raw()))?;
        Ok(Self {
            file,
            block_size: block_size.max(1),
            limit: limit.as_raw(),
            pending: Vec::new(),
            boundary: start.as_raw(),
            read_cursor: start.as_raw(),
            finished: false,
        })
    }

    /// The record boundary the reader has advanced to: the position of the
    /// next record it would yield. After the reader finishes, this is the
    /// offset following the last successfully decoded record.
    pub fn position(&self) -> LogPosition {
        LogPosition::from_raw(self.boundary)
    }

    /// True if the reader stopped with undecoded bytes still buffered (a
    /// partial tail).
    pub fn has_partial_tail(&self) -> bool {
        self.finished && !self.pending.is_empty()
    }

    /// Decodes and returns the next committed record, or `None` at the end
    /// of committed data.
    pub fn next_record(&mut self) -> Result<Option<RecordedEvent>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match decode_next(&self.pending, self.boundary)? {
                DecodeOutcome::Complete { event, consumed } => {
                    self.pending.drain(..consumed);
                    self.boundary += consumed as u64;
                    return Ok(Some(event));
                }
                DecodeOutcome::EndOfData => {
                    // The sentinel marks committed padding, not data; never
                    // scan past it for more records.
                    self.finished = true;
                    return Ok(None);
                }
                DecodeOutcome::NeedMoreData => {
                    if !self.fill_block()? {
                        self.finished = true;
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Reads the next block into the pending buffer. Returns false once the
    /// limit (or the physical end of file) is reached.
    fn fill_block(&mut self) -> Result<bool> {
        if self.read_cursor >= self.limit {
            return Ok(false);
        }
        let want = (self.limit - self.read_cursor).min(self.block_size as u64) as usize;
        let mut block = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut block[filled..])?;
            if n == 0 {
                break; // physical end of file before the limit
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(false);
        }
        self.read_cursor += filled as u64;
        self.pending.extend_from_slice(&block[..filled]);
        Ok(true)
    }
}

// =============================================================================
// Recovery Scan
// =============================================================================

/// Scans the whole file, decoding sequentially, and computes the checkpoint
/// as the offset immediately following the last successfully decoded record.
///
/// Unlike a live read, a corrupt region does not fail recovery: the
/// checkpoint is truncated to the last good record and the anomaly reported.
pub fn recover(path: &Path, block_size: usize) -> Result<RecoveryReport> {
    let physical_len = std::fs::metadata(path)?.len();
    let mut reader = LogReader::open(
        path,
        LogPosition::START,
        Checkpoint::from_raw(physical_len),
        block_size,
    )?;

    let mut replayed = Vec::new();
    loop {
        match reader.next_record() {
            Ok(Some(event)) => {
                replayed.push(ReplayedRecord {
                    stream_id: event.stream_id,
                    version: event.version,
                    position: event.position,
                });
            }
            Ok(None) => break,
            Err(Error::CorruptRecord { offset, reason }) => {
                tracing::warn!(
                    offset,
                    %reason,
                    "recovery stopped at a corrupt record; truncating checkpoint to last good record"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    let checkpoint = Checkpoint::from_raw(reader.position().as_raw());
    Ok(RecoveryReport {
        checkpoint,
        discarded_bytes: physical_len - checkpoint.as_raw(),
        replayed,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_record, END_OF_DATA};
    use crate::types::EventData;

    fn temp_store(block_size: usize) -> (tempfile::TempDir, LogStore, RecoveryReport) {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let (store, report) = LogStore::open(dir.path(), block_size).expect("open log store");
        (dir, store, report)
    }

    fn sample_frame(local_id: &str, version: u64, position: u64) -> Vec<u8> {
        let event = EventData::new(
            StreamId::new("t1", ["Orders"], local_id),
            "OrderPlaced",
            b"meta".to_vec(),
            format!("payload-{}", local_id).into_bytes(),
        );
        encode_record(
            &event,
            StreamVersion::from_raw(version),
            LogPosition::from_raw(position),
        )
        .unwrap()
    }

    #[test]
    fn test_open_empty_log() {
        let (_dir, store, report) = temp_store(DEFAULT_READ_BLOCK_SIZE);
        assert_eq!(store.checkpoint(), Checkpoint::ZERO);
        assert!(report.replayed.is_empty());
        assert_eq!(report.discarded_bytes, 0);
    }

    #[test]
    fn test_append_advances_checkpoint_by_frame_length() {
        let (_dir, mut store, _) = temp_store(DEFAULT_READ_BLOCK_SIZE);

        let frame1 = sample_frame("A", 0, 0);
        let cp1 = store.append_raw(&frame1).unwrap();
        assert_eq!(cp1.as_raw(), frame1.len() as u64);

        let frame2 = sample_frame("A", 1, cp1.as_raw());
        let cp2 = store.append_raw(&frame2).unwrap();
        assert_eq!(cp2.as_raw(), (frame1.len() + frame2.len()) as u64);
        assert!(cp2 > cp1);
    }

    #[test]
    fn test_reader_roundtrip_with_tiny_blocks() {
        // A 7-byte block size guarantees every record spans block boundaries.
        let (_dir, mut store, _) = temp_store(7);

        let frame1 = sample_frame("A", 0, 0);
        store.append_raw(&frame1).unwrap();
        let frame2 = sample_frame("B", 0, frame1.len() as u64);
        store.append_raw(&frame2).unwrap();

        let mut reader = store.reader().unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.stream_id.id(), "A");
        assert_eq!(first.position, LogPosition::START);
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.stream_id.id(), "B");
        assert_eq!(second.position.as_raw(), frame1.len() as u64);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_reader_bounded_by_checkpoint_snapshot() {
        let (_dir, mut store, _) = temp_store(DEFAULT_READ_BLOCK_SIZE);

        let frame1 = sample_frame("A", 0, 0);
        store.append_raw(&frame1).unwrap();

        // Snapshot before the second append: the reader must not see it.
        let mut reader = store.reader().unwrap();
        let frame2 = sample_frame("B", 0, frame1.len() as u64);
        store.append_raw(&frame2).unwrap();

        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_reader_restartable_from_observed_position() {
        let (_dir, mut store, _) = temp_store(DEFAULT_READ_BLOCK_SIZE);

        let frame1 = sample_frame("A", 0, 0);
        store.append_raw(&frame1).unwrap();
        let frame2 = sample_frame("B", 0, frame1.len() as u64);
        store.append_raw(&frame2).unwrap();

        let mut reader = store.reader().unwrap();
        reader.next_record().unwrap().unwrap();
        let resume_at = reader.position();
        drop(reader);

        let mut resumed = LogReader::open(
            store.path(),
            resume_at,
            store.checkpoint(),
            DEFAULT_READ_BLOCK_SIZE,
        )
        .unwrap();
        let record = resumed.next_record().unwrap().unwrap();
        assert_eq!(record.stream_id.id(), "B");
    }

    #[test]
    fn test_recovery_discards_partial_tail_and_truncates() {
        let dir = tempfile::TempDir::new().unwrap();

        let frame1 = sample_frame("A", 0, 0);
        let frame2 = sample_frame("A", 1, frame1.len() as u64);
        {
            let (mut store, _) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
            store.append_raw(&frame1).unwrap();
            store.append_raw(&frame2).unwrap();
        }

        // Simulate a crash mid-write: a third record with its tail cut off.
        let frame3 = sample_frame("A", 2, (frame1.len() + frame2.len()) as u64);
        let path = dir.path().join(DATA_FILE_NAME);
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&frame3[..frame3.len() / 2]).unwrap();
        }

        let (mut store, report) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
        let expected_cp = (frame1.len() + frame2.len()) as u64;
        assert_eq!(report.checkpoint.as_raw(), expected_cp);
        assert_eq!(report.replayed.len(), 2);
        assert_eq!(report.discarded_bytes, (frame3.len() / 2) as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected_cp);

        // A subsequent append resumes cleanly from the checkpoint.
        store.append_raw(&frame3).unwrap();
        let mut reader = store.reader().unwrap();
        let mut versions = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            versions.push(record.version.as_raw());
        }
        assert_eq!(versions, vec![0, 1, 2]);
    }

    #[test]
    fn test_recovery_stops_at_sentinel_padding() {
        let dir = tempfile::TempDir::new().unwrap();

        let frame1 = sample_frame("A", 0, 0);
        {
            let (mut store, _) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
            store.append_raw(&frame1).unwrap();
        }

        // Zero padding after committed data, as a preallocating filesystem
        // or an interrupted write could leave behind.
        let path = dir.path().join(DATA_FILE_NAME);
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[END_OF_DATA; 64]).unwrap();
        }

        let (store, report) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
        assert_eq!(report.checkpoint.as_raw(), frame1.len() as u64);
        assert_eq!(report.replayed.len(), 1);
        assert_eq!(report.discarded_bytes, 64);
        assert_eq!(store.checkpoint().as_raw(), frame1.len() as u64);
    }

    #[test]
    fn test_recovery_truncates_corrupt_region() {
        let dir = tempfile::TempDir::new().unwrap();

        let frame1 = sample_frame("A", 0, 0);
        {
            let (mut store, _) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
            store.append_raw(&frame1).unwrap();
        }

        // A terminated but unparsable unit after the good record.
        let path = dir.path().join(DATA_FILE_NAME);
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"garbage\x1e").unwrap();
        }

        let (_store, report) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
        assert_eq!(report.checkpoint.as_raw(), frame1.len() as u64);
        assert_eq!(report.replayed.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), frame1.len() as u64);
    }

    #[test]
    fn test_live_read_surfaces_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let (mut store, _) = LogStore::open(dir.path(), DEFAULT_READ_BLOCK_SIZE).unwrap();
        let frame1 = sample_frame("A", 0, 0);
        store.append_raw(&frame1).unwrap();

        // Corrupt the frame structure out of band: the leading category count
        // is no longer a number.
        let path = dir.path().join(DATA_FILE_NAME);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'?';
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = store.reader().unwrap();
        let err = loop {
            match reader.next_record() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("corruption was not surfaced"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::CorruptRecord { .. }));
    }
}
