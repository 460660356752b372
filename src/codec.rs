//! # Record Framing Codec
//!
//! This module encodes a single event record to, and decodes it from, a
//! self-delimiting byte sequence. The log file is a plain concatenation of
//! framed records, so a reader can find record boundaries in a continuous
//! byte stream without any external index.
//!
//! ## Frame Layout
//!
//! All numbers are ASCII decimal, the event id is a hyphenated UUID, `US` is
//! the field separator (`0x1F`) and `RS` the record terminator (`0x1E`):
//!
//! ```text
//! cat_count US tenant US cat.. US id US event_id US event_type US version
//! US position US meta_len US meta_bytes US payload_len US payload_bytes RS
//! ```
//!
//! ## Reserved Bytes
//!
//! Three byte values are load-bearing for the framing:
//!
//! - `0x00` (`END_OF_DATA`): signals "nothing committed beyond this point
//!   within the current read buffer". Never written as content.
//! - `0x1E` (`RECORD_TERMINATOR`): ends a frame. Never legal inside content.
//! - `0x1F` (`FIELD_SEPARATOR`): splits fields. Illegal inside string fields;
//!   legal inside metadata/payload because those are length-prefixed.
//!
//! The encoder **refuses** input whose raw bytes would collide with a
//! reserved byte ([`crate::Error::Encoding`]) instead of silently truncating
//! at the colliding byte. An embedded zero byte in a payload would otherwise
//! be indistinguishable from end-of-data and corrupt the parse.
//!
//! ## Integrity
//!
//! The record's assigned log position is embedded in the frame and
//! cross-checked against the cursor offset on decode. A mismatch means the
//! bytes were read at the wrong offset (or rewritten) and surfaces as
//! [`crate::Error::CorruptRecord`].

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{EventData, LogPosition, RecordedEvent, StreamId, StreamVersion};

// =============================================================================
// Reserved Bytes
// =============================================================================

/// Sentinel meaning "no further data exists" within a read buffer.
pub const END_OF_DATA: u8 = 0x00;

/// Terminates one framed record.
pub const RECORD_TERMINATOR: u8 = 0x1E;

/// Separates fields within a frame.
pub const FIELD_SEPARATOR: u8 = 0x1F;

// =============================================================================
// Encoding
// =============================================================================

/// Encodes one event into a framed record.
///
/// `version` and `position` are the values the engine assigns at commit time.
///
/// # Errors
///
/// [`Error::Encoding`] if any string field contains `0x00`, `0x1E`, or
/// `0x1F`, or if metadata/payload contain `0x00` or `0x1E`. Nothing is
/// written anywhere on rejection; this runs before any I/O.
pub fn encode_record(
    event: &EventData,
    version: StreamVersion,
    position: LogPosition,
) -> Result<Vec<u8>> {
    validate_str_field("tenant", event.stream_id.tenant())?;
    for category in event.stream_id.categories() {
        validate_str_field("category", category)?;
    }
    validate_str_field("id", event.stream_id.id())?;
    validate_str_field("event type", &event.event_type)?;
    validate_bytes_field("metadata", &event.metadata)?;
    validate_bytes_field("payload", &event.payload)?;

    let mut frame = Vec::with_capacity(
        64 + event.event_type.len()
            + event.stream_id.to_string().len()
            + event.metadata.len()
            + event.payload.len(),
    );

    push_number(&mut frame, event.stream_id.categories().len() as u64);
    push_str(&mut frame, event.stream_id.tenant());
    for category in event.stream_id.categories() {
        push_str(&mut frame, category);
    }
    push_str(&mut frame, event.stream_id.id());
    push_str(&mut frame, &event.event_id.to_string());
    push_str(&mut frame, &event.event_type);
    push_number(&mut frame, version.as_raw());
    push_number(&mut frame, position.as_raw());
    push_number(&mut frame, event.metadata.len() as u64);
    frame.extend_from_slice(&event.metadata);
    frame.push(FIELD_SEPARATOR);
    push_number(&mut frame, event.payload.len() as u64);
    frame.extend_from_slice(&event.payload);
    frame.push(RECORD_TERMINATOR);

    Ok(frame)
}

fn validate_str_field(name: &str, value: &str) -> Result<()> {
    for &b in value.as_bytes() {
        if b == END_OF_DATA || b == RECORD_TERMINATOR || b == FIELD_SEPARATOR {
            return Err(Error::Encoding(format!(
                "{} contains reserved framing byte 0x{:02x}",
                name, b
            )));
        }
    }
    Ok(())
}

fn validate_bytes_field(name: &str, value: &[u8]) -> Result<()> {
    for &b in value {
        if b == END_OF_DATA || b == RECORD_TERMINATOR {
            return Err(Error::Encoding(format!(
                "{} contains reserved framing byte 0x{:02x}",
                name, b
            )));
        }
    }
    Ok(())
}

fn push_str(frame: &mut Vec<u8>, value: &str) {
    frame.extend_from_slice(value.as_bytes());
    frame.push(FIELD_SEPARATOR);
}

fn push_number(frame: &mut Vec<u8>, value: u64) {
    frame.extend_from_slice(value.to_string().as_bytes());
    frame.push(FIELD_SEPARATOR);
}

// =============================================================================
// Decoding
// =============================================================================

/// Outcome of attempting to decode the next record from a byte window.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A whole record was decoded; `consumed` bytes (including the
    /// terminator) can be dropped from the front of the window.
    Complete {
        event: RecordedEvent,
        consumed: usize,
    },

    /// No terminator in the window yet; feed more bytes and try again.
    NeedMoreData,

    /// The window starts with the end-of-data sentinel. Nothing committed
    /// lies beyond this point in the current buffer.
    EndOfData,
}

/// Decodes the next record from the front of `buf`.
///
/// `base_offset` is the absolute log offset of `buf[0]` and must be a record
/// boundary; it becomes the decoded record's [`LogPosition`] and is checked
/// against the position embedded in the frame.
///
/// # Errors
///
/// [`Error::CorruptRecord`] if a terminator is present but the framed unit in
/// front of it cannot be parsed, or if the embedded position disagrees with
/// `base_offset`.
pub fn decode_next(buf: &[u8], base_offset: u64) -> Result<DecodeOutcome> {
    if buf.is_empty() {
        return Ok(DecodeOutcome::NeedMoreData);
    }
    if buf[0] == END_OF_DATA {
        return Ok(DecodeOutcome::EndOfData);
    }

    let terminator = match buf.iter().position(|&b| b == RECORD_TERMINATOR) {
        Some(idx) => idx,
        None => return Ok(DecodeOutcome::NeedMoreData),
    };

    let unit = &buf[..terminator];
    let event = parse_unit(unit, base_offset)?;

    Ok(DecodeOutcome::Complete {
        event,
        consumed: terminator + 1,
    })
}

/// Parses one terminator-stripped frame unit.
fn parse_unit(unit: &[u8], base_offset: u64) -> Result<RecordedEvent> {
    let mut cursor = FieldCursor::new(unit, base_offset);

    let cat_count = cursor.take_number("category count")?;
    let tenant = cursor.take_str("tenant")?.to_string();
    let mut categories = Vec::with_capacity(cat_count as usize);
    for _ in 0..cat_count {
        categories.push(cursor.take_str("category")?.to_string());
    }
    let id = cursor.take_str("id")?.to_string();
    let event_id_text = cursor.take_str("event id")?;
    let event_id = Uuid::parse_str(event_id_text)
        .map_err(|e| cursor.corrupt(format!("bad event id: {}", e)))?;
    let event_type = cursor.take_str("event type")?.to_string();
    let version = cursor.take_number("version")?;
    let position = cursor.take_number("position")?;
    let meta_len = cursor.take_number("metadata length")?;
    let metadata = cursor.take_bytes("metadata", meta_len as usize)?.to_vec();
    cursor.expect_separator("metadata")?;
    let payload_len = cursor.take_number("payload length")?;
    let payload = cursor.take_bytes("payload", payload_len as usize)?.to_vec();
    cursor.expect_end()?;

    if position != base_offset {
        return Err(Error::CorruptRecord {
            offset: base_offset,
            reason: format!(
                "embedded position {} disagrees with read offset {}",
                position, base_offset
            ),
        });
    }

    Ok(RecordedEvent {
        stream_id: StreamId::new(tenant, categories, id),
        event_id,
        event_type,
        metadata,
        payload,
        version: StreamVersion::from_raw(version),
        position: LogPosition::from_raw(position),
    })
}

/// Sequential field parser over one frame unit.
struct FieldCursor<'a> {
    unit: &'a [u8],
    pos: usize,
    base_offset: u64,
}

impl<'a> FieldCursor<'a> {
    fn new(unit: &'a [u8], base_offset: u64) -> Self {
        Self {
            unit,
            pos: 0,
            base_offset,
        }
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::CorruptRecord {
            offset: self.base_offset,
            reason,
        }
    }

    /// Consumes bytes up to the next separator as UTF-8 text.
    fn take_str(&mut self, field: &str) -> Result<&'a str> {
        let start = self.pos;
        let rel = self.unit[start..]
            .iter()
            .position(|&b| b == FIELD_SEPARATOR)
            .ok_or_else(|| self.corrupt(format!("missing separator after {}", field)))?;
        self.pos = start + rel + 1;
        std::str::from_utf8(&self.unit[start..start + rel])
            .map_err(|_| self.corrupt(format!("{} is not valid utf-8", field)))
    }

    /// Consumes an ASCII decimal field.
    fn take_number(&mut self, field: &str) -> Result<u64> {
        let text = self.take_str(field)?;
        text.parse::<u64>()
            .map_err(|_| self.corrupt(format!("{} is not a number: '{}'", field, text)))
    }

    /// Consumes exactly `len` raw bytes (no separator scan; the bytes may
    /// legally contain the separator).
    fn take_bytes(&mut self, field: &str, len: usize) -> Result<&'a [u8]> {
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.unit.len())
            .ok_or_else(|| {
                self.corrupt(format!("{} length {} overruns the record", field, len))
            })?;
        self.pos = end;
        Ok(&self.unit[start..end])
    }

    fn expect_separator(&mut self, field: &str) -> Result<()> {
        if self.unit.get(self.pos) != Some(&FIELD_SEPARATOR) {
            return Err(self.corrupt(format!("missing separator after {}", field)));
        }
        self.pos += 1;
        Ok(())
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.unit.len() {
            return Err(self.corrupt(format!(
                "{} trailing bytes after payload",
                self.unit.len() - self.pos
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
