//! Fixed-layout wire records exchanged between workers and the collector.
//!
//! Records carry no kind tag: the endpoint that delivered the bytes decides how they are
//! decoded. Layouts are native-endian and match the C struct layout, padding included.
use std::fmt::{self, Write as _};

use strum_macros::{AsRefStr, Display};

use crate::constants::{
    FLOAT_RECORD_SIZE, INT_RECORD_SIZE, MAX_TEXT_LEN, SOURCE_ID_LEN, STRING_RECORD_SIZE,
    TEXT_CAPACITY,
};
use crate::error::RecordError;

/// The three record shapes, one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RecordKind {
    Int,
    Float,
    Text,
}

impl RecordKind {
    /// Fixed wire size of a record of this kind.
    pub const fn wire_size(self) -> usize {
        match self {
            RecordKind::Int => INT_RECORD_SIZE,
            RecordKind::Float => FLOAT_RECORD_SIZE,
            RecordKind::Text => STRING_RECORD_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntRecord {
    pub source_id: i32,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatRecord {
    pub source_id: i32,
    pub value: f64,
}

/// A string record. The text never exceeds [`MAX_TEXT_LEN`] bytes, so the encoded buffer
/// always ends in NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRecord {
    source_id: i32,
    text: String,
}

impl StringRecord {
    /// Builds a record, truncating `text` on a character boundary to fit the buffer.
    pub fn new(source_id: i32, text: &str) -> Self {
        Self {
            source_id,
            text: truncate_to_boundary(text, MAX_TEXT_LEN).to_string(),
        }
    }

    pub fn source_id(&self) -> i32 {
        self.source_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// A decoded record of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Int(IntRecord),
    Float(FloatRecord),
    Text(StringRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Int(_) => RecordKind::Int,
            Record::Float(_) => RecordKind::Float,
            Record::Text(_) => RecordKind::Text,
        }
    }

    pub fn source_id(&self) -> i32 {
        match self {
            Record::Int(record) => record.source_id,
            Record::Float(record) => record.source_id,
            Record::Text(record) => record.source_id,
        }
    }

    /// Encodes the record into exactly `self.kind().wire_size()` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.kind().wire_size()];
        buf[..SOURCE_ID_LEN].copy_from_slice(&self.source_id().to_ne_bytes());
        match self {
            Record::Int(record) => {
                buf[SOURCE_ID_LEN..].copy_from_slice(&record.value.to_ne_bytes());
            }
            Record::Float(record) => {
                buf[FLOAT_VALUE_OFFSET..].copy_from_slice(&record.value.to_ne_bytes());
            }
            Record::Text(record) => {
                let bytes = record.text.as_bytes();
                buf[SOURCE_ID_LEN..SOURCE_ID_LEN + bytes.len()].copy_from_slice(bytes);
            }
        }
        buf
    }

    /// Decodes a record of `kind` from a buffer of exactly its wire size.
    pub fn decode(kind: RecordKind, bytes: &[u8]) -> Result<Record, RecordError> {
        let expected = kind.wire_size();
        if bytes.len() != expected {
            return Err(RecordError::Length {
                kind,
                expected,
                actual: bytes.len(),
            });
        }

        let source_id = i32::from_ne_bytes(read_array(bytes, 0));
        let record = match kind {
            RecordKind::Int => Record::Int(IntRecord {
                source_id,
                value: i32::from_ne_bytes(read_array(bytes, SOURCE_ID_LEN)),
            }),
            RecordKind::Float => Record::Float(FloatRecord {
                source_id,
                value: f64::from_ne_bytes(read_array(bytes, FLOAT_VALUE_OFFSET)),
            }),
            RecordKind::Text => {
                // Only the first MAX_TEXT_LEN bytes are text; the last byte is the terminator
                // even when a peer forgot to write one.
                let text = &bytes[SOURCE_ID_LEN..SOURCE_ID_LEN + MAX_TEXT_LEN];
                let end = text.iter().position(|b| *b == 0).unwrap_or(text.len());
                // Lossy replacement can grow the text, so cap it again.
                let lossy = String::from_utf8_lossy(&text[..end]);
                Record::Text(StringRecord::new(source_id, &lossy))
            }
        };
        Ok(record)
    }

    /// The value portion of the record, formatted for the log.
    pub fn value(&self) -> RecordValue<'_> {
        RecordValue(self)
    }
}

const FLOAT_VALUE_OFFSET: usize = FLOAT_RECORD_SIZE - 8;

const _: () = assert!(STRING_RECORD_SIZE == SOURCE_ID_LEN + TEXT_CAPACITY);

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Display adapter for a record's value.
pub struct RecordValue<'a>(&'a Record);

impl fmt::Display for RecordValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Record::Int(record) => write!(f, "{}", record.value),
            Record::Float(record) => write!(f, "{:.6}", record.value),
            // One record is one log line.
            Record::Text(record) => record.text.chars().try_for_each(|c| {
                if c.is_control() {
                    write!(f, "{}", c.escape_default())
                } else {
                    f.write_char(c)
                }
            }),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", self.kind(), self.source_id(), self.value())
    }
}
