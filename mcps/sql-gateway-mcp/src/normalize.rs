//! Value normalizer
//!
//! Turns raw column values into cells that can always be rendered. A value
//! that cannot be converted becomes an in-band error marker so one bad cell
//! never fails the whole page.

use serde::{Serialize, Serializer};

use crate::types::{RawValue, RowPage};

pub const FILE_REF_PLACEHOLDER: &str = "<BFILE: external file reference>";

/// A display-safe cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    Text(String),
    /// Large binary object, described by its size only
    ByteCount(u64),
    /// External file reference, never dereferenced
    FileRef,
    /// Conversion failed; carries the error message
    Error(String),
}

impl Cell {
    /// Text form, or `None` for SQL NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::ByteCount(n) => Some(format!("<BLOB: {} bytes>", n)),
            Cell::FileRef => Some(FILE_REF_PLACEHOLDER.to_string()),
            Cell::Error(e) => Some(format!("<display error: {}>", e)),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_text() {
            None => serializer.serialize_none(),
            Some(text) => serializer.serialize_str(&text),
        }
    }
}

/// Normalize one value; never fails
pub fn normalize(value: RawValue) -> Cell {
    match value {
        RawValue::Null => Cell::Null,
        RawValue::Boolean(b) => Cell::Text(b.to_string()),
        RawValue::Integer(i) => Cell::Text(i.to_string()),
        RawValue::Float(f) => Cell::Text(f.to_string()),
        RawValue::Text(s) => Cell::Text(s),
        RawValue::Bytes(bytes) => decode_utf8(bytes),
        RawValue::Blob(lob) => match lob.size() {
            Ok(size) => Cell::ByteCount(size),
            Err(e) => Cell::Error(e.message),
        },
        // Character LOBs are read in full; truncation is left to the byte budget
        RawValue::Clob(lob) => match lob.read() {
            Ok(bytes) => decode_utf8(bytes),
            Err(e) => Cell::Error(e.message),
        },
        RawValue::FileRef => Cell::FileRef,
    }
}

fn decode_utf8(bytes: Vec<u8>) -> Cell {
    match String::from_utf8(bytes) {
        Ok(text) => Cell::Text(text),
        Err(e) => Cell::Error(e.utf8_error().to_string()),
    }
}

impl RowPage<RawValue> {
    /// Normalize every cell, keeping row and column order
    pub fn normalize(self) -> RowPage<Cell> {
        RowPage {
            columns: self.columns,
            rows: self
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(normalize).collect())
                .collect(),
            truncated: self.truncated,
        }
    }
}
