//! Bounded serializer
//!
//! Renders a page as a JSON array with one object per line. Records are
//! written one at a time against the byte budget; when the budget runs out
//! the output is cut back to the last record boundary that still leaves room
//! for the closing notice, so the result always parses.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::json;

use crate::normalize::Cell;
use crate::types::{GatewayError, RowPage};

pub const NO_RESULTS: &str = "No rows returned.";

/// Smallest budget that always fits both truncation notices
pub const MIN_MAX_BYTES: usize = 256;

const OPEN: &str = "[\n";
const SEPARATOR: &str = ",\n";
const CLOSE: &str = "\n]";

const ROW_LIMIT_MESSAGE: &str = "More rows available; increase max_rows to see them.";
const BYTE_LIMIT_MESSAGE: &str = "Output truncated; increase max_bytes to see more.";

/// One row rendered as column name to cell, in column order
struct Record<'a> {
    keys: &'a [String],
    cells: &'a [Cell],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.keys.len()))?;
        for (key, cell) in self.keys.iter().zip(self.cells) {
            map.serialize_entry(key, cell)?;
        }
        map.end()
    }
}

/// Key that marks a truncation notice; never emitted for a data column
const NOTICE_KEY: &str = "_truncated";

/// Keys for each column; repeated names and the notice key get a `#n` suffix
fn record_keys<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for name in names {
        let mut key = name.to_string();
        let mut n = 1;
        while key == NOTICE_KEY || keys.contains(&key) {
            n += 1;
            key = format!("{}#{}", name, n);
        }
        keys.push(key);
    }
    keys
}

fn row_notice() -> String {
    json!({"_truncated": "rows", "message": ROW_LIMIT_MESSAGE}).to_string()
}

fn byte_notice(rows_shown: usize) -> String {
    json!({"_truncated": "bytes", "message": BYTE_LIMIT_MESSAGE, "rows_shown": rows_shown})
        .to_string()
}

/// Serialize `page` into at most `max_bytes` bytes
///
/// The same page and budget always produce the same output.
pub fn serialize(page: &RowPage<Cell>, max_bytes: usize) -> Result<String, GatewayError> {
    if page.is_empty() {
        return Ok(NO_RESULTS.to_string());
    }

    let keys = record_keys(page.column_names());
    let mut writer = BoundedWriter::new(max_bytes, page.truncated.then(row_notice));

    for row in &page.rows {
        let record = serde_json::to_string(&Record { keys: &keys, cells: row })
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;
        if !writer.push_record(&record) {
            return Ok(writer.finish_truncated());
        }
    }
    Ok(writer.finish())
}

/// Incremental writer that remembers the last safe cut point
struct BoundedWriter {
    out: String,
    max_bytes: usize,
    records: usize,
    row_notice: Option<String>,
    /// Output length and record count of the last prefix that can still be
    /// closed with the truncation tail inside the budget
    safe: (usize, usize),
}

impl BoundedWriter {
    fn new(max_bytes: usize, row_notice: Option<String>) -> Self {
        Self {
            out: String::from(OPEN),
            max_bytes,
            records: 0,
            row_notice,
            safe: (OPEN.len(), 0),
        }
    }

    fn separator(records: usize) -> &'static str {
        if records == 0 {
            ""
        } else {
            SEPARATOR
        }
    }

    /// Length of the tail closing a prefix of `records` data records
    fn truncated_tail_len(&self, records: usize) -> usize {
        let mut len = 0;
        let mut written = records;
        if let Some(notice) = &self.row_notice {
            len += Self::separator(written).len() + notice.len();
            written += 1;
        }
        len + Self::separator(written).len() + byte_notice(records).len() + CLOSE.len()
    }

    /// Append a data record; `false` once the budget is exhausted
    fn push_record(&mut self, record: &str) -> bool {
        let sep = Self::separator(self.records);
        if self.out.len() + sep.len() + record.len() + CLOSE.len() > self.max_bytes {
            return false;
        }
        self.out.push_str(sep);
        self.out.push_str(record);
        self.records += 1;

        if self.out.len() + self.truncated_tail_len(self.records) <= self.max_bytes {
            self.safe = (self.out.len(), self.records);
        }
        true
    }

    /// Close a page whose records all fit
    fn finish(mut self) -> String {
        if let Some(notice) = self.row_notice.take() {
            let sep = Self::separator(self.records);
            if self.out.len() + sep.len() + notice.len() + CLOSE.len() > self.max_bytes {
                self.row_notice = Some(notice);
                return self.finish_truncated();
            }
            self.out.push_str(sep);
            self.out.push_str(&notice);
        }
        self.out.push_str(CLOSE);
        self.out
    }

    /// Cut back to the last safe boundary and append the notices
    fn finish_truncated(mut self) -> String {
        let (len, records) = self.safe;
        self.out.truncate(len);
        let mut written = records;
        if let Some(notice) = &self.row_notice {
            self.out.push_str(Self::separator(written));
            self.out.push_str(notice);
            written += 1;
        }
        self.out.push_str(Self::separator(written));
        self.out.push_str(&byte_notice(records));
        self.out.push_str(CLOSE);
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnDescriptor;
    use serde_json::Value;

    fn page(rows: usize, truncated: bool) -> RowPage<Cell> {
        RowPage {
            columns: vec![ColumnDescriptor::new("ID"), ColumnDescriptor::new("NAME")],
            rows: (0..rows)
                .map(|i| vec![Cell::Text(i.to_string()), Cell::Text(format!("name-{}", i))])
                .collect(),
            truncated,
        }
    }

    fn parse(text: &str) -> Vec<Value> {
        serde_json::from_str::<Vec<Value>>(text).unwrap()
    }

    #[test]
    fn test_empty_page_is_sentinel() {
        assert_eq!(serialize(&page(0, false), 10_000).unwrap(), NO_RESULTS);
    }

    #[test]
    fn test_full_page_round_trips() {
        let text = serialize(&page(3, false), 10_000).unwrap();
        let records = parse(&text);
        assert_eq!(records.len(), 3);
        for record in &records {
            let keys: Vec<&str> = record.as_object().unwrap().keys().map(String::as_str).collect();
            assert_eq!(keys.len(), 2);
            assert!(keys.contains(&"ID") && keys.contains(&"NAME"));
        }
        assert_eq!(records[2]["NAME"], "name-2");
        assert!(!text.contains("_truncated"));
    }

    #[test]
    fn test_column_order_preserved() {
        let text = serialize(&page(1, false), 10_000).unwrap();
        assert_eq!(text, "[\n{\"ID\":\"0\",\"NAME\":\"name-0\"}\n]");
    }

    #[test]
    fn test_null_cells_render_as_json_null() {
        let page = RowPage {
            columns: vec![ColumnDescriptor::new("A")],
            rows: vec![vec![Cell::Null], vec![Cell::ByteCount(3)]],
            truncated: false,
        };
        let records = parse(&serialize(&page, 1_000).unwrap());
        assert!(records[0]["A"].is_null());
        assert_eq!(records[1]["A"], "<BLOB: 3 bytes>");
    }

    #[test]
    fn test_duplicate_columns_get_suffix() {
        let page = RowPage {
            columns: vec![ColumnDescriptor::new("X"), ColumnDescriptor::new("X")],
            rows: vec![vec![Cell::Text("1".into()), Cell::Text("2".into())]],
            truncated: false,
        };
        let records = parse(&serialize(&page, 1_000).unwrap());
        assert_eq!(records[0]["X"], "1");
        assert_eq!(records[0]["X#2"], "2");
    }

    #[test]
    fn test_data_cannot_pose_as_notice() {
        let page = RowPage {
            columns: vec![ColumnDescriptor::new("_truncated"), ColumnDescriptor::new("message")],
            rows: vec![vec![Cell::Text("rows".into()), Cell::Text(ROW_LIMIT_MESSAGE.into())]],
            truncated: false,
        };
        let records = parse(&serialize(&page, 1_000).unwrap());
        assert_eq!(records.len(), 1);
        assert!(records[0].get("_truncated").is_none());
        assert_eq!(records[0]["_truncated#2"], "rows");
        assert_eq!(records[0]["message"], ROW_LIMIT_MESSAGE);
    }

    #[test]
    fn test_row_truncation_notice_appended() {
        let records = parse(&serialize(&page(2, true), 10_000).unwrap());
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["_truncated"], "rows");
    }

    #[test]
    fn test_byte_budget_enforced_on_record_boundary() {
        let full = serialize(&page(200, false), usize::MAX).unwrap();
        for max_bytes in [MIN_MAX_BYTES, 300, 517, 1_000, 4_096, full.len() - 1] {
            let text = serialize(&page(200, false), max_bytes).unwrap();
            assert!(text.len() <= max_bytes, "{} > {}", text.len(), max_bytes);

            let records = parse(&text);
            let notice = records.last().unwrap();
            assert_eq!(notice["_truncated"], "bytes");
            let shown = notice["rows_shown"].as_u64().unwrap() as usize;
            assert_eq!(shown, records.len() - 1);
            for (i, record) in records[..shown].iter().enumerate() {
                assert_eq!(record["ID"], i.to_string());
            }
        }
    }

    #[test]
    fn test_exact_fit_is_not_truncated() {
        let full = serialize(&page(5, false), usize::MAX).unwrap();
        assert_eq!(serialize(&page(5, false), full.len()).unwrap(), full);
    }

    #[test]
    fn test_both_notices_compose() {
        let text = serialize(&page(100, true), 600).unwrap();
        assert!(text.len() <= 600);
        let records = parse(&text);
        let n = records.len();
        assert_eq!(records[n - 2]["_truncated"], "rows");
        assert_eq!(records[n - 1]["_truncated"], "bytes");
    }

    #[test]
    fn test_row_notice_overflow_falls_back_to_truncation() {
        let without_notice = serialize(&page(20, false), usize::MAX).unwrap();
        let text = serialize(&page(20, true), without_notice.len() + 5).unwrap();
        assert!(text.len() <= without_notice.len() + 5);
        let records = parse(&text);
        assert_eq!(records.last().unwrap()["_truncated"], "bytes");
    }

    #[test]
    fn test_output_is_deterministic() {
        let p = page(50, true);
        assert_eq!(serialize(&p, 700).unwrap(), serialize(&p, 700).unwrap());
    }

    #[test]
    fn test_oversized_first_record() {
        let page = RowPage {
            columns: vec![ColumnDescriptor::new("BODY")],
            rows: vec![vec![Cell::Text("x".repeat(5_000))]],
            truncated: false,
        };
        let text = serialize(&page, 400).unwrap();
        assert!(text.len() <= 400);
        let records = parse(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["rows_shown"], 0);
    }
}
