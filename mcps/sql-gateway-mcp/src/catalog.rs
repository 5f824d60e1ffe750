//! Schema introspection and table listing
//!
//! Both lookups run fixed catalog queries through the bounded executor with
//! every caller value bound as a parameter. The only text spliced into SQL is
//! a schema name that has already passed [`request::check_identifier`].

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

use crate::backend::Backend;
use crate::executor::BoundedExecutor;
use crate::normalize::Cell;
use crate::request;
use crate::serializer;
use crate::types::{BindParams, BindValue, GatewayError, ListTablesRequest, RowPage, TableOrder};

/// Schema searched when the caller names no owner
pub const DEFAULT_SCHEMA: &str = "main";

/// Character that marks a table as internal
pub const INTERNAL_MARKER: char = '$';

const RULE: &str = "--------------------------------------------------------------------------------";

/// Keywords that start a table constraint rather than a column definition
const TABLE_CONSTRAINTS: &[&str] = &["constraint", "primary", "unique", "check", "foreign"];

static TYPE_SIZE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\)").expect("Invalid regex")
});

// ============================================================================
// describe_table
// ============================================================================

/// One column of a described table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub nullable: bool,
    pub type_name: String,
    pub comment: Option<String>,
}

impl ColumnInfo {
    /// Length or precision from the declared type: `40` or `10,2`
    pub fn size(&self) -> Option<String> {
        let caps = TYPE_SIZE_REGEX.captures(&self.type_name)?;
        Some(match caps.get(2) {
            Some(scale) => format!("{},{}", &caps[1], scale.as_str()),
            None => caps[1].to_string(),
        })
    }
}

pub fn describe_table<B: Backend>(
    executor: &BoundedExecutor<B>,
    table_name: &str,
    owner: Option<&str>,
) -> Result<String, GatewayError> {
    request::check_identifier(table_name, "table name")?;
    let schema = resolve_schema(owner)?;

    let mut params = BindParams::new();
    params.insert("table_name".into(), BindValue::Text(table_name.to_string()));
    params.insert("schema".into(), BindValue::Text(schema.to_string()));

    let columns = executor
        .run_sql(
            r#"SELECT name, "notnull", type FROM pragma_table_info(:table_name, :schema) ORDER BY cid"#,
            &params,
            None,
        )?
        .normalize();
    if columns.is_empty() {
        return Err(GatewayError::execution(format!(
            "Table '{}' not found in schema '{}'",
            table_name, schema
        )));
    }

    let mut params = BindParams::new();
    params.insert("table_name".into(), BindValue::Text(table_name.to_string()));
    let definition = executor
        .run_sql(
            &format!(
                "SELECT sql FROM \"{}\".sqlite_master WHERE name = :table_name COLLATE NOCASE AND type = 'table'",
                schema
            ),
            &params,
            Some(1),
        )?
        .normalize();
    let comments = definition
        .rows
        .first()
        .and_then(|row| row[0].as_text())
        .map(|sql| column_comments(&sql))
        .unwrap_or_default();

    let infos: Vec<ColumnInfo> = columns
        .rows
        .iter()
        .map(|row| {
            let name = text(&row[0]);
            ColumnInfo {
                comment: comments.get(&name.to_ascii_lowercase()).cloned(),
                nullable: text(&row[1]) == "0",
                type_name: text(&row[2]),
                name,
            }
        })
        .collect();

    Ok(format_description(table_name, &infos))
}

fn text(cell: &Cell) -> String {
    cell.as_text().unwrap_or_default()
}

/// Render the column listing
pub fn format_description(table_name: &str, columns: &[ColumnInfo]) -> String {
    let mut lines = vec![
        format!("Table: {}", table_name),
        RULE.to_string(),
        format!("{:<30} {:<5} {:<20} {:<8} {}", "Name", "Null?", "Type", "Length", "Comment"),
        RULE.to_string(),
    ];
    for column in columns {
        let line = format!(
            "{:<30} {:<5} {:<20} {:<8} {}",
            column.name,
            if column.nullable { "Y" } else { "N" },
            column.type_name,
            column.size().unwrap_or_default(),
            column.comment.as_deref().unwrap_or_default()
        );
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

/// Comments written after each column in a `CREATE TABLE` statement, keyed
/// by lowercased column name
pub fn column_comments(create_sql: &str) -> HashMap<String, String> {
    let dialect = SQLiteDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, create_sql).tokenize() else {
        return HashMap::new();
    };

    let mut comments: HashMap<String, String> = HashMap::new();
    let mut depth = 0usize;
    let mut expecting_name = false;
    let mut current: Option<String> = None;

    for token in &tokens {
        let comment = match token {
            Token::LParen => {
                depth += 1;
                expecting_name |= depth == 1;
                None
            }
            Token::RParen => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    current = None;
                }
                None
            }
            Token::Comma if depth == 1 => {
                expecting_name = true;
                None
            }
            Token::Whitespace(Whitespace::SingleLineComment { comment, .. }) => Some(comment.trim()),
            Token::Whitespace(Whitespace::MultiLineComment(body)) => Some(body.trim()),
            Token::Whitespace(_) | Token::EOF => None,
            Token::Word(word) if expecting_name => {
                expecting_name = false;
                let lower = word.value.to_ascii_lowercase();
                current = (word.quote_style.is_some() || !TABLE_CONSTRAINTS.contains(&lower.as_str()))
                    .then_some(lower);
                None
            }
            _ => {
                expecting_name = false;
                None
            }
        };

        if let (Some(comment), Some(column)) = (comment.filter(|c| !c.is_empty()), &current) {
            comments
                .entry(column.clone())
                .and_modify(|existing| {
                    existing.push(' ');
                    existing.push_str(comment);
                })
                .or_insert_with(|| comment.to_string());
        }
    }
    comments
}

// ============================================================================
// list_tables
// ============================================================================

pub fn list_tables<B: Backend>(
    executor: &BoundedExecutor<B>,
    request: &ListTablesRequest,
) -> Result<String, GatewayError> {
    let schema = resolve_schema(request.owner.as_deref())?;

    let mut params = BindParams::new();
    params.insert("schema".into(), BindValue::Text(schema.to_string()));

    let mut sql = format!(
        "SELECT l.name AS TABLE_NAME, l.schema AS OWNER, upper(l.type) AS TABLE_TYPE, l.ncol AS COLUMNS \
         FROM pragma_table_list AS l \
         LEFT JOIN \"{}\".sqlite_master AS m ON m.name = l.name AND m.type IN ('table', 'view') \
         WHERE l.schema = :schema COLLATE NOCASE",
        schema
    );
    if let Some(pattern) = request.name_pattern.as_deref().filter(|p| !p.is_empty()) {
        if pattern.chars().count() > request::MAX_TEXT_PARAM_CHARS {
            return Err(GatewayError::validation("name_pattern is too long"));
        }
        sql.push_str(" AND l.name LIKE :name_pattern");
        params.insert("name_pattern".into(), BindValue::Text(pattern.to_string()));
    }
    if !request.include_internal {
        sql.push_str(
            " AND l.type <> 'shadow' AND instr(l.name, :marker) = 0 AND l.name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
        );
        params.insert("marker".into(), BindValue::Text(INTERNAL_MARKER.to_string()));
    }
    sql.push_str(match request.order_by {
        TableOrder::Name => " ORDER BY l.name",
        // SQLite keeps no creation time; catalog order is creation order
        TableOrder::Created => " ORDER BY m.rowid, l.name",
    });

    let page: RowPage<Cell> = executor
        .run_sql(&sql, &params, Some(request.max_rows))?
        .normalize();
    serializer::serialize(&page, request.max_bytes)
}

fn resolve_schema(owner: Option<&str>) -> Result<&str, GatewayError> {
    match owner.filter(|o| !o.is_empty()) {
        Some(owner) => {
            request::check_identifier(owner, "owner")?;
            Ok(owner)
        }
        None => Ok(DEFAULT_SCHEMA),
    }
}
