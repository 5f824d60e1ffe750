//! Statement validator - the read-only gate in front of the database
//!
//! SQL is tokenized with `sqlparser`, so comments and string literals are
//! recognized the same way a SQL engine would see them before any keyword is
//! inspected. The checks are lexical: they do not consult the schema and
//! cannot tell whether a function called from a SELECT has side effects.
//! The read-only connection opened by the backend covers that gap.

use sqlparser::dialect::SQLiteDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace, Word};

use crate::types::{GatewayError, PolicyViolation};

/// Mutating, DDL, DCL and transaction-control keywords
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop", "delete", "update", "insert", "merge", "truncate", "alter", "create", "grant",
    "revoke", "execute", "commit", "rollback", "savepoint",
];

/// Commands that can follow a CTE list
const CTE_COMMANDS: &[&str] = &["select", "insert", "update", "delete", "merge", "values"];

const UNION_ALL_GUIDANCE: &str = "Combine the result sets with a single SELECT using OR-ed \
     predicates, or aggregate with GROUP BY ROLLUP / GROUPING SETS instead.";

const INTO_GUIDANCE: &str = "SELECT ... INTO writes data; select the rows without INTO.";

/// A statement that passed every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
}

impl ValidatedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Validate that `sql` is a single, side-effect-free SELECT
pub fn validate(sql: &str) -> Result<ValidatedStatement, GatewayError> {
    let dialect = SQLiteDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| GatewayError::validation(format!("Could not parse SQL: {}", e)))?;

    reject_nested_comments(&tokens)?;
    reject_dollar_quotes(&tokens)?;

    let significant: Vec<&Token> = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect();

    let statement = single_statement(&significant)?;
    if statement.is_empty() {
        return Err(GatewayError::validation("SQL statement is empty"));
    }

    check_command(statement)?;
    check_keywords(statement)?;
    check_clauses(statement)?;

    Ok(ValidatedStatement {
        sql: sql.trim().to_string(),
    })
}

/// Engines disagree on whether block comments nest, so a comment that opens
/// another one could hide live SQL from one side
fn reject_nested_comments(tokens: &[Token]) -> Result<(), PolicyViolation> {
    let nested = tokens.iter().any(|t| {
        matches!(t, Token::Whitespace(Whitespace::MultiLineComment(body)) if body.contains("/*"))
    });
    if nested {
        return Err(PolicyViolation::NestedComment);
    }
    Ok(())
}

/// SQLite has no dollar-quoted strings: text between `$$` markers is live
/// SQL to the engine, so a terminator inside one starts a new statement
fn reject_dollar_quotes(tokens: &[Token]) -> Result<(), GatewayError> {
    for token in tokens {
        if let Token::DollarQuotedString(quoted) = token {
            if quoted.value.contains(';') {
                return Err(PolicyViolation::MultiStatement.into());
            }
            return Err(GatewayError::validation(
                "Dollar-quoted strings are not supported; use single-quoted literals",
            ));
        }
    }
    Ok(())
}

/// The tokens of the only statement; a single trailing terminator is allowed
fn single_statement<'a>(tokens: &'a [&'a Token]) -> Result<&'a [&'a Token], PolicyViolation> {
    match tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
        None => Ok(tokens),
        Some(end) if end + 1 == tokens.len() => Ok(&tokens[..end]),
        Some(_) => Err(PolicyViolation::MultiStatement),
    }
}

fn keyword(token: &Token) -> Option<String> {
    match token {
        Token::Word(Word {
            value,
            quote_style: None,
            ..
        }) => Some(value.to_ascii_lowercase()),
        _ => None,
    }
}

fn is_keyword(token: &Token, expected: &str) -> bool {
    keyword(token).is_some_and(|k| k == expected)
}

fn describe(token: Option<&&Token>) -> String {
    match token {
        Some(t) => keyword(t)
            .map(|k| k.to_ascii_uppercase())
            .unwrap_or_else(|| t.to_string()),
        None => "end of statement".to_string(),
    }
}

/// Index of the first token after any opening parentheses
fn skip_open_parens(tokens: &[&Token], from: usize) -> usize {
    let mut i = from;
    while matches!(tokens.get(i), Some(Token::LParen)) {
        i += 1;
    }
    i
}

fn check_command(tokens: &[&Token]) -> Result<(), PolicyViolation> {
    let start = skip_open_parens(tokens, 0);
    let command = match tokens.get(start) {
        Some(t) if is_keyword(t, "with") => command_after_ctes(tokens, start + 1),
        other => other.copied(),
    };

    match command {
        Some(t) if is_keyword(t, "select") => Ok(()),
        other => Err(PolicyViolation::NotSelect(describe(other.as_ref()))),
    }
}

/// The first command keyword at the nesting level of the WITH clause
fn command_after_ctes<'a>(tokens: &[&'a Token], from: usize) -> Option<&'a Token> {
    let mut depth = 0usize;
    for token in &tokens[from.min(tokens.len())..] {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 => {
                if let Some(k) = keyword(t) {
                    if CTE_COMMANDS.contains(&k.as_str()) {
                        return Some(*t);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn check_keywords(tokens: &[&Token]) -> Result<(), PolicyViolation> {
    for token in tokens {
        if let Some(k) = keyword(token) {
            if FORBIDDEN_KEYWORDS.contains(&k.as_str()) {
                return Err(PolicyViolation::ForbiddenKeyword(k));
            }
        }
    }
    Ok(())
}

fn check_clauses(tokens: &[&Token]) -> Result<(), PolicyViolation> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 && is_keyword(t, "into") => {
                return Err(PolicyViolation::ForbiddenClause {
                    clause: "SELECT ... INTO",
                    guidance: INTO_GUIDANCE,
                });
            }
            t if is_keyword(t, "union") => check_union(tokens, i + 1)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_union(tokens: &[&Token], next: usize) -> Result<(), PolicyViolation> {
    match tokens.get(next) {
        Some(t) if is_keyword(t, "all") => Err(PolicyViolation::ForbiddenClause {
            clause: "UNION ALL",
            guidance: UNION_ALL_GUIDANCE,
        }),
        _ => {
            let operand = skip_open_parens(tokens, next);
            match tokens.get(operand) {
                Some(t) if is_keyword(t, "select") => Ok(()),
                other => Err(PolicyViolation::MalformedUnion(describe(other))),
            }
        }
    }
}
