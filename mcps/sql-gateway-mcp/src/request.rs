//! Request shape checks
//!
//! Everything here runs before a connection is touched: bind parameter
//! names and values, identifiers used in catalog lookups, and the row and
//! byte limits of a call.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::LimitsConfig;
use crate::serializer::MIN_MAX_BYTES;
use crate::types::{BindParams, BindValue, GatewayError};

/// Longest text bind value accepted
pub const MAX_TEXT_PARAM_CHARS: usize = 4000;

/// Longest identifier accepted for catalog lookups
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"));

fn is_identifier(name: &str) -> bool {
    IDENTIFIER_REGEX.is_match(name)
}

/// Reject SQL that is empty or longer than `max_chars`
pub fn check_sql_length(sql: &str, max_chars: usize) -> Result<(), GatewayError> {
    if sql.trim().is_empty() {
        return Err(GatewayError::validation("SQL statement is empty"));
    }
    let chars = sql.chars().count();
    if chars > max_chars {
        return Err(GatewayError::validation(format!(
            "SQL statement is too long ({} characters, maximum {})",
            chars, max_chars
        )));
    }
    Ok(())
}

/// Convert caller-supplied JSON into bind parameters
pub fn bind_params_from_json(params: Option<Value>) -> Result<BindParams, GatewayError> {
    let params = match params {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(GatewayError::validation(
                "params must be an object mapping parameter names to values",
            ));
        }
    };

    let mut bound = BindParams::new();
    for (name, value) in params {
        let value = match value {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Boolean(b),
            Value::String(s) => BindValue::Text(s),
            Value::Number(n) => match n.as_i64() {
                Some(i) => BindValue::Integer(i),
                None => BindValue::Float(n.as_f64().ok_or_else(|| {
                    GatewayError::validation(format!("Parameter '{}' is not a finite number", name))
                })?),
            },
            Value::Array(_) | Value::Object(_) => {
                return Err(GatewayError::validation(format!(
                    "Parameter '{}' must be a string, number, boolean or null",
                    name
                )));
            }
        };
        bound.insert(name, value);
    }
    check_bind_params(&bound)?;
    Ok(bound)
}

/// Check parameter names and value sizes
pub fn check_bind_params(params: &BindParams) -> Result<(), GatewayError> {
    for (name, value) in params {
        if !is_identifier(name) {
            return Err(GatewayError::validation(format!(
                "Invalid parameter name: {:?}",
                name
            )));
        }
        match value {
            BindValue::Text(s) if s.chars().count() > MAX_TEXT_PARAM_CHARS => {
                return Err(GatewayError::validation(format!(
                    "Parameter '{}' is too long (maximum {} characters)",
                    name, MAX_TEXT_PARAM_CHARS
                )));
            }
            BindValue::Float(f) if !f.is_finite() => {
                return Err(GatewayError::validation(format!(
                    "Parameter '{}' is not a finite number",
                    name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validate a table or schema name used in a catalog lookup
pub fn check_identifier(name: &str, what: &str) -> Result<(), GatewayError> {
    if name.len() > MAX_IDENTIFIER_LEN || !is_identifier(name) {
        return Err(GatewayError::validation(format!(
            "Invalid {}: {:?} (letters, digits and underscores only, at most {} characters)",
            what, name, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

/// Resolve the row limit of a call
pub fn resolve_max_rows(requested: Option<i64>, limits: &LimitsConfig) -> Result<usize, GatewayError> {
    let max_rows = match requested {
        None => limits.default_max_rows,
        Some(n) => usize::try_from(n).unwrap_or(0),
    };
    if max_rows == 0 || max_rows > limits.max_rows_ceiling {
        return Err(GatewayError::validation(format!(
            "max_rows must be between 1 and {}",
            limits.max_rows_ceiling
        )));
    }
    Ok(max_rows)
}

/// Resolve the byte budget of a call
pub fn resolve_max_bytes(requested: Option<i64>, limits: &LimitsConfig) -> Result<usize, GatewayError> {
    let max_bytes = match requested {
        None => limits.default_max_bytes,
        Some(n) => usize::try_from(n).unwrap_or(0),
    };
    if max_bytes < MIN_MAX_BYTES || max_bytes > limits.max_bytes_ceiling {
        return Err(GatewayError::validation(format!(
            "max_bytes must be between {} and {}",
            MIN_MAX_BYTES, limits.max_bytes_ceiling
        )));
    }
    Ok(max_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Option<Value> {
        Some(value)
    }

    #[test]
    fn test_scalar_params_accepted() {
        let params = bind_params_from_json(map(json!({
            "p1": 5, "ratio": 0.5, "name": "x", "flag": false, "none": null
        })))
        .unwrap();
        assert_eq!(params["p1"], BindValue::Integer(5));
        assert_eq!(params["ratio"], BindValue::Float(0.5));
        assert_eq!(params["none"], BindValue::Null);
        assert!(bind_params_from_json(None).unwrap().is_empty());
    }

    #[test]
    fn test_bad_param_names_rejected() {
        for name in ["1abc", "a-b", "a b", "x;drop", ""] {
            let mut params = Map::new();
            params.insert(name.to_string(), json!(1));
            assert!(
                matches!(
                    bind_params_from_json(Some(Value::Object(params))),
                    Err(GatewayError::Validation(_))
                ),
                "{:?} accepted",
                name
            );
        }
    }

    #[test]
    fn test_non_scalar_params_rejected() {
        assert!(bind_params_from_json(map(json!({"a": [1, 2]}))).is_err());
        assert!(bind_params_from_json(map(json!({"a": {"b": 1}}))).is_err());
    }

    #[test]
    fn test_params_must_be_an_object() {
        assert!(bind_params_from_json(Some(Value::Null)).unwrap().is_empty());
        for bad in [json!([1, 2]), json!("p1=5"), json!(5), json!(true)] {
            let err = bind_params_from_json(Some(bad)).unwrap_err();
            assert!(matches!(err, GatewayError::Validation(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_text_param_length_capped() {
        let ok = "é".repeat(MAX_TEXT_PARAM_CHARS);
        assert!(bind_params_from_json(map(json!({"a": ok}))).is_ok());
        let too_long = "a".repeat(MAX_TEXT_PARAM_CHARS + 1);
        assert!(bind_params_from_json(map(json!({"a": too_long}))).is_err());
    }

    #[test]
    fn test_sql_length_limits() {
        assert!(check_sql_length("SELECT 1", 100).is_ok());
        assert!(check_sql_length("  \n", 100).is_err());
        assert!(check_sql_length(&"x".repeat(101), 100).is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(check_identifier("EMPLOYEES", "table name").is_ok());
        assert!(check_identifier("_tmp_1", "table name").is_ok());
        for bad in ["emp;", "emp'--", "a\"b", "emp/*", "", "1emp"] {
            assert!(check_identifier(bad, "table name").is_err(), "{:?}", bad);
        }
        assert!(check_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1), "table name").is_err());
    }

    #[test]
    fn test_limits_resolution() {
        let limits = LimitsConfig::default();
        assert_eq!(resolve_max_rows(None, &limits).unwrap(), 100);
        assert!(resolve_max_rows(Some(0), &limits).is_err());
        assert!(resolve_max_rows(Some(limits.max_rows_ceiling as i64 + 1), &limits).is_err());
        assert_eq!(resolve_max_rows(Some(25), &limits).unwrap(), 25);
        assert_eq!(resolve_max_bytes(None, &limits).unwrap(), 10_000);
        assert!(resolve_max_bytes(Some(MIN_MAX_BYTES as i64 - 1), &limits).is_err());
    }

    #[test]
    fn test_negative_limits_rejected() {
        let limits = LimitsConfig::default();
        for n in [-1, -3, i64::MIN] {
            assert!(matches!(resolve_max_rows(Some(n), &limits), Err(GatewayError::Validation(_))));
            assert!(matches!(resolve_max_bytes(Some(n), &limits), Err(GatewayError::Validation(_))));
        }
    }
}
