//! Operator-authored statements: read-only screening, limit injection and
//! output-format normalisation.

use super::{
    ident::is_valid_identifier,
    params::{Bindings, CompiledStatement, ParamValue},
};
use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "TRUNCATE", "DELETE", "ALTER", "DETACH", "ATTACH", "RENAME", "KILL",
];

/// Output format every ad-hoc statement is forced into.
pub const OUTPUT_FORMAT: &str = "JSONEachRow";

#[derive(Debug, Clone, Deserialize)]
pub struct AdhocRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdhocResult {
    pub data: Vec<Value>,
    pub row_count: usize,
    /// Wall-clock execution time in milliseconds.
    pub duration: u64,
}

/// Screens and rewrites `query` for execution with a row cap of `limit`.
pub fn compile(query: &str, limit: u64) -> Result<CompiledStatement> {
    let statement = strip_terminators(query);
    if statement.is_empty() {
        return Err(ServiceError::invalid("query must not be empty"));
    }
    if limit == 0 {
        return Err(ServiceError::invalid("limit must be at least 1"));
    }

    let upper = statement.to_ascii_uppercase();
    if let Some(keyword) = BLOCKED_KEYWORDS
        .iter()
        .find(|keyword| upper.starts_with(*keyword))
    {
        return Err(ServiceError::invalid(format!(
            "{keyword} statements are not allowed"
        )));
    }

    let (body, had_format) = strip_format(statement);
    let mut params = Bindings::new();
    let mut sql = body.to_string();

    if needs_limit(body) {
        let placeholder = params.bind_named("limit", ParamValue::UInt64(limit));
        sql.push_str(" LIMIT ");
        sql.push_str(&placeholder);
    }
    if had_format {
        sql.push_str(" FORMAT ");
        sql.push_str(OUTPUT_FORMAT);
    }

    Ok(CompiledStatement::new(sql, params))
}

pub(super) fn strip_terminators(query: &str) -> &str {
    query.trim().trim_end_matches(|ch: char| ch == ';' || ch.is_whitespace())
}

/// Splits off a trailing `FORMAT <name>` directive.
pub(super) fn strip_format(statement: &str) -> (&str, bool) {
    let Some((head, format)) = statement.rsplit_once(char::is_whitespace) else {
        return (statement, false);
    };
    if !is_valid_identifier(format) {
        return (statement, false);
    }
    match head.trim_end().rsplit_once(char::is_whitespace) {
        Some((body, keyword)) if keyword.eq_ignore_ascii_case("FORMAT") => (body.trim_end(), true),
        _ => (statement, false),
    }
}

fn needs_limit(body: &str) -> bool {
    let words: Vec<&str> = body
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|word| !word.is_empty())
        .collect();

    let is_select = words
        .first()
        .is_some_and(|first| first.eq_ignore_ascii_case("SELECT") || first.eq_ignore_ascii_case("WITH"));
    let has_limit = words.iter().any(|word| word.eq_ignore_ascii_case("LIMIT"));

    is_select && !has_limit && !body.ends_with(')')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn destructive_statements_are_rejected() {
        for query in [
            "DROP TABLE x",
            "  truncate table system.query_log",
            "Delete FROM t WHERE 1",
            "ALTER TABLE t DELETE WHERE 1",
            "detach table t",
            "ATTACH TABLE t",
            "RENAME TABLE a TO b",
            "KILL QUERY WHERE 1",
        ] {
            let err = compile(query, 100).unwrap_err();
            assert!(
                matches!(err, ServiceError::InvalidRequest(_)),
                "{query} should be rejected"
            );
        }
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(compile("   ;  ", 100).is_err());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = compile("SELECT 1", 0).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)), "{err:?}");
        assert!(compile("SELECT 1", 1).is_ok());
    }

    #[test]
    fn plain_select_gets_bound_limit() {
        let statement = compile("SELECT * FROM t", 1000).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM t LIMIT {limit:UInt64}");
        assert_eq!(statement.params.get("limit"), Some(&ParamValue::UInt64(1000)));
    }

    #[test]
    fn trailing_semicolons_are_dropped() {
        let statement = compile("select 1;;\n", 5).unwrap();
        assert_eq!(statement.sql, "select 1 LIMIT {limit:UInt64}");
    }

    #[test]
    fn existing_limit_is_respected() {
        let statement = compile("SELECT * FROM t limit 5", 1000).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM t limit 5");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn trailing_subquery_is_left_alone() {
        let statement = compile("SELECT * FROM t WHERE id IN (SELECT id FROM u)", 10).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM t WHERE id IN (SELECT id FROM u)");
    }

    #[test]
    fn non_select_statements_pass_through() {
        let statement = compile("SHOW TABLES FROM system", 10).unwrap();
        assert_eq!(statement.sql, "SHOW TABLES FROM system");
    }

    #[test]
    fn with_clause_counts_as_select() {
        let statement = compile("WITH 1 AS x SELECT x", 10).unwrap();
        assert_eq!(statement.sql, "WITH 1 AS x SELECT x LIMIT {limit:UInt64}");
    }

    #[test]
    fn operator_format_is_replaced_after_limit() {
        let statement = compile("SELECT name FROM system.tables FORMAT Pretty", 50).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT name FROM system.tables LIMIT {limit:UInt64} FORMAT JSONEachRow"
        );

        let statement = compile("SELECT 1 LIMIT 1 format CSV;", 50).unwrap();
        assert_eq!(statement.sql, "SELECT 1 LIMIT 1 FORMAT JSONEachRow");
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = AdhocResult {
            data: vec![serde_json::json!({"x": 1})],
            row_count: 1,
            duration: 12,
        };
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            serde_json::json!({"data": [{"x": 1}], "rowCount": 1, "duration": 12})
        );
    }
}
