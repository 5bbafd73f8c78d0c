//! EXPLAIN variants and the row shape of their output.

use super::{
    adhoc::{strip_format, strip_terminators},
    params::CompiledStatement,
};
use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainMode {
    Plan,
    Indexes,
    Actions,
    Pipeline,
    Ast,
    Syntax,
    Estimate,
}

impl ExplainMode {
    pub fn prefix(self) -> &'static str {
        match self {
            ExplainMode::Plan => "EXPLAIN PLAN ",
            ExplainMode::Indexes => "EXPLAIN indexes = 1 ",
            ExplainMode::Actions => "EXPLAIN actions = 1 ",
            ExplainMode::Pipeline => "EXPLAIN PIPELINE ",
            ExplainMode::Ast => "EXPLAIN AST ",
            ExplainMode::Syntax => "EXPLAIN SYNTAX ",
            ExplainMode::Estimate => "EXPLAIN ESTIMATE ",
        }
    }

    /// `ast` and `syntax` answer with plain text rather than rows.
    pub fn is_plain_text(self) -> bool {
        matches!(self, ExplainMode::Ast | ExplainMode::Syntax)
    }
}

impl FromStr for ExplainMode {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "plan" => Ok(ExplainMode::Plan),
            "indexes" => Ok(ExplainMode::Indexes),
            "actions" => Ok(ExplainMode::Actions),
            "pipeline" => Ok(ExplainMode::Pipeline),
            "ast" => Ok(ExplainMode::Ast),
            "syntax" => Ok(ExplainMode::Syntax),
            "estimate" => Ok(ExplainMode::Estimate),
            other => Err(ServiceError::invalid(format!(
                "unknown explain mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub query: String,
}

pub fn compile(mode: ExplainMode, query: &str) -> Result<CompiledStatement> {
    let (query, _) = strip_format(strip_terminators(query));
    if query.is_empty() {
        return Err(ServiceError::invalid("query must not be empty"));
    }
    Ok(CompiledStatement::new(
        format!("{}{query}", mode.prefix()),
        Default::default(),
    ))
}

/// One `{"explain": line}` row per non-blank output line.
pub fn wrap_lines(text: &str) -> Vec<Value> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| json!({ "explain": line }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_mode_maps_to_its_prefix() {
        let cases = [
            ("plan", "EXPLAIN PLAN SELECT 1"),
            ("indexes", "EXPLAIN indexes = 1 SELECT 1"),
            ("actions", "EXPLAIN actions = 1 SELECT 1"),
            ("pipeline", "EXPLAIN PIPELINE SELECT 1"),
            ("ast", "EXPLAIN AST SELECT 1"),
            ("syntax", "EXPLAIN SYNTAX SELECT 1"),
            ("estimate", "EXPLAIN ESTIMATE SELECT 1"),
        ];
        for (mode, expected) in cases {
            let mode: ExplainMode = mode.parse().unwrap();
            assert_eq!(compile(mode, " SELECT 1; ").unwrap().sql, expected);
        }
    }

    #[test]
    fn unknown_modes_are_rejected() {
        for mode in ["", "PLAN", "analyze", "plan; DROP TABLE x"] {
            assert!(mode.parse::<ExplainMode>().is_err(), "{mode:?}");
        }
    }

    #[test]
    fn only_ast_and_syntax_are_plain_text() {
        let plain: Vec<_> = ["plan", "indexes", "actions", "pipeline", "ast", "syntax", "estimate"]
            .into_iter()
            .filter(|mode| mode.parse::<ExplainMode>().unwrap().is_plain_text())
            .collect();
        assert_eq!(plain, vec!["ast", "syntax"]);
    }

    #[test]
    fn plain_text_is_wrapped_per_line() {
        let rows = wrap_lines("SelectWithUnionQuery (children 1)\n\n  ExpressionList\n");
        assert_eq!(
            rows,
            vec![
                json!({"explain": "SelectWithUnionQuery (children 1)"}),
                json!({"explain": "  ExpressionList"}),
            ]
        );
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(compile(ExplainMode::Plan, "  ").is_err());
    }

    #[test]
    fn trailing_format_is_dropped() {
        let statement =
            compile(ExplainMode::Indexes, "SELECT * FROM system.parts FORMAT Pretty;").unwrap();
        assert_eq!(statement.sql, "EXPLAIN indexes = 1 SELECT * FROM system.parts");

        let statement = compile(ExplainMode::Ast, "SELECT format FROM t").unwrap();
        assert_eq!(statement.sql, "EXPLAIN AST SELECT format FROM t");
    }
}
