//! Typed parameter bindings and the compiled statement handed to storage.

use serde::Serialize;

/// A value bound to a `{name:Type}` placeholder. Values never enter statement text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum ParamValue {
    Text(String),
    TextArray(Vec<String>),
    #[serde(rename = "uint64")]
    UInt64(u64),
    /// UTC timestamp already rendered as `YYYY-MM-DD HH:MM:SS`.
    DateTime(String),
}

impl ParamValue {
    pub fn clickhouse_type(&self) -> &'static str {
        match self {
            ParamValue::Text(_) => "String",
            ParamValue::TextArray(_) => "Array(String)",
            ParamValue::UInt64(_) => "UInt64",
            ParamValue::DateTime(_) => "DateTime('UTC')",
        }
    }

    /// Renders the value in the text form ClickHouse expects for `param_<name>`.
    pub fn encode(&self) -> String {
        match self {
            ParamValue::Text(value) => escape_text(value),
            ParamValue::TextArray(values) => {
                let items: Vec<String> = values
                    .iter()
                    .map(|value| format!("'{}'", escape_quoted(value)))
                    .collect();
                format!("[{}]", items.join(","))
            }
            ParamValue::UInt64(value) => value.to_string(),
            ParamValue::DateTime(value) => value.clone(),
        }
    }
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub name: String,
    #[serde(flatten)]
    pub value: ParamValue,
}

/// Ordered, append-only parameter set built while compiling one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Bindings {
    entries: Vec<Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` under `<prefix>_<position>` and returns its placeholder.
    /// The position is the binding count, so names never repeat within a statement.
    pub fn bind(&mut self, prefix: &str, value: ParamValue) -> String {
        let name = format!("{prefix}_{}", self.entries.len());
        self.push(name, value)
    }

    /// Binds a value that occurs at most once per statement (`start`, `limit`, ...).
    pub fn bind_named(&mut self, name: &str, value: ParamValue) -> String {
        debug_assert!(
            self.get(name).is_none(),
            "parameter '{name}' bound twice in one statement"
        );
        self.push(name.to_string(), value)
    }

    fn push(&mut self, name: String, value: ParamValue) -> String {
        let placeholder = format!("{{{}:{}}}", name, value.clickhouse_type());
        self.entries.push(Binding { name, value });
        placeholder
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| &binding.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Finished statement text plus its bindings. Nothing else reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Bindings,
}

impl CompiledStatement {
    pub fn new(sql: String, params: Bindings) -> Self {
        Self { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_generates_unique_positional_names() {
        let mut params = Bindings::new();
        let first = params.bind("filter", ParamValue::TextArray(vec!["a".into()]));
        let second = params.bind("filter", ParamValue::TextArray(vec!["b".into()]));
        let third = params.bind("range", ParamValue::UInt64(5));

        assert_eq!(first, "{filter_0:Array(String)}");
        assert_eq!(second, "{filter_1:Array(String)}");
        assert_eq!(third, "{range_2:UInt64}");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn named_binding_uses_given_name() {
        let mut params = Bindings::new();
        let placeholder = params.bind_named("limit", ParamValue::UInt64(10));
        assert_eq!(placeholder, "{limit:UInt64}");
        assert_eq!(params.get("limit"), Some(&ParamValue::UInt64(10)));
    }

    #[test]
    fn array_values_are_quoted_and_escaped() {
        let value = ParamValue::TextArray(vec!["it's".into(), r"back\slash".into()]);
        assert_eq!(value.encode(), r"['it\'s','back\\slash']");
    }

    #[test]
    fn text_values_escape_control_characters() {
        let value = ParamValue::Text("a\tb\\c".into());
        assert_eq!(value.encode(), r"a\tb\\c");
    }

    #[test]
    fn bindings_serialize_with_type_tags() {
        let mut params = Bindings::new();
        params.bind_named("offset", ParamValue::UInt64(20));
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "name": "offset", "t": "uint64", "v": 20 }])
        );
    }
}
