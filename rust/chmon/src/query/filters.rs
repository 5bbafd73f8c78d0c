//! Structured filter payloads and the predicate fragments compiled from them.

use super::{
    dataset::{Dataset, FieldKind, FieldSpec},
    ident::is_valid_identifier,
    params::{Bindings, ParamValue},
};
use crate::error::{Result, ServiceError};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::collections::BTreeMap;
use tracing::debug;

/// Filter values arrive from the UI as strings, but numbers and booleans are
/// accepted and compared by their string form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFilterValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl RawFilterValue {
    fn into_string(self) -> String {
        match self {
            RawFilterValue::Text(value) => value,
            RawFilterValue::Number(value) => value.to_string(),
            RawFilterValue::Bool(value) => value.to_string(),
        }
    }
}

/// Field name to requested values, decoded from the `filters` parameter.
///
/// Keyed by a `BTreeMap` so compiling the same request always emits
/// predicates in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRequest {
    entries: BTreeMap<String, Vec<String>>,
}

impl FilterRequest {
    /// Decodes the JSON object. Absent or blank input is an empty request;
    /// anything that is not an object of value arrays is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::default());
        };

        let decoded: BTreeMap<String, Vec<RawFilterValue>> = serde_json::from_str(raw)
            .map_err(|err| ServiceError::invalid(format!("malformed filters: {err}")))?;

        Ok(Self {
            entries: decoded
                .into_iter()
                .map(|(field, values)| {
                    let values = values.into_iter().map(RawFilterValue::into_string).collect();
                    (field, values)
                })
                .collect(),
        })
    }

    #[cfg(test)]
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(field, values)| (field.into(), values.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(field, values)| (field.as_str(), values.as_slice()))
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RangeBounds {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub min: Option<u64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub max: Option<u64>,
}

/// Field name to `{min, max}`, decoded from the `rangeFilters` parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeFilterRequest {
    entries: BTreeMap<String, RangeBounds>,
}

impl RangeFilterRequest {
    /// Bounds must be unsigned integers (or their string form); anything else
    /// fails the request here instead of reaching the builder.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::default());
        };

        let entries: BTreeMap<String, RangeBounds> = serde_json::from_str(raw)
            .map_err(|err| ServiceError::invalid(format!("malformed rangeFilters: {err}")))?;
        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, RangeBounds)>,
        K: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(field, bounds)| (field.into(), bounds))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RangeBounds)> {
        self.entries
            .iter()
            .map(|(field, bounds)| (field.as_str(), bounds))
    }
}

/// Emits one predicate for `field` and binds its value list.
///
/// Returns `None` without binding anything when `values` is empty.
pub fn build_condition(field: FieldSpec, values: &[String], params: &mut Bindings) -> Option<String> {
    if values.is_empty() {
        return None;
    }

    let placeholder = params.bind("filter", ParamValue::TextArray(values.to_vec()));
    let fragment = match field.kind {
        FieldKind::Scalar => format!("toString({}) IN {placeholder}", field.name),
        FieldKind::ArrayOfString => format!(
            "hasAny(arrayMap(x -> toString(x), {}), {placeholder})",
            field.name
        ),
    };
    Some(fragment)
}

/// Compiles every known, non-empty entry of `filters`. Unknown fields are dropped.
pub fn build_filter_conditions(
    dataset: Dataset,
    filters: &FilterRequest,
    params: &mut Bindings,
) -> Vec<String> {
    filters
        .iter()
        .filter_map(|(name, values)| {
            let Some(field) = dataset.field(name) else {
                debug!(%dataset, field = name, "dropping filter on unknown field");
                return None;
            };
            build_condition(field, values, params)
        })
        .collect()
}

/// Emits `field >= min` and `field <= max` for each bound that is present.
pub fn build_range_conditions(
    dataset: Dataset,
    ranges: &RangeFilterRequest,
    params: &mut Bindings,
) -> Vec<String> {
    let mut fragments = Vec::new();

    for (field, bounds) in ranges.iter() {
        if !is_valid_identifier(field) || !dataset.accepts_range(field) {
            debug!(%dataset, field, "dropping range filter on non-numeric field");
            continue;
        }
        if let Some(min) = bounds.min {
            let placeholder = params.bind("range", ParamValue::UInt64(min));
            fragments.push(format!("{field} >= {placeholder}"));
        }
        if let Some(max) = bounds.max {
            let placeholder = params.bind("range", ParamValue::UInt64(max));
            fragments.push(format!("{field} <= {placeholder}"));
        }
    }

    fragments
}

/// Case-insensitive substring match over the dataset's search columns.
pub fn build_search_condition(
    dataset: Dataset,
    search: Option<&str>,
    params: &mut Bindings,
) -> Option<String> {
    let term = search.map(str::trim).filter(|term| !term.is_empty())?;
    let columns = dataset.spec().search_columns;
    if columns.is_empty() {
        return None;
    }

    let placeholder = params.bind_named("search", ParamValue::Text(term.to_string()));
    let matches: Vec<String> = columns
        .iter()
        .map(|column| format!("positionCaseInsensitive(toString({column}), {placeholder}) > 0"))
        .collect();
    Some(format!("({})", matches.join(" OR ")))
}
