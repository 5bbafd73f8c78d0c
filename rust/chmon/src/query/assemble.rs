//! Statement assembly for the structured read patterns.
//!
//! Every pattern shares one predicate pipeline (time window, search, value
//! filters, ranges) and differs only in projection, grouping and ordering.

use super::{
    dataset::{Dataset, FieldKind, FieldSpec},
    filters::{build_filter_conditions, build_range_conditions, build_search_condition},
    params::{Bindings, CompiledStatement, ParamValue},
    request::{Bucket, FilterSet, Page, QueryParams, SortRequest},
};
use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
    time::format_timestamp,
};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "pattern", content = "field", rename_all = "snake_case")]
pub enum ReadPattern {
    List,
    Count,
    TimeSeries,
    Stacked,
    Summary,
    Histogram(String),
    Distinct(String),
}

impl ReadPattern {
    /// Resolves a pattern name; `histogram` and `distinct` also need a field.
    pub fn parse(name: &str, field: Option<&str>) -> Result<Self> {
        let field = || {
            field
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ServiceError::invalid(format!("{name} requires a field")))
        };

        match name {
            "list" => Ok(ReadPattern::List),
            "count" => Ok(ReadPattern::Count),
            "timeseries" => Ok(ReadPattern::TimeSeries),
            "stacked" => Ok(ReadPattern::Stacked),
            "summary" => Ok(ReadPattern::Summary),
            "histogram" => Ok(ReadPattern::Histogram(field()?)),
            "distinct" => Ok(ReadPattern::Distinct(field()?)),
            other => Err(ServiceError::invalid(format!(
                "unknown read pattern '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ReadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPattern::List => f.write_str("list"),
            ReadPattern::Count => f.write_str("count"),
            ReadPattern::TimeSeries => f.write_str("timeseries"),
            ReadPattern::Stacked => f.write_str("stacked"),
            ReadPattern::Summary => f.write_str("summary"),
            ReadPattern::Histogram(field) => write!(f, "histogram({field})"),
            ReadPattern::Distinct(field) => write!(f, "distinct({field})"),
        }
    }
}

/// Compiles `pattern` for `dataset` from the raw request bag.
pub fn compile(
    dataset: Dataset,
    pattern: &ReadPattern,
    params: &QueryParams,
    config: &AppConfig,
) -> Result<CompiledStatement> {
    let filters = params.filter_set()?;

    match pattern {
        ReadPattern::List => Ok(list(dataset, &filters, &params.sort(), params.page(config)?)),
        ReadPattern::Count => Ok(count(dataset, &filters)),
        ReadPattern::TimeSeries => {
            time_series(dataset, &filters, params.bucket(), params.normalize())
        }
        ReadPattern::Stacked => stacked(
            dataset,
            &filters,
            params.bucket(),
            &params.event_columns(),
        ),
        ReadPattern::Summary => summary(
            dataset,
            &filters,
            params.group_by.as_deref(),
            &params.sort(),
            params.page(config)?,
        ),
        ReadPattern::Histogram(field) => {
            histogram(dataset, field, &filters, params.page(config)?)
        }
        ReadPattern::Distinct(field) => distinct(dataset, field, &filters, params.page(config)?),
    }
}

pub fn list(dataset: Dataset, filters: &FilterSet, sort: &SortRequest, page: Page) -> CompiledStatement {
    let spec = dataset.spec();
    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);

    let select = Select {
        projection: "*".to_string(),
        table: spec.table,
        predicates,
        group_by: None,
        order_by: Some(format!(
            "{} {}",
            sort.allowed_field_or(|field| dataset.sortable(field), spec.default_sort),
            sort.order.as_sql()
        )),
        page: Some(page_clause(page, &mut params)),
    };
    CompiledStatement::new(select.render(), params)
}

pub fn count(dataset: Dataset, filters: &FilterSet) -> CompiledStatement {
    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);

    let select = Select {
        projection: "count() AS total".to_string(),
        table: dataset.spec().table,
        predicates,
        group_by: None,
        order_by: None,
        page: None,
    };
    CompiledStatement::new(select.render(), params)
}

/// Bucketed count plus avg/min/max/sum of each dataset measure. With
/// `normalize`, counts and sums become per-second rates.
pub fn time_series(
    dataset: Dataset,
    filters: &FilterSet,
    bucket: Bucket,
    normalize: bool,
) -> Result<CompiledStatement> {
    let spec = dataset.spec();
    let time_column = spec
        .time_column
        .filter(|_| !spec.measures.is_empty())
        .ok_or_else(|| ServiceError::invalid(format!("time series not available for {dataset}")))?;

    let rate = |expr: String| {
        if normalize {
            format!("{expr} / {}", bucket.seconds())
        } else {
            expr
        }
    };

    let mut columns = vec![
        bucket_expr(time_column, bucket),
        format!("{} AS count", rate("count()".to_string())),
    ];
    for measure in spec.measures {
        columns.push(format!("avg({measure}) AS avg_{measure}"));
        columns.push(format!("min({measure}) AS min_{measure}"));
        columns.push(format!("max({measure}) AS max_{measure}"));
        columns.push(format!("{} AS sum_{measure}", rate(format!("sum({measure})"))));
    }

    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);
    let select = Select {
        projection: columns.join(", "),
        table: spec.table,
        predicates,
        group_by: Some("bucket".to_string()),
        order_by: Some("bucket ASC".to_string()),
        page: None,
    };
    Ok(CompiledStatement::new(select.render(), params))
}

/// Bucketed conditional counts per category, plus `Other` for values outside
/// the dataset's category list. `selected` narrows the categories shown.
pub fn stacked(
    dataset: Dataset,
    filters: &FilterSet,
    bucket: Bucket,
    selected: &[String],
) -> Result<CompiledStatement> {
    let spec = dataset.spec();
    let (time_column, categories) = spec
        .time_column
        .zip(spec.categories.as_ref())
        .ok_or_else(|| {
            ServiceError::invalid(format!("stacked series not available for {dataset}"))
        })?;

    let mut shown: Vec<&str> = categories
        .values
        .iter()
        .copied()
        .filter(|value| selected.iter().any(|wanted| wanted == value))
        .collect();
    if shown.is_empty() {
        shown = categories.values.to_vec();
    }

    let mut columns = vec![bucket_expr(time_column, bucket)];
    for value in &shown {
        columns.push(format!(
            "countIf({} = {}) AS `{value}`",
            categories.column,
            quote_literal(value)
        ));
    }
    let known: Vec<String> = categories.values.iter().map(|value| quote_literal(value)).collect();
    columns.push(format!(
        "countIf({} NOT IN ({})) AS `Other`",
        categories.column,
        known.join(", ")
    ));

    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);
    let select = Select {
        projection: columns.join(", "),
        table: spec.table,
        predicates,
        group_by: Some("bucket".to_string()),
        order_by: Some("bucket ASC".to_string()),
        page: None,
    };
    Ok(CompiledStatement::new(select.render(), params))
}

/// Grouped totals over a fixed key tuple. Sorting is restricted to the
/// summary's own output columns.
pub fn summary(
    dataset: Dataset,
    filters: &FilterSet,
    group_by: Option<&str>,
    sort: &SortRequest,
    page: Page,
) -> Result<CompiledStatement> {
    let shape = dataset.summary(group_by)?;
    let keys = shape.keys.join(", ");

    let mut columns: Vec<String> = shape.keys.iter().map(|key| key.to_string()).collect();
    columns.extend(
        shape
            .projections
            .iter()
            .map(|(expr, alias)| format!("{expr} AS {alias}")),
    );

    let sort_field = sort.allowed_field_or(|field| shape.sortable(field), shape.default_sort);

    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);
    let select = Select {
        projection: columns.join(", "),
        table: dataset.spec().table,
        predicates,
        group_by: Some(keys),
        order_by: Some(format!("{sort_field} {}", sort.order.as_sql())),
        page: Some(page_clause(page, &mut params)),
    };
    Ok(CompiledStatement::new(select.render(), params))
}

/// Value frequencies for one field; array fields are unrolled first.
pub fn histogram(
    dataset: Dataset,
    field: &str,
    filters: &FilterSet,
    page: Page,
) -> Result<CompiledStatement> {
    let field = selectable_field(dataset, field, "histogram")?;

    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);
    let select = Select {
        projection: format!("{} AS value, count() AS count", value_expr(field)),
        table: dataset.spec().table,
        predicates,
        group_by: Some("value".to_string()),
        order_by: Some("count DESC, value ASC".to_string()),
        page: Some(page_clause(page, &mut params)),
    };
    Ok(CompiledStatement::new(select.render(), params))
}

/// Distinct values for one field, feeding the filter pickers.
pub fn distinct(
    dataset: Dataset,
    field: &str,
    filters: &FilterSet,
    page: Page,
) -> Result<CompiledStatement> {
    let field = selectable_field(dataset, field, "distinct")?;

    let mut params = Bindings::new();
    let predicates = predicates(dataset, filters, &mut params);
    let select = Select {
        projection: format!("DISTINCT {} AS value", value_expr(field)),
        table: dataset.spec().table,
        predicates,
        group_by: None,
        order_by: Some("value ASC".to_string()),
        page: Some(page_clause(page, &mut params)),
    };
    Ok(CompiledStatement::new(select.render(), params))
}

/// Path-segment selectors have no safe default, so unknown fields are rejected.
fn selectable_field(dataset: Dataset, field: &str, pattern: &str) -> Result<FieldSpec> {
    dataset.field(field).ok_or_else(|| {
        ServiceError::invalid(format!(
            "field '{field}' is not available for {pattern} on {dataset}"
        ))
    })
}

fn value_expr(field: FieldSpec) -> String {
    match field.kind {
        FieldKind::Scalar => format!("toString({})", field.name),
        FieldKind::ArrayOfString => format!("toString(arrayJoin({}))", field.name),
    }
}

fn bucket_expr(time_column: &str, bucket: Bucket) -> String {
    format!(
        "toStartOfInterval({time_column}, {}) AS bucket",
        bucket.interval()
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn page_clause(page: Page, params: &mut Bindings) -> String {
    let limit = params.bind_named("limit", ParamValue::UInt64(page.limit));
    let offset = params.bind_named("offset", ParamValue::UInt64(page.offset));
    format!("LIMIT {limit} OFFSET {offset}")
}

/// Predicates in a fixed order: time window, search, value filters, ranges.
fn predicates(dataset: Dataset, filters: &FilterSet, params: &mut Bindings) -> Vec<String> {
    let spec = dataset.spec();
    let mut predicates = Vec::new();

    if let Some(column) = spec.time_column {
        if let Some(start) = filters.window.start {
            let placeholder =
                params.bind_named("start", ParamValue::DateTime(format_timestamp(&start)));
            predicates.push(format!("{column} >= {placeholder}"));
        }
        if let Some(end) = filters.window.effective_end() {
            let placeholder =
                params.bind_named("end", ParamValue::DateTime(format_timestamp(&end)));
            predicates.push(format!("{column} <= {placeholder}"));
        }
    }

    predicates.extend(build_search_condition(
        dataset,
        filters.search.as_deref(),
        params,
    ));
    predicates.extend(build_filter_conditions(dataset, &filters.filters, params));
    predicates.extend(build_range_conditions(dataset, &filters.ranges, params));
    predicates
}

struct Select {
    projection: String,
    table: &'static str,
    predicates: Vec<String>,
    group_by: Option<String>,
    order_by: Option<String>,
    page: Option<String>,
}

impl Select {
    fn render(self) -> String {
        let mut sql = format!("SELECT {}\nFROM {}", self.projection, self.table);
        if !self.predicates.is_empty() {
            sql.push_str("\nWHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        if let Some(group_by) = self.group_by {
            sql.push_str("\nGROUP BY ");
            sql.push_str(&group_by);
        }
        if let Some(order_by) = self.order_by {
            sql.push_str("\nORDER BY ");
            sql.push_str(&order_by);
        }
        if let Some(page) = self.page {
            sql.push('\n');
            sql.push_str(&page);
        }
        sql
    }
}
