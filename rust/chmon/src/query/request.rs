//! Request-scoped parameters and their conversion into validated compiler inputs.

use super::{
    filters::{FilterRequest, RangeFilterRequest},
    ident::is_valid_identifier,
};
use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
    time::TimeWindow,
};
use serde::{Deserialize, Serialize};

/// Raw query-string bag as sent by the console. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub filters: Option<String>,
    #[serde(default)]
    pub range_filters: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub normalize: Option<String>,
    #[serde(default)]
    pub event_columns: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
}

/// Everything that contributes to the `WHERE` clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub window: TimeWindow,
    pub search: Option<String>,
    pub filters: FilterRequest,
    pub ranges: RangeFilterRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Only the exact token `ASC` selects ascending order.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("ASC") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortRequest {
    pub field: Option<String>,
    pub order: SortOrder,
}

impl SortRequest {
    pub fn new(field: Option<&str>, order: Option<&str>) -> Self {
        Self {
            field: field.map(str::to_string),
            order: SortOrder::parse(order),
        }
    }

    /// The requested field when it is a valid identifier accepted by `allowed`, else `default`.
    pub fn allowed_field_or<'a>(&'a self, allowed: impl Fn(&str) -> bool, default: &'a str) -> &'a str {
        match self.field.as_deref() {
            Some(field) if is_valid_identifier(field) && allowed(field) => field,
            _ => default,
        }
    }
}

/// Time-series bucket width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Second,
    #[default]
    Minute,
    Hour,
}

impl Bucket {
    /// Unrecognised tokens fall back to minute buckets.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("second") => Bucket::Second,
            Some("hour") => Bucket::Hour,
            _ => Bucket::Minute,
        }
    }

    pub fn interval(self) -> &'static str {
        match self {
            Bucket::Second => "INTERVAL 1 SECOND",
            Bucket::Minute => "INTERVAL 1 MINUTE",
            Bucket::Hour => "INTERVAL 1 HOUR",
        }
    }

    pub fn seconds(self) -> u64 {
        match self {
            Bucket::Second => 1,
            Bucket::Minute => 60,
            Bucket::Hour => 3600,
        }
    }
}

impl QueryParams {
    pub fn filter_set(&self) -> Result<FilterSet> {
        Ok(FilterSet {
            window: TimeWindow::parse(self.start.as_deref(), self.end.as_deref())?,
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|term| !term.is_empty())
                .map(str::to_string),
            filters: FilterRequest::parse(self.filters.as_deref())?,
            ranges: RangeFilterRequest::parse(self.range_filters.as_deref())?,
        })
    }

    pub fn page(&self, config: &AppConfig) -> Result<Page> {
        let limit = parse_count("limit", self.limit.as_deref())?;
        let offset = parse_count("offset", self.offset.as_deref())?;
        Ok(Page {
            limit: config.clamp_limit(limit),
            offset: offset.unwrap_or(0),
        })
    }

    pub fn sort(&self) -> SortRequest {
        SortRequest::new(self.sort_field.as_deref(), self.sort_order.as_deref())
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::parse(self.bucket.as_deref())
    }

    pub fn normalize(&self) -> bool {
        matches!(
            self.normalize.as_deref().map(str::trim),
            Some("true") | Some("1")
        )
    }

    /// Comma separated category names; blanks are ignored.
    pub fn event_columns(&self) -> Vec<String> {
        self.event_columns
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn parse_count(name: &str, raw: Option<&str>) -> Result<Option<u64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ServiceError::InvalidRequest(format!("{name} must be a non-negative integer"))),
    }
}
