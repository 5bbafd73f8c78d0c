//! Static field tables for each introspection dataset.
//!
//! A field absent from a dataset's table is never filtered, sorted by allow-list,
//! histogrammed or used for distinct lookups on that dataset.

use crate::error::{Result, ServiceError};
use serde::Serialize;
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    QueryLog,
    Parts,
    Processes,
    Merges,
    Mutations,
    PartLog,
    TextLog,
    ViewRefreshes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    /// Compared by exact string-cast equality.
    Scalar,
    /// Compared by set intersection.
    ArrayOfString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Column whose values split the stacked time series into fixed buckets.
#[derive(Debug)]
pub struct CategorySpec {
    pub column: &'static str,
    pub values: &'static [&'static str],
}

/// A grouped summary: fixed key tuple plus `(expression, alias)` projections.
#[derive(Debug)]
pub struct SummarySpec {
    pub name: &'static str,
    pub keys: &'static [&'static str],
    pub projections: &'static [(&'static str, &'static str)],
    pub default_sort: &'static str,
}

impl SummarySpec {
    /// Output columns a client may sort by.
    pub fn sortable(&self, field: &str) -> bool {
        self.keys.contains(&field) || self.projections.iter().any(|(_, alias)| *alias == field)
    }
}

#[derive(Debug)]
pub struct DatasetSpec {
    pub table: &'static str,
    pub time_column: Option<&'static str>,
    pub default_sort: &'static str,
    pub scalar_fields: &'static [&'static str],
    pub array_fields: &'static [&'static str],
    /// Numeric scalar fields that accept `min`/`max` bounds.
    pub range_fields: &'static [&'static str],
    pub search_columns: &'static [&'static str],
    pub measures: &'static [&'static str],
    pub categories: Option<CategorySpec>,
    pub summaries: &'static [SummarySpec],
}

const PART_SIZE_PROJECTIONS: &[(&str, &str)] = &[
    ("count()", "parts"),
    ("sum(rows)", "total_rows"),
    ("sum(bytes_on_disk)", "total_bytes_on_disk"),
    ("sum(data_compressed_bytes)", "compressed_bytes"),
    ("sum(data_uncompressed_bytes)", "uncompressed_bytes"),
    (
        "if(sum(data_uncompressed_bytes) = 0, 0, round((1 - sum(data_compressed_bytes) / sum(data_uncompressed_bytes)) * 100, 2))",
        "compression_savings_pct",
    ),
];

static QUERY_LOG: DatasetSpec = DatasetSpec {
    table: "system.query_log",
    time_column: Some("event_time"),
    default_sort: "event_time",
    scalar_fields: &[
        "type",
        "query_kind",
        "query_id",
        "initial_query_id",
        "user",
        "initial_user",
        "current_database",
        "client_hostname",
        "client_name",
        "interface",
        "is_initial_query",
        "exception_code",
        "normalized_query_hash",
        "http_user_agent",
        "query_duration_ms",
        "read_rows",
        "read_bytes",
        "written_rows",
        "written_bytes",
        "result_rows",
        "result_bytes",
        "memory_usage",
    ],
    array_fields: &[
        "databases",
        "tables",
        "columns",
        "partitions",
        "projections",
        "views",
        "used_functions",
        "used_aggregate_functions",
        "used_aggregate_function_combinators",
        "used_database_engines",
        "used_data_type_families",
        "used_dictionaries",
        "used_formats",
        "used_storages",
        "used_table_functions",
        "used_executable_user_defined_functions",
        "used_sql_user_defined_functions",
        "used_row_policies",
        "used_privileges",
        "missing_privileges",
        "thread_ids",
    ],
    range_fields: &[
        "query_duration_ms",
        "read_rows",
        "read_bytes",
        "written_rows",
        "written_bytes",
        "result_rows",
        "result_bytes",
        "memory_usage",
    ],
    search_columns: &["query", "exception"],
    measures: &[
        "query_duration_ms",
        "read_rows",
        "read_bytes",
        "result_rows",
        "memory_usage",
    ],
    categories: Some(CategorySpec {
        column: "query_kind",
        values: &["Select", "Insert", "Create", "Alter", "Drop", "System"],
    }),
    summaries: &[SummarySpec {
        name: "user",
        keys: &["user"],
        projections: &[
            ("count()", "queries"),
            ("countIf(exception_code != 0)", "failed"),
            ("sum(query_duration_ms)", "total_duration_ms"),
            ("sum(read_bytes)", "total_read_bytes"),
            ("max(memory_usage)", "peak_memory_usage"),
        ],
        default_sort: "queries",
    }],
};

static PARTS: DatasetSpec = DatasetSpec {
    table: "system.parts",
    time_column: Some("modification_time"),
    default_sort: "modification_time",
    scalar_fields: &[
        "database",
        "table",
        "partition",
        "partition_id",
        "name",
        "part_type",
        "active",
        "disk_name",
        "level",
        "rows",
        "marks",
        "bytes_on_disk",
        "data_compressed_bytes",
        "data_uncompressed_bytes",
    ],
    array_fields: &["projections"],
    range_fields: &[
        "level",
        "rows",
        "marks",
        "bytes_on_disk",
        "data_compressed_bytes",
        "data_uncompressed_bytes",
    ],
    search_columns: &["database", "table", "name"],
    measures: &["rows", "bytes_on_disk"],
    categories: None,
    summaries: &[
        SummarySpec {
            name: "table",
            keys: &["database", "table"],
            projections: PART_SIZE_PROJECTIONS,
            default_sort: "total_bytes_on_disk",
        },
        SummarySpec {
            name: "partition",
            keys: &["database", "table", "partition"],
            projections: PART_SIZE_PROJECTIONS,
            default_sort: "total_bytes_on_disk",
        },
    ],
};

static PROCESSES: DatasetSpec = DatasetSpec {
    table: "system.processes",
    time_column: None,
    default_sort: "elapsed",
    scalar_fields: &[
        "query_id",
        "user",
        "address",
        "initial_user",
        "initial_query_id",
        "current_database",
        "is_initial_query",
        "client_hostname",
        "client_name",
        "http_user_agent",
        "query_kind",
        "elapsed",
        "read_rows",
        "memory_usage",
    ],
    array_fields: &["thread_ids"],
    range_fields: &[
        "elapsed",
        "read_rows",
        "memory_usage",
    ],
    search_columns: &["query"],
    measures: &[],
    categories: None,
    summaries: &[],
};

static MERGES: DatasetSpec = DatasetSpec {
    table: "system.merges",
    time_column: None,
    default_sort: "elapsed",
    scalar_fields: &[
        "database",
        "table",
        "partition_id",
        "result_part_name",
        "is_mutation",
        "merge_type",
        "merge_algorithm",
        "elapsed",
        "progress",
        "num_parts",
        "total_size_bytes_compressed",
    ],
    array_fields: &["source_part_names"],
    range_fields: &[
        "elapsed",
        "progress",
        "num_parts",
        "total_size_bytes_compressed",
    ],
    search_columns: &["table", "result_part_name"],
    measures: &[],
    categories: None,
    summaries: &[SummarySpec {
        name: "table",
        keys: &["database", "table"],
        projections: &[
            ("count()", "merges"),
            ("countIf(is_mutation)", "mutations"),
            ("sum(total_size_bytes_compressed)", "merged_bytes_compressed"),
            ("round(avg(progress), 4)", "avg_progress"),
        ],
        default_sort: "merges",
    }],
};

static MUTATIONS: DatasetSpec = DatasetSpec {
    table: "system.mutations",
    time_column: Some("create_time"),
    default_sort: "create_time",
    scalar_fields: &[
        "database",
        "table",
        "mutation_id",
        "command",
        "is_done",
        "latest_failed_part",
        "latest_fail_reason",
        "parts_to_do",
    ],
    array_fields: &["parts_to_do_names"],
    range_fields: &["parts_to_do"],
    search_columns: &["command", "latest_fail_reason"],
    measures: &["parts_to_do"],
    categories: None,
    summaries: &[SummarySpec {
        name: "table",
        keys: &["database", "table"],
        projections: &[
            ("count()", "mutations"),
            ("countIf(is_done = 0)", "pending"),
            ("countIf(latest_fail_reason != '')", "failing"),
            ("sum(parts_to_do)", "total_parts_to_do"),
        ],
        default_sort: "pending",
    }],
};

static PART_LOG: DatasetSpec = DatasetSpec {
    table: "system.part_log",
    time_column: Some("event_time"),
    default_sort: "event_time",
    scalar_fields: &[
        "event_type",
        "merge_reason",
        "merge_algorithm",
        "database",
        "table",
        "part_name",
        "partition_id",
        "part_type",
        "disk_name",
        "query_id",
        "error",
        "exception",
        "duration_ms",
        "rows",
        "size_in_bytes",
        "read_rows",
        "read_bytes",
        "peak_memory_usage",
    ],
    array_fields: &["merged_from"],
    range_fields: &[
        "duration_ms",
        "rows",
        "size_in_bytes",
        "read_rows",
        "read_bytes",
        "peak_memory_usage",
    ],
    search_columns: &["part_name", "exception"],
    measures: &["duration_ms", "rows", "size_in_bytes", "peak_memory_usage"],
    categories: Some(CategorySpec {
        column: "event_type",
        values: &[
            "NewPart",
            "MergeParts",
            "DownloadPart",
            "RemovePart",
            "MutatePart",
            "MovePart",
        ],
    }),
    summaries: &[SummarySpec {
        name: "table",
        keys: &["database", "table"],
        projections: &[
            ("count()", "events"),
            ("countIf(event_type = 'NewPart')", "new_parts"),
            ("countIf(event_type = 'MergeParts')", "merges"),
            ("countIf(error != 0)", "errors"),
            ("sum(size_in_bytes)", "total_size_in_bytes"),
        ],
        default_sort: "events",
    }],
};

static TEXT_LOG: DatasetSpec = DatasetSpec {
    table: "system.text_log",
    time_column: Some("event_time"),
    default_sort: "event_time",
    scalar_fields: &[
        "level",
        "logger_name",
        "thread_name",
        "thread_id",
        "query_id",
        "source_file",
        "source_line",
        "message_format_string",
    ],
    array_fields: &[],
    range_fields: &["source_line"],
    search_columns: &["message"],
    measures: &[],
    categories: Some(CategorySpec {
        column: "level",
        values: &[
            "Fatal",
            "Critical",
            "Error",
            "Warning",
            "Notice",
            "Information",
            "Debug",
            "Trace",
        ],
    }),
    summaries: &[],
};

static VIEW_REFRESHES: DatasetSpec = DatasetSpec {
    table: "system.view_refreshes",
    time_column: Some("last_refresh_time"),
    default_sort: "last_refresh_time",
    scalar_fields: &[
        "database",
        "view",
        "status",
        "exception",
        "retry",
        "read_rows",
        "written_rows",
    ],
    array_fields: &[],
    range_fields: &[
        "retry",
        "read_rows",
        "written_rows",
    ],
    search_columns: &["view", "exception"],
    measures: &[],
    categories: None,
    summaries: &[],
};

impl Dataset {
    pub const ALL: [Dataset; 8] = [
        Dataset::QueryLog,
        Dataset::Parts,
        Dataset::Processes,
        Dataset::Merges,
        Dataset::Mutations,
        Dataset::PartLog,
        Dataset::TextLog,
        Dataset::ViewRefreshes,
    ];

    pub fn spec(self) -> &'static DatasetSpec {
        match self {
            Dataset::QueryLog => &QUERY_LOG,
            Dataset::Parts => &PARTS,
            Dataset::Processes => &PROCESSES,
            Dataset::Merges => &MERGES,
            Dataset::Mutations => &MUTATIONS,
            Dataset::PartLog => &PART_LOG,
            Dataset::TextLog => &TEXT_LOG,
            Dataset::ViewRefreshes => &VIEW_REFRESHES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dataset::QueryLog => "query_log",
            Dataset::Parts => "parts",
            Dataset::Processes => "processes",
            Dataset::Merges => "merges",
            Dataset::Mutations => "mutations",
            Dataset::PartLog => "part_log",
            Dataset::TextLog => "text_log",
            Dataset::ViewRefreshes => "view_refreshes",
        }
    }

    /// Columns a list may be ordered by: the scalar fields plus the time column.
    pub fn sortable(self, field: &str) -> bool {
        let spec = self.spec();
        field == spec.default_sort
            || spec.time_column == Some(field)
            || spec.scalar_fields.contains(&field)
    }

    /// True for numeric scalar fields that accept range bounds.
    pub fn accepts_range(self, field: &str) -> bool {
        self.spec().range_fields.contains(&field)
    }

    /// Field kind for `field`, or `None` when the dataset does not know it.
    pub fn classify(self, field: &str) -> Option<FieldKind> {
        self.field(field).map(|spec| spec.kind)
    }

    pub fn field(self, field: &str) -> Option<FieldSpec> {
        let spec = self.spec();
        if let Some(name) = spec.array_fields.iter().copied().find(|name| *name == field) {
            return Some(FieldSpec {
                name,
                kind: FieldKind::ArrayOfString,
            });
        }
        spec.scalar_fields
            .iter()
            .copied()
            .find(|name| *name == field)
            .map(|name| FieldSpec {
                name,
                kind: FieldKind::Scalar,
            })
    }

    pub fn summary(self, name: Option<&str>) -> Result<&'static SummarySpec> {
        let summaries = self.spec().summaries;
        let selected = match name.map(str::trim).filter(|value| !value.is_empty()) {
            None => summaries.first(),
            Some(wanted) => summaries.iter().find(|summary| summary.name == wanted),
        };
        selected.ok_or_else(|| {
            ServiceError::InvalidRequest(format!(
                "summary{} not available for {}",
                name.map(|value| format!(" '{value}'")).unwrap_or_default(),
                self
            ))
        })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self> {
        Dataset::ALL
            .into_iter()
            .find(|dataset| dataset.as_str() == raw)
            .ok_or_else(|| ServiceError::InvalidRequest(format!("unknown dataset '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_log_array_fields_classify_as_arrays() {
        for field in ["databases", "tables", "used_functions", "thread_ids"] {
            assert_eq!(
                Dataset::QueryLog.classify(field),
                Some(FieldKind::ArrayOfString),
                "{field}"
            );
        }
        assert_eq!(Dataset::QueryLog.classify("user"), Some(FieldKind::Scalar));
        assert_eq!(Dataset::QueryLog.classify("query"), None);
    }

    #[test]
    fn classification_is_per_dataset() {
        assert_eq!(
            Dataset::Processes.classify("thread_ids"),
            Some(FieldKind::ArrayOfString)
        );
        assert_eq!(Dataset::TextLog.classify("thread_ids"), None);
        assert_eq!(Dataset::Parts.classify("projections"), Some(FieldKind::ArrayOfString));
    }

    #[test]
    fn every_dataset_round_trips_its_path_segment() {
        for dataset in Dataset::ALL {
            assert_eq!(dataset.as_str().parse::<Dataset>().unwrap(), dataset);
        }
        assert!("system.tables".parse::<Dataset>().is_err());
    }

    #[test]
    fn field_tables_are_valid_identifiers_without_overlap() {
        for dataset in Dataset::ALL {
            let spec = dataset.spec();
            for name in spec.scalar_fields.iter().chain(spec.array_fields) {
                assert!(super::super::ident::is_valid_identifier(name), "{name}");
            }
            for name in spec.array_fields {
                assert!(!spec.scalar_fields.contains(name), "{dataset}: {name}");
            }
            assert!(super::super::ident::is_valid_identifier(spec.default_sort));
        }
    }

    #[test]
    fn range_fields_are_known_scalars() {
        for dataset in Dataset::ALL {
            for name in dataset.spec().range_fields {
                assert_eq!(
                    dataset.classify(name),
                    Some(FieldKind::Scalar),
                    "{dataset}: {name}"
                );
            }
        }
        assert!(Dataset::QueryLog.accepts_range("read_rows"));
        assert!(!Dataset::QueryLog.accepts_range("user"));
        assert!(!Dataset::QueryLog.accepts_range("tables"));
    }

    #[test]
    fn summary_aliases_never_shadow_source_columns() {
        for dataset in Dataset::ALL {
            let spec = dataset.spec();
            for summary in spec.summaries {
                for (_, alias) in summary.projections {
                    assert!(dataset.field(alias).is_none(), "{dataset}: {alias}");
                    assert!(!spec.search_columns.contains(alias), "{dataset}: {alias}");
                    assert_ne!(spec.time_column, Some(*alias), "{dataset}");
                }
                assert!(summary.sortable(summary.default_sort), "{dataset}");
            }
        }
    }

    #[test]
    fn sortable_columns_exclude_keywords_and_unknowns() {
        assert!(Dataset::QueryLog.sortable("event_time"));
        assert!(Dataset::QueryLog.sortable("read_rows"));
        assert!(Dataset::Processes.sortable("elapsed"));
        for field in ["SELECT", "DROP", "UNION", "nonexistent_col", "tables", "query"] {
            assert!(!Dataset::QueryLog.sortable(field), "{field}");
        }
        for dataset in Dataset::ALL {
            assert!(dataset.sortable(dataset.spec().default_sort), "{dataset}");
        }
    }

    #[test]
    fn summary_selection_defaults_to_first_shape() {
        assert_eq!(Dataset::Parts.summary(None).unwrap().name, "table");
        assert_eq!(
            Dataset::Parts.summary(Some("partition")).unwrap().keys,
            &["database", "table", "partition"]
        );
        assert!(Dataset::Parts.summary(Some("disk")).is_err());
        assert!(Dataset::TextLog.summary(None).is_err());
    }
}
