use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use super::types::{is_optimizable_grouped_threshold, ClauseKind, Criterion, Polarity, QueryParams};
use crate::error::{EvalResult, EvaluationError};
use crate::time::parse_interval_seconds;

/// Composite aggregation page size.
pub const COMPOSITE_GROUP_SIZE: usize = 2000;

/// Name of the per-bucket filter aggregation on the widened grouped path.
pub const FILTERED_RESULTS_AGG: &str = "filtered_results";

/// Shape of the search a rule compiles to, chosen once per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// Exact total hit count, no aggregation.
    Ungrouped,
    /// Filters pushed into the top-level query, composite aggregation on
    /// the filtered set.
    GroupedOptimized,
    /// Composite aggregation over a widened, unfiltered window, with the
    /// real filters re-applied per bucket.
    GroupedWidened,
}

impl QueryShape {
    pub fn select(params: &QueryParams<'_>) -> Self {
        if !params.has_group_by() {
            QueryShape::Ungrouped
        } else if is_optimizable_grouped_threshold(params.count.comparator, params.count.value) {
            QueryShape::GroupedOptimized
        } else {
            QueryShape::GroupedWidened
        }
    }

    pub fn is_grouped(self) -> bool {
        !matches!(self, QueryShape::Ungrouped)
    }
}

/// A search request in the shape the Elasticsearch client API takes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub index: String,
    pub allow_no_indices: bool,
    pub ignore_unavailable: bool,
    pub body: JsonValue,
}

impl SearchRequest {
    fn new(index: &str, body: JsonValue) -> Self {
        Self {
            index: index.to_string(),
            allow_no_indices: true,
            ignore_unavailable: true,
            body,
        }
    }

    /// Sets (or clears) the composite `after` cursor. No-op for requests
    /// without a composite aggregation.
    pub fn set_after_key(&mut self, after_key: Option<&JsonValue>) {
        let Some(composite) = self
            .body
            .pointer_mut("/aggregations/groups/composite")
            .and_then(JsonValue::as_object_mut)
        else {
            return;
        };
        match after_key {
            Some(after_key) => {
                composite.insert("after".to_string(), after_key.clone());
            }
            None => {
                composite.remove("after");
            }
        }
    }

    pub fn after_key(&self) -> Option<&JsonValue> {
        self.body.pointer("/aggregations/groups/composite/after")
    }
}

/// Timestamp window and compiled criteria clauses for one search.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaFilters {
    pub range_filter: JsonValue,
    pub grouped_range_filter: JsonValue,
    pub must_filters: Vec<JsonValue>,
    pub must_not_filters: Vec<JsonValue>,
}

pub fn build_filters_from_criteria(
    params: &QueryParams<'_>,
    timestamp_field: &str,
    now: DateTime<Utc>,
) -> EvalResult<CriteriaFilters> {
    let interval_seconds =
        parse_interval_seconds(&params.interval()).map_err(EvaluationError::Validation)?;
    let interval_ms = interval_seconds.saturating_mul(1000);
    let to = now.timestamp_millis();
    let from = to.saturating_sub(interval_ms);

    let (positive, negative): (Vec<&Criterion>, Vec<&Criterion>) = params
        .criteria
        .iter()
        .partition(|criterion| criterion.comparator.polarity() == Polarity::Must);

    Ok(CriteriaFilters {
        range_filter: time_range(timestamp_field, from, to),
        grouped_range_filter: time_range(
            timestamp_field,
            from.saturating_sub(interval_ms),
            to.saturating_add(interval_ms),
        ),
        must_filters: positive.into_iter().map(build_criterion_query).collect(),
        must_not_filters: negative.into_iter().map(build_criterion_query).collect(),
    })
}

fn time_range(timestamp_field: &str, from: i64, to: i64) -> JsonValue {
    json!({
        "range": {
            timestamp_field: {
                "gte": from,
                "lte": to,
                "format": "epoch_millis",
            }
        }
    })
}

pub fn build_criterion_query(criterion: &Criterion) -> JsonValue {
    let field = criterion.field.as_str();
    let value = criterion.value.to_json();
    match criterion.comparator.clause_kind() {
        ClauseKind::Range(bound) => json!({ "range": { field: { bound.as_str(): value } } }),
        ClauseKind::Term => json!({ "term": { field: { "value": value } } }),
        ClauseKind::Match => json!({ "match": { field: value } }),
        ClauseKind::MatchPhrase => {
            json!({ "match_phrase": { field: criterion.value.to_string() } })
        }
    }
}

fn bool_filter(filter: Vec<JsonValue>, must_not: Vec<JsonValue>) -> JsonValue {
    let mut bool_query = Map::new();
    bool_query.insert("filter".to_string(), JsonValue::Array(filter));
    if !must_not.is_empty() {
        bool_query.insert("must_not".to_string(), JsonValue::Array(must_not));
    }
    json!({ "bool": bool_query })
}

fn composite_sources(group_by: &[String]) -> JsonValue {
    group_by
        .iter()
        .enumerate()
        .map(|(index, field)| {
            json!({
                format!("group-{index}-{field}"): {
                    "terms": { "field": field }
                }
            })
        })
        .collect()
}

/// Compiles the search for `params`, dispatching on its [`QueryShape`].
/// Returns `None` only when a grouped search is requested without fields.
pub fn compile_query(
    params: &QueryParams<'_>,
    timestamp_field: &str,
    index: &str,
    runtime_mappings: &JsonValue,
    now: DateTime<Utc>,
) -> EvalResult<Option<SearchRequest>> {
    match QueryShape::select(params) {
        QueryShape::Ungrouped => {
            ungrouped_query(params, timestamp_field, index, runtime_mappings, now).map(Some)
        }
        QueryShape::GroupedOptimized | QueryShape::GroupedWidened => {
            grouped_query(params, timestamp_field, index, runtime_mappings, now)
        }
    }
}

pub fn ungrouped_query(
    params: &QueryParams<'_>,
    timestamp_field: &str,
    index: &str,
    runtime_mappings: &JsonValue,
    now: DateTime<Utc>,
) -> EvalResult<SearchRequest> {
    let CriteriaFilters {
        range_filter,
        must_filters,
        must_not_filters,
        ..
    } = build_filters_from_criteria(params, timestamp_field, now)?;

    let mut filter = vec![range_filter];
    filter.extend(must_filters);

    // Exact counts; without this hits.total caps at 10k.
    let body = json!({
        "track_total_hits": true,
        "query": bool_filter(filter, must_not_filters),
        "runtime_mappings": runtime_mappings,
        "size": 0,
    });
    Ok(SearchRequest::new(index, body))
}

pub fn grouped_query(
    params: &QueryParams<'_>,
    timestamp_field: &str,
    index: &str,
    runtime_mappings: &JsonValue,
    now: DateTime<Utc>,
) -> EvalResult<Option<SearchRequest>> {
    if params.group_by.is_empty() {
        return Ok(None);
    }

    let CriteriaFilters {
        range_filter,
        grouped_range_filter,
        must_filters,
        must_not_filters,
    } = build_filters_from_criteria(params, timestamp_field, now)?;

    let mut filter = vec![range_filter];
    filter.extend(must_filters);
    let composite = json!({
        "size": COMPOSITE_GROUP_SIZE,
        "sources": composite_sources(params.group_by),
    });

    let body = match QueryShape::select(params) {
        QueryShape::GroupedOptimized => json!({
            "query": bool_filter(filter, must_not_filters),
            "aggregations": {
                "groups": { "composite": composite }
            },
            "runtime_mappings": runtime_mappings,
            "size": 0,
        }),
        // Groups must exist as buckets even with zero matching documents, so
        // they are collected over the padded window and counted per bucket
        // against the real window.
        QueryShape::GroupedWidened | QueryShape::Ungrouped => json!({
            "query": { "bool": { "filter": [grouped_range_filter] } },
            "aggregations": {
                "groups": {
                    "composite": composite,
                    "aggregations": {
                        FILTERED_RESULTS_AGG: {
                            "filter": bool_filter(filter, must_not_filters)
                        }
                    }
                }
            },
            "runtime_mappings": runtime_mappings,
            "size": 0,
        }),
    };
    Ok(Some(SearchRequest::new(index, body)))
}
