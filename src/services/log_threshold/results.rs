use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{EvalResult, EvaluationError};

#[derive(Debug, Clone, Deserialize)]
pub struct UngroupedSearchResponse {
    pub hits: Hits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hits {
    pub total: HitsTotal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitsTotal {
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupedSearchResponse {
    pub aggregations: GroupedAggregations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupedAggregations {
    pub groups: CompositeGroups,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompositeGroups {
    #[serde(default)]
    pub after_key: Option<JsonValue>,
    pub buckets: Vec<GroupBucket>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupBucket {
    /// Composite key in source order (`serde_json` is built with
    /// `preserve_order`).
    pub key: Map<String, JsonValue>,
    pub doc_count: u64,
    #[serde(default)]
    pub filtered_results: Option<FilteredResults>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilteredResults {
    pub doc_count: u64,
}

impl GroupBucket {
    pub fn group_name(&self) -> String {
        self.key
            .values()
            .map(key_part)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Matching documents: the per-bucket filter count on the widened path,
    /// the bucket count on the optimized path.
    pub fn document_count(&self) -> u64 {
        match &self.filtered_results {
            Some(filtered) => filtered.doc_count,
            None => self.doc_count,
        }
    }
}

fn key_part(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    pub name: String,
    pub document_count: u64,
}

pub fn decode_ungrouped_response(raw: JsonValue) -> EvalResult<UngroupedSearchResponse> {
    serde_json::from_value(raw)
        .map_err(|err| EvaluationError::MalformedResponse(format!("ungrouped search: {err}")))
}

pub fn decode_grouped_response(raw: JsonValue) -> EvalResult<GroupedSearchResponse> {
    serde_json::from_value(raw)
        .map_err(|err| EvaluationError::MalformedResponse(format!("grouped search: {err}")))
}

/// Normalizes composite buckets into named groups, keeping response order.
pub fn reduce_group_buckets(buckets: &[GroupBucket]) -> Vec<GroupResult> {
    buckets
        .iter()
        .map(|bucket| GroupResult {
            name: bucket.group_name(),
            document_count: bucket.document_count(),
        })
        .collect()
}

/// `numerator / denominator`, undefined when either side is zero.
pub fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if numerator == 0 || denominator == 0 {
        return None;
    }
    Some(numerator as f64 / denominator as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRatio {
    pub name: String,
    pub ratio: Option<f64>,
}

/// Pairs each numerator group with the denominator group of the same name.
/// Groups without a counterpart get an undefined ratio.
pub fn pair_group_ratios(numerator: &[GroupResult], denominator: &[GroupResult]) -> Vec<GroupRatio> {
    numerator
        .iter()
        .map(|group| {
            let ratio = denominator
                .iter()
                .find(|candidate| candidate.name == group.name)
                .and_then(|candidate| ratio(group.document_count, candidate.document_count));
            GroupRatio {
                name: group.name.clone(),
                ratio,
            }
        })
        .collect()
}
