use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::pagination::{fetch_all_groups, fetch_ungrouped_count};
use super::query::{compile_query, QueryShape, SearchRequest, COMPOSITE_GROUP_SIZE};
use super::results::{pair_group_ratios, ratio, reduce_group_buckets, GroupResult};
use super::types::{AlertParams, Comparator, CountThreshold, Criterion, QueryParams, RuleCriteria};
use crate::error::{EvalResult, EvaluationError};
use crate::services::elasticsearch::SearchClient;

pub const FIRED_ACTION_GROUP: &str = "logs.threshold.fired";

/// Alert id used when a rule has no group-by fields.
pub const UNGROUPED_FACTORY_KEY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertStatus {
    #[serde(rename = "ALERT")]
    Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInstanceState {
    pub alert_state: AlertStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AlertDetails {
    #[serde(rename_all = "camelCase")]
    Count {
        matching_documents: u64,
        conditions: String,
        group: Option<String>,
        is_ratio: bool,
    },
    #[serde(rename_all = "camelCase")]
    Ratio {
        ratio: f64,
        numerator_conditions: String,
        denominator_conditions: String,
        group: Option<String>,
        is_ratio: bool,
    },
}

impl AlertDetails {
    pub fn count(matching_documents: u64, criteria: &[Criterion], group: Option<&str>) -> Self {
        AlertDetails::Count {
            matching_documents,
            conditions: conditions_message(criteria),
            group: group.map(str::to_string),
            is_ratio: false,
        }
    }

    pub fn ratio(
        ratio: f64,
        numerator: &[Criterion],
        denominator: &[Criterion],
        group: Option<&str>,
    ) -> Self {
        AlertDetails::Ratio {
            ratio,
            numerator_conditions: conditions_message(numerator),
            denominator_conditions: conditions_message(denominator),
            group: group.map(str::to_string),
            is_ratio: true,
        }
    }

    pub fn group(&self) -> Option<&str> {
        match self {
            AlertDetails::Count { group, .. } | AlertDetails::Ratio { group, .. } => {
                group.as_deref()
            }
        }
    }
}

/// Context attached to a scheduled action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionContext {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub details: AlertDetails,
}

/// Handle to one alert instance, owned by the alerting framework.
pub trait AlertHandle {
    fn schedule_actions(&mut self, action_group: &str, context: ActionContext);
    fn replace_state(&mut self, state: AlertInstanceState);
}

/// Creates alert instances. Persistence and deduplication across cycles
/// belong to the implementor.
pub trait AlertFactory: Send + Sync {
    type Alert: AlertHandle;

    fn create(&self, id: &str, reason: &str, value: f64, threshold: f64) -> Self::Alert;
}

/// Resolved log source a rule is evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSource {
    pub indices: String,
    pub timestamp_field: String,
    /// Runtime field definitions, passed through to every search untouched.
    pub runtime_mappings: JsonValue,
}

pub fn conditions_message(criteria: &[Criterion]) -> String {
    criteria
        .iter()
        .map(|criterion| {
            format!(
                "{} {} {}",
                criterion.field, criterion.comparator, criterion.value
            )
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

fn log_entries(count: u64) -> String {
    if count == 1 {
        format!("{count} log entry")
    } else {
        format!("{count} log entries")
    }
}

pub fn reason_for_count_alert(
    actual: u64,
    expected: f64,
    comparator: Comparator,
    group: Option<&str>,
) -> String {
    match group {
        Some(group) => format!(
            "{} ({comparator} {expected}) match the conditions for {group}.",
            log_entries(actual)
        ),
        None => format!(
            "{} ({comparator} {expected}) match the conditions.",
            log_entries(actual)
        ),
    }
}

pub fn reason_for_ratio_alert(
    actual: f64,
    expected: f64,
    comparator: Comparator,
    group: Option<&str>,
) -> String {
    match group {
        Some(group) => format!(
            "The log entries ratio is {actual} ({comparator} {expected}) for {group}."
        ),
        None => format!("The log entries ratio is {actual} ({comparator} {expected})."),
    }
}

fn fire<F: AlertFactory>(
    factory: &F,
    id: &str,
    reason: &str,
    value: f64,
    threshold: f64,
    details: AlertDetails,
    now: DateTime<Utc>,
) {
    tracing::info!(alert_id = id, value, threshold, "log threshold alert fired");
    let mut alert = factory.create(id, reason, value, threshold);
    alert.schedule_actions(
        FIRED_ACTION_GROUP,
        ActionContext {
            timestamp: now,
            details,
        },
    );
    alert.replace_state(AlertInstanceState {
        alert_state: AlertStatus::Alert,
    });
}

pub fn process_ungrouped_results<F: AlertFactory>(
    document_count: u64,
    count: CountThreshold,
    criteria: &[Criterion],
    factory: &F,
    now: DateTime<Utc>,
) -> usize {
    if !count.comparator.check(document_count as f64, count.value) {
        return 0;
    }
    fire(
        factory,
        UNGROUPED_FACTORY_KEY,
        &reason_for_count_alert(document_count, count.value, count.comparator, None),
        document_count as f64,
        count.value,
        AlertDetails::count(document_count, criteria, None),
        now,
    );
    1
}

pub fn process_ungrouped_ratio_results<F: AlertFactory>(
    numerator_count: u64,
    denominator_count: u64,
    count: CountThreshold,
    numerator: &[Criterion],
    denominator: &[Criterion],
    factory: &F,
    now: DateTime<Utc>,
) -> usize {
    let Some(ratio) = ratio(numerator_count, denominator_count) else {
        return 0;
    };
    if !count.comparator.check(ratio, count.value) {
        return 0;
    }
    fire(
        factory,
        UNGROUPED_FACTORY_KEY,
        &reason_for_ratio_alert(ratio, count.value, count.comparator, None),
        ratio,
        count.value,
        AlertDetails::ratio(ratio, numerator, denominator, None),
        now,
    );
    1
}

pub fn process_group_by_results<F: AlertFactory>(
    groups: &[GroupResult],
    count: CountThreshold,
    criteria: &[Criterion],
    factory: &F,
    now: DateTime<Utc>,
) -> usize {
    let mut fired = 0;
    for group in groups {
        let document_count = group.document_count;
        if !count.comparator.check(document_count as f64, count.value) {
            continue;
        }
        fire(
            factory,
            &group.name,
            &reason_for_count_alert(
                document_count,
                count.value,
                count.comparator,
                Some(&group.name),
            ),
            document_count as f64,
            count.value,
            AlertDetails::count(document_count, criteria, Some(&group.name)),
            now,
        );
        fired += 1;
    }
    fired
}

pub fn process_group_by_ratio_results<F: AlertFactory>(
    numerator_groups: &[GroupResult],
    denominator_groups: &[GroupResult],
    count: CountThreshold,
    numerator: &[Criterion],
    denominator: &[Criterion],
    factory: &F,
    now: DateTime<Utc>,
) -> usize {
    let mut fired = 0;
    for group in pair_group_ratios(numerator_groups, denominator_groups) {
        let Some(ratio) = group.ratio else {
            continue;
        };
        if !count.comparator.check(ratio, count.value) {
            continue;
        }
        fire(
            factory,
            &group.name,
            &reason_for_ratio_alert(ratio, count.value, count.comparator, Some(&group.name)),
            ratio,
            count.value,
            AlertDetails::ratio(ratio, numerator, denominator, Some(&group.name)),
            now,
        );
        fired += 1;
    }
    fired
}

fn build_query(
    params: &QueryParams<'_>,
    source: &LogSource,
    now: DateTime<Utc>,
) -> EvalResult<SearchRequest> {
    compile_query(
        params,
        &source.timestamp_field,
        &source.indices,
        &source.runtime_mappings,
        now,
    )?
    .ok_or_else(|| {
        EvaluationError::Configuration(
            "search could not be built from the provided rule params".to_string(),
        )
    })
}

async fn fetch_groups<S: SearchClient>(
    client: &S,
    request: &SearchRequest,
    cancel: &CancellationToken,
) -> EvalResult<Vec<GroupResult>> {
    let walk = fetch_all_groups(client, request, COMPOSITE_GROUP_SIZE, cancel).await?;
    tracing::debug!(
        pages = walk.round_trips,
        groups = walk.buckets.len(),
        "composite walk finished"
    );
    Ok(reduce_group_buckets(&walk.buckets))
}

/// Runs one evaluation cycle of a log threshold rule and fires an alert per
/// group (or once, ungrouped) whose count or ratio meets the threshold.
///
/// Any error aborts the cycle before alerts are emitted: all searches
/// complete before the first alert is created. Returns the number of alerts
/// fired.
pub async fn evaluate<S: SearchClient, F: AlertFactory>(
    params: &AlertParams,
    source: &LogSource,
    client: &S,
    factory: &F,
    cancel: &CancellationToken,
    now: DateTime<Utc>,
) -> EvalResult<usize> {
    match &params.criteria {
        RuleCriteria::Count(criteria) => {
            let query_params = params.query_params(criteria);
            let request = build_query(&query_params, source, now)?;

            if QueryShape::select(&query_params).is_grouped() {
                let groups = fetch_groups(client, &request, cancel).await?;
                Ok(process_group_by_results(
                    &groups,
                    params.count,
                    criteria,
                    factory,
                    now,
                ))
            } else {
                let document_count = fetch_ungrouped_count(client, &request, cancel).await?;
                Ok(process_ungrouped_results(
                    document_count,
                    params.count,
                    criteria,
                    factory,
                    now,
                ))
            }
        }
        RuleCriteria::Ratio(numerator, denominator) => {
            if numerator.is_empty() || denominator.is_empty() {
                return Err(EvaluationError::Configuration(
                    "ratio rules need numerator and denominator criteria".to_string(),
                ));
            }
            let numerator_params = params.query_params(numerator);
            let denominator_params = params.query_params(denominator);
            let numerator_request = build_query(&numerator_params, source, now)?;
            let denominator_request = build_query(&denominator_params, source, now)?;

            if QueryShape::select(&numerator_params).is_grouped() {
                let (numerator_groups, denominator_groups) = tokio::try_join!(
                    fetch_groups(client, &numerator_request, cancel),
                    fetch_groups(client, &denominator_request, cancel),
                )?;
                Ok(process_group_by_ratio_results(
                    &numerator_groups,
                    &denominator_groups,
                    params.count,
                    numerator,
                    denominator,
                    factory,
                    now,
                ))
            } else {
                let (numerator_count, denominator_count) = tokio::try_join!(
                    fetch_ungrouped_count(client, &numerator_request, cancel),
                    fetch_ungrouped_count(client, &denominator_request, cancel),
                )?;
                Ok(process_ungrouped_ratio_results(
                    numerator_count,
                    denominator_count,
                    params.count,
                    numerator,
                    denominator,
                    factory,
                    now,
                ))
            }
        }
    }
}
