use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::{EvalResult, EvaluationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "more than")]
    Gt,
    #[serde(rename = "more than or equals")]
    GtOrEq,
    #[serde(rename = "less than")]
    Lt,
    #[serde(rename = "less than or equals")]
    LtOrEq,
    #[serde(rename = "equals")]
    Eq,
    #[serde(rename = "does not equal")]
    NotEq,
    #[serde(rename = "matches")]
    Match,
    #[serde(rename = "does not match")]
    NotMatch,
    #[serde(rename = "matches phrase")]
    MatchPhrase,
    #[serde(rename = "does not match phrase")]
    NotMatchPhrase,
}

pub const ALL_COMPARATORS: [Comparator; 10] = [
    Comparator::Gt,
    Comparator::GtOrEq,
    Comparator::Lt,
    Comparator::LtOrEq,
    Comparator::Eq,
    Comparator::NotEq,
    Comparator::Match,
    Comparator::NotMatch,
    Comparator::MatchPhrase,
    Comparator::NotMatchPhrase,
];

/// Comparators asserted as `filter` clauses.
pub const POSITIVE_COMPARATORS: [Comparator; 7] = [
    Comparator::Gt,
    Comparator::GtOrEq,
    Comparator::Lt,
    Comparator::LtOrEq,
    Comparator::Eq,
    Comparator::Match,
    Comparator::MatchPhrase,
];

/// Comparators asserted as `must_not` clauses.
pub const NEGATIVE_COMPARATORS: [Comparator; 3] = [
    Comparator::NotEq,
    Comparator::NotMatch,
    Comparator::NotMatchPhrase,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Must,
    MustNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeBound {
    pub fn as_str(self) -> &'static str {
        match self {
            RangeBound::Gt => "gt",
            RangeBound::Gte => "gte",
            RangeBound::Lt => "lt",
            RangeBound::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Range(RangeBound),
    Term,
    Match,
    MatchPhrase,
}

impl Comparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Gt => "more than",
            Comparator::GtOrEq => "more than or equals",
            Comparator::Lt => "less than",
            Comparator::LtOrEq => "less than or equals",
            Comparator::Eq => "equals",
            Comparator::NotEq => "does not equal",
            Comparator::Match => "matches",
            Comparator::NotMatch => "does not match",
            Comparator::MatchPhrase => "matches phrase",
            Comparator::NotMatchPhrase => "does not match phrase",
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Comparator::Gt
            | Comparator::GtOrEq
            | Comparator::Lt
            | Comparator::LtOrEq
            | Comparator::Eq
            | Comparator::Match
            | Comparator::MatchPhrase => Polarity::Must,
            Comparator::NotEq | Comparator::NotMatch | Comparator::NotMatchPhrase => {
                Polarity::MustNot
            }
        }
    }

    /// Query clause a criterion with this comparator compiles to. Negative
    /// comparators share the clause of their positive twin; the negation
    /// comes from `must_not` placement.
    pub fn clause_kind(self) -> ClauseKind {
        match self {
            Comparator::Gt => ClauseKind::Range(RangeBound::Gt),
            Comparator::GtOrEq => ClauseKind::Range(RangeBound::Gte),
            Comparator::Lt => ClauseKind::Range(RangeBound::Lt),
            Comparator::LtOrEq => ClauseKind::Range(RangeBound::Lte),
            Comparator::Eq | Comparator::NotEq => ClauseKind::Term,
            Comparator::Match | Comparator::NotMatch => ClauseKind::Match,
            Comparator::MatchPhrase | Comparator::NotMatchPhrase => ClauseKind::MatchPhrase,
        }
    }

    /// Numeric predicate used against the rule's count threshold.
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::GtOrEq => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::LtOrEq => value <= threshold,
            Comparator::Eq | Comparator::Match | Comparator::MatchPhrase => {
                (value - threshold).abs() <= f64::EPSILON
            }
            Comparator::NotEq | Comparator::NotMatch | Comparator::NotMatchPhrase => {
                (value - threshold).abs() > f64::EPSILON
            }
        }
    }

    pub fn is_count_comparator(self) -> bool {
        matches!(self.clause_kind(), ClauseKind::Range(_))
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether pushing the criteria filters into the top-level query can hide a
/// group that should fire. `>= 0` is satisfied by groups without matching
/// documents, so only a strictly positive `>=` threshold qualifies.
pub fn is_optimizable_grouped_threshold(comparator: Comparator, value: f64) -> bool {
    match comparator {
        Comparator::Gt => true,
        Comparator::GtOrEq => value > 0.0,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Number(serde_json::Number),
    Text(String),
}

impl CriterionValue {
    pub fn to_json(&self) -> JsonValue {
        match self {
            CriterionValue::Number(number) => JsonValue::Number(number.clone()),
            CriterionValue::Text(text) => JsonValue::String(text.clone()),
        }
    }
}

impl fmt::Display for CriterionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionValue::Number(number) => write!(f, "{number}"),
            CriterionValue::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: String,
    pub comparator: Comparator,
    pub value: CriterionValue,
}

impl Criterion {
    pub fn new(field: &str, comparator: Comparator, value: impl Into<CriterionValue>) -> Self {
        Self {
            field: field.to_string(),
            comparator,
            value: value.into(),
        }
    }
}

impl From<&str> for CriterionValue {
    fn from(value: &str) -> Self {
        CriterionValue::Text(value.to_string())
    }
}

impl From<i64> for CriterionValue {
    fn from(value: i64) -> Self {
        CriterionValue::Number(value.into())
    }
}

impl From<i32> for CriterionValue {
    fn from(value: i32) -> Self {
        CriterionValue::Number(value.into())
    }
}

/// Rule criteria: a flat list for count rules, or a `[numerator,
/// denominator]` pair for ratio rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleCriteria {
    Count(Vec<Criterion>),
    Ratio(Vec<Criterion>, Vec<Criterion>),
}

impl RuleCriteria {
    pub fn is_ratio(&self) -> bool {
        matches!(self, RuleCriteria::Ratio(..))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl TimeUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountThreshold {
    pub comparator: Comparator,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertParams {
    pub count: CountThreshold,
    pub time_size: u32,
    pub time_unit: TimeUnit,
    pub criteria: RuleCriteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
}

impl AlertParams {
    pub fn has_group_by(&self) -> bool {
        self.group_by.as_ref().is_some_and(|fields| !fields.is_empty())
    }

    pub fn group_by_fields(&self) -> &[String] {
        self.group_by.as_deref().unwrap_or(&[])
    }

    pub fn interval(&self) -> String {
        format!("{}{}", self.time_size, self.time_unit.as_str())
    }

    pub fn query_params<'a>(&'a self, criteria: &'a [Criterion]) -> QueryParams<'a> {
        QueryParams {
            count: self.count,
            time_size: self.time_size,
            time_unit: self.time_unit,
            criteria,
            group_by: self.group_by_fields(),
        }
    }
}

/// The subset of parameters one compiled search needs. Ratio rules produce
/// two of these, one per side.
#[derive(Debug, Clone, Copy)]
pub struct QueryParams<'a> {
    pub count: CountThreshold,
    pub time_size: u32,
    pub time_unit: TimeUnit,
    pub criteria: &'a [Criterion],
    pub group_by: &'a [String],
}

impl<'a> QueryParams<'a> {
    pub fn interval(&self) -> String {
        format!("{}{}", self.time_size, self.time_unit.as_str())
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }
}

pub fn parse_alert_params(raw: &JsonValue) -> EvalResult<AlertParams> {
    let params: AlertParams = serde_json::from_value(raw.clone())
        .map_err(|err| EvaluationError::Validation(err.to_string()))?;
    validate_alert_params(&params).map_err(EvaluationError::Validation)?;
    Ok(params)
}

pub fn validate_alert_params(params: &AlertParams) -> Result<(), String> {
    if params.time_size < 1 {
        return Err("timeSize must be >= 1".to_string());
    }
    if !params.count.value.is_finite() || params.count.value < 0.0 {
        return Err("count.value must be a finite number >= 0".to_string());
    }
    if !params.count.comparator.is_count_comparator() {
        return Err(format!(
            "count.comparator '{}' is not supported for thresholds",
            params.count.comparator
        ));
    }
    if let Some(group_by) = &params.group_by {
        if group_by.iter().any(|field| field.trim().is_empty()) {
            return Err("groupBy has blank field".to_string());
        }
    }

    let criteria: Vec<&Criterion> = match &params.criteria {
        RuleCriteria::Count(criteria) => criteria.iter().collect(),
        RuleCriteria::Ratio(numerator, denominator) => {
            numerator.iter().chain(denominator.iter()).collect()
        }
    };
    if criteria.iter().any(|criterion| criterion.field.trim().is_empty()) {
        return Err("criteria has blank field".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn comparators_partition_into_positive_and_negative() {
        assert_eq!(POSITIVE_COMPARATORS.len(), 7);
        assert_eq!(NEGATIVE_COMPARATORS.len(), 3);
        assert_eq!(
            POSITIVE_COMPARATORS.len() + NEGATIVE_COMPARATORS.len(),
            ALL_COMPARATORS.len()
        );

        for comparator in ALL_COMPARATORS {
            let positive = POSITIVE_COMPARATORS.contains(&comparator);
            let negative = NEGATIVE_COMPARATORS.contains(&comparator);
            assert!(positive ^ negative, "{comparator} must be in exactly one set");
            let expected = if positive {
                Polarity::Must
            } else {
                Polarity::MustNot
            };
            assert_eq!(comparator.polarity(), expected);
        }

        let distinct: HashSet<Comparator> = ALL_COMPARATORS.iter().copied().collect();
        assert_eq!(distinct.len(), ALL_COMPARATORS.len());
    }

    #[test]
    fn clause_kinds_follow_comparator_family() {
        assert_eq!(
            Comparator::Gt.clause_kind(),
            ClauseKind::Range(RangeBound::Gt)
        );
        assert_eq!(
            Comparator::LtOrEq.clause_kind(),
            ClauseKind::Range(RangeBound::Lte)
        );
        assert_eq!(Comparator::NotEq.clause_kind(), ClauseKind::Term);
        assert_eq!(Comparator::NotMatch.clause_kind(), ClauseKind::Match);
        assert_eq!(
            Comparator::NotMatchPhrase.clause_kind(),
            ClauseKind::MatchPhrase
        );
    }

    #[test]
    fn threshold_predicates() {
        assert!(Comparator::Gt.check(10.0, 5.0));
        assert!(!Comparator::Gt.check(5.0, 5.0));
        assert!(Comparator::GtOrEq.check(5.0, 5.0));
        assert!(Comparator::Lt.check(1.0, 5.0));
        assert!(!Comparator::Lt.check(5.0, 5.0));
        assert!(Comparator::LtOrEq.check(5.0, 5.0));
        assert!(Comparator::Eq.check(0.5, 0.5));
        assert!(Comparator::NotEq.check(0.5, 0.25));
    }

    #[test]
    fn optimizable_thresholds() {
        assert!(is_optimizable_grouped_threshold(Comparator::Gt, 0.0));
        assert!(is_optimizable_grouped_threshold(Comparator::GtOrEq, 1.0));
        assert!(!is_optimizable_grouped_threshold(Comparator::GtOrEq, 0.0));
        assert!(!is_optimizable_grouped_threshold(Comparator::Lt, 5.0));
        assert!(!is_optimizable_grouped_threshold(Comparator::LtOrEq, 5.0));
    }

    #[test]
    fn parses_count_and_ratio_params() {
        let count = parse_alert_params(&json!({
            "count": { "comparator": "more than", "value": 5 },
            "timeSize": 5,
            "timeUnit": "m",
            "criteria": [
                { "field": "numericField", "comparator": "more than", "value": 10 },
                { "field": "message", "comparator": "matches", "value": "error" }
            ],
            "groupBy": ["host.name"]
        }))
        .expect("count params");
        assert!(!count.criteria.is_ratio());
        assert!(count.has_group_by());
        assert_eq!(count.interval(), "5m");
        let RuleCriteria::Count(criteria) = &count.criteria else {
            panic!("expected count criteria");
        };
        assert_eq!(criteria[0].value.to_string(), "10");
        assert_eq!(criteria[1].value.to_string(), "error");

        let ratio = parse_alert_params(&json!({
            "count": { "comparator": "more than or equals", "value": 0.5 },
            "timeSize": 1,
            "timeUnit": "h",
            "criteria": [
                [{ "field": "log.level", "comparator": "equals", "value": "error" }],
                [{ "field": "log.level", "comparator": "does not equal", "value": "debug" }]
            ]
        }))
        .expect("ratio params");
        assert!(ratio.criteria.is_ratio());
        assert!(!ratio.has_group_by());
    }

    #[test]
    fn rejects_invalid_params() {
        let base = json!({
            "count": { "comparator": "more than", "value": 5 },
            "timeSize": 5,
            "timeUnit": "m",
            "criteria": []
        });

        let mut unknown_unit = base.clone();
        unknown_unit["timeUnit"] = json!("w");
        assert!(matches!(
            parse_alert_params(&unknown_unit),
            Err(EvaluationError::Validation(_))
        ));

        let mut zero_size = base.clone();
        zero_size["timeSize"] = json!(0);
        assert!(matches!(
            parse_alert_params(&zero_size),
            Err(EvaluationError::Validation(_))
        ));

        let mut text_threshold = base.clone();
        text_threshold["count"]["comparator"] = json!("matches");
        assert!(matches!(
            parse_alert_params(&text_threshold),
            Err(EvaluationError::Validation(_))
        ));

        let mut blank_group = base.clone();
        blank_group["groupBy"] = json!(["host.name", " "]);
        assert!(matches!(
            parse_alert_params(&blank_group),
            Err(EvaluationError::Validation(_))
        ));

        let mut blank_field = base;
        blank_field["criteria"] = json!([{ "field": "", "comparator": "equals", "value": 1 }]);
        assert!(matches!(
            parse_alert_params(&blank_field),
            Err(EvaluationError::Validation(_))
        ));
    }
}
