use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::EvalResult;
use crate::services::elasticsearch::SearchClient;

pub mod eval;
pub mod pagination;
pub mod query;
pub mod results;
pub mod types;

pub use eval::{evaluate, AlertFactory, AlertHandle, LogSource};
pub use types::{parse_alert_params, AlertParams};

/// A configured rule. `params` stays raw so a broken rule only fails its
/// own evaluation.
#[derive(Debug, Clone, Deserialize)]
pub struct LogThresholdRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub params: JsonValue,
}

/// Parses the rule's params and runs one evaluation cycle for it.
pub async fn evaluate_rule<S: SearchClient, F: AlertFactory>(
    rule: &LogThresholdRule,
    source: &LogSource,
    client: &S,
    factory: &F,
    cancel: &CancellationToken,
) -> EvalResult<usize> {
    let params = parse_alert_params(&rule.params)?;
    evaluate(&params, source, client, factory, cancel, Utc::now()).await
}

/// Evaluates every rule once, in order. Returns the number of rules that
/// failed.
pub async fn evaluate_rules_now<S: SearchClient, F: AlertFactory>(
    rules: &[LogThresholdRule],
    source: &LogSource,
    client: &S,
    factory: &F,
    cancel: &CancellationToken,
) -> usize {
    let mut failures = 0;
    for rule in rules {
        match evaluate_rule(rule, source, client, factory, cancel).await {
            Ok(fired) => {
                tracing::debug!(rule_id = %rule.id, rule = %rule.name, fired, "log threshold rule evaluated");
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(rule_id = %rule.id, rule = %rule.name, error = %err, "log threshold rule evaluation failed");
            }
        }
    }
    failures
}

pub struct LogThresholdService<S, F> {
    rules: Arc<Vec<LogThresholdRule>>,
    source: Arc<LogSource>,
    client: Arc<S>,
    factory: Arc<F>,
    poll_interval: Duration,
}

impl<S, F> LogThresholdService<S, F>
where
    S: SearchClient + 'static,
    F: AlertFactory + 'static,
{
    pub fn new(
        rules: Vec<LogThresholdRule>,
        source: LogSource,
        client: Arc<S>,
        factory: Arc<F>,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            rules: Arc::new(rules),
            source: Arc::new(source),
            client,
            factory,
            poll_interval: Duration::from_secs(poll_interval_seconds.max(5)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let failures = evaluate_rules_now(
                            &self.rules,
                            &self.source,
                            self.client.as_ref(),
                            self.factory.as_ref(),
                            &cancel,
                        )
                        .await;
                        if failures > 0 {
                            tracing::warn!(failures, rules = self.rules.len(), "log threshold tick had failures");
                        }
                    }
                }
            }
            tracing::info!("log threshold service stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{hits_response, RecordingAlertFactory, ScriptedSearchClient};
    use serde_json::json;

    fn source() -> LogSource {
        LogSource {
            indices: "logs-*".to_string(),
            timestamp_field: "@timestamp".to_string(),
            runtime_mappings: json!({}),
        }
    }

    fn rule(id: &str, params: JsonValue) -> LogThresholdRule {
        LogThresholdRule {
            id: id.to_string(),
            name: format!("rule {id}"),
            params,
        }
    }

    fn count_params() -> JsonValue {
        json!({
            "count": { "comparator": "more than", "value": 1 },
            "timeSize": 5,
            "timeUnit": "m",
            "criteria": [{ "field": "log.level", "comparator": "equals", "value": "error" }]
        })
    }

    #[tokio::test]
    async fn broken_rule_does_not_stop_the_others() {
        let rules = vec![
            rule("bad", json!({ "count": { "comparator": "more than" } })),
            rule("good", count_params()),
        ];
        let client = ScriptedSearchClient::new(vec![Ok(hits_response(3))]);
        let factory = RecordingAlertFactory::default();

        let failures =
            evaluate_rules_now(&rules, &source(), &client, &factory, &CancellationToken::new())
                .await;

        assert_eq!(failures, 1);
        assert_eq!(client.requests().len(), 1);
        assert_eq!(factory.alerts().len(), 1);
    }

    #[tokio::test]
    async fn service_stops_on_cancel() {
        let client = Arc::new(ScriptedSearchClient::new(vec![Ok(hits_response(0))]));
        let factory = Arc::new(RecordingAlertFactory::default());
        let service = LogThresholdService::new(
            vec![rule("r1", count_params())],
            source(),
            client.clone(),
            factory,
            1,
        );
        assert_eq!(service.poll_interval(), Duration::from_secs(5));

        let cancel = CancellationToken::new();
        let handle = service.start(cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn rules_deserialize_with_raw_params() {
        let rules: Vec<LogThresholdRule> = serde_json::from_value(json!([
            { "id": "r1", "name": "errors", "params": count_params() },
            { "id": "r2", "params": {} }
        ]))
        .unwrap();
        assert_eq!(rules[0].name, "errors");
        assert_eq!(rules[1].name, "");
        assert!(parse_alert_params(&rules[1].params).is_err());
    }
}
