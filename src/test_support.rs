use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::SearchError;
use crate::services::elasticsearch::SearchClient;
use crate::services::log_threshold::eval::{
    ActionContext, AlertFactory, AlertHandle, AlertInstanceState,
};
use crate::services::log_threshold::query::SearchRequest;

/// Answers searches from a queue of canned responses and records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedSearchClient {
    responses: Mutex<VecDeque<Result<JsonValue, SearchError>>>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl ScriptedSearchClient {
    pub fn new(responses: Vec<Result<JsonValue, SearchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl SearchClient for ScriptedSearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<JsonValue, SearchError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(SearchError::Status {
                    status: 500,
                    body: "no scripted response left".to_string(),
                })
            })
    }
}

pub fn hits_response(total: u64) -> JsonValue {
    json!({ "hits": { "total": { "value": total, "relation": "eq" }, "hits": [] } })
}

/// One composite page grouped by `host.name`, one document per host.
pub fn grouped_page(hosts: &[String], after_host: Option<&str>) -> JsonValue {
    let buckets: Vec<JsonValue> = hosts
        .iter()
        .map(|host| json!({ "key": { "group-0-host.name": host }, "doc_count": 1 }))
        .collect();
    let mut groups = json!({ "buckets": buckets });
    if let Some(after) = after_host {
        groups["after_key"] = json!({ "group-0-host.name": after });
    }
    json!({ "aggregations": { "groups": groups } })
}

#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub id: String,
    pub reason: String,
    pub value: f64,
    pub threshold: f64,
    pub actions: Vec<(String, ActionContext)>,
    pub state: Option<AlertInstanceState>,
}

#[derive(Default)]
pub struct RecordingAlertFactory {
    alerts: Arc<Mutex<Vec<RecordedAlert>>>,
}

impl RecordingAlertFactory {
    pub fn alerts(&self) -> Vec<RecordedAlert> {
        self.alerts.lock().expect("alerts lock").clone()
    }
}

pub struct RecordingAlert {
    alerts: Arc<Mutex<Vec<RecordedAlert>>>,
    index: usize,
}

impl AlertFactory for RecordingAlertFactory {
    type Alert = RecordingAlert;

    fn create(&self, id: &str, reason: &str, value: f64, threshold: f64) -> RecordingAlert {
        let mut alerts = self.alerts.lock().expect("alerts lock");
        alerts.push(RecordedAlert {
            id: id.to_string(),
            reason: reason.to_string(),
            value,
            threshold,
            actions: Vec::new(),
            state: None,
        });
        RecordingAlert {
            alerts: self.alerts.clone(),
            index: alerts.len() - 1,
        }
    }
}

impl AlertHandle for RecordingAlert {
    fn schedule_actions(&mut self, action_group: &str, context: ActionContext) {
        self.alerts.lock().expect("alerts lock")[self.index]
            .actions
            .push((action_group.to_string(), context));
    }

    fn replace_state(&mut self, state: AlertInstanceState) {
        self.alerts.lock().expect("alerts lock")[self.index].state = Some(state);
    }
}
