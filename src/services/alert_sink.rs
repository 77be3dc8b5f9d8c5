use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::services::log_threshold::eval::{
    ActionContext, AlertFactory, AlertHandle, AlertInstanceState,
};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Emits one JSON line per scheduled action.
#[derive(Clone)]
pub struct JsonLinesAlertFactory {
    writer: SharedWriter,
}

impl JsonLinesAlertFactory {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

pub struct JsonLinesAlert {
    writer: SharedWriter,
    id: String,
    reason: String,
    value: f64,
    threshold: f64,
    state: Option<AlertInstanceState>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionLine<'a> {
    alert_id: &'a str,
    action_group: &'a str,
    reason: &'a str,
    value: f64,
    threshold: f64,
    context: &'a ActionContext,
}

impl AlertFactory for JsonLinesAlertFactory {
    type Alert = JsonLinesAlert;

    fn create(&self, id: &str, reason: &str, value: f64, threshold: f64) -> JsonLinesAlert {
        JsonLinesAlert {
            writer: self.writer.clone(),
            id: id.to_string(),
            reason: reason.to_string(),
            value,
            threshold,
            state: None,
        }
    }
}

impl JsonLinesAlert {
    pub fn state(&self) -> Option<&AlertInstanceState> {
        self.state.as_ref()
    }
}

impl AlertHandle for JsonLinesAlert {
    fn schedule_actions(&mut self, action_group: &str, context: ActionContext) {
        let line = ActionLine {
            alert_id: &self.id,
            action_group,
            reason: &self.reason,
            value: self.value,
            threshold: self.threshold,
            context: &context,
        };
        let encoded = match serde_json::to_string(&line) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(alert_id = %self.id, error = %err, "failed to encode alert action");
                return;
            }
        };
        let Ok(mut writer) = self.writer.lock() else {
            tracing::warn!(alert_id = %self.id, "alert writer poisoned");
            return;
        };
        if let Err(err) = writeln!(writer, "{encoded}").and_then(|_| writer.flush()) {
            tracing::warn!(alert_id = %self.id, error = %err, "failed to write alert action");
        }
    }

    fn replace_state(&mut self, state: AlertInstanceState) {
        self.state = Some(state);
    }
}
