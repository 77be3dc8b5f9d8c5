use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::services::elasticsearch::BasicAuth;
use crate::services::log_threshold::{LogSource, LogThresholdRule};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub es_url: Url,
    pub es_username: Option<String>,
    pub es_password: Option<String>,
    pub index: String,
    pub timestamp_field: String,
    pub runtime_mappings_path: Option<PathBuf>,
    pub rules_path: PathBuf,
    pub poll_interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl RunnerConfig {
    pub fn from_env(cli_rules_path: Option<PathBuf>) -> Result<Self> {
        let es_url_raw = env_string("LOG_THRESHOLD_ES_URL", "http://127.0.0.1:9200");
        let es_url = Url::parse(&es_url_raw)
            .with_context(|| format!("LOG_THRESHOLD_ES_URL is not a valid url: {es_url_raw}"))?;
        if es_url.cannot_be_a_base() {
            anyhow::bail!("LOG_THRESHOLD_ES_URL must be an http(s) base url");
        }

        let rules_path = match cli_rules_path {
            Some(path) => path,
            None => env_path("LOG_THRESHOLD_RULES_PATH", "rules.json")?,
        };

        Ok(Self {
            es_url,
            es_username: env_optional_string("LOG_THRESHOLD_ES_USERNAME"),
            es_password: env_optional_string("LOG_THRESHOLD_ES_PASSWORD"),
            index: env_string("LOG_THRESHOLD_INDEX", "logs-*,filebeat-*"),
            timestamp_field: env_string("LOG_THRESHOLD_TIMESTAMP_FIELD", "@timestamp"),
            runtime_mappings_path: env_optional_path("LOG_THRESHOLD_RUNTIME_MAPPINGS_PATH"),
            rules_path,
            poll_interval_seconds: env_u64("LOG_THRESHOLD_POLL_INTERVAL_SECONDS", 60).max(5),
            request_timeout_seconds: env_u64("LOG_THRESHOLD_REQUEST_TIMEOUT_SECONDS", 30),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn basic_auth(&self) -> Option<BasicAuth> {
        self.es_username.as_ref().map(|username| BasicAuth {
            username: username.clone(),
            password: self.es_password.clone(),
        })
    }

    pub fn log_source(&self) -> Result<LogSource> {
        let runtime_mappings = match &self.runtime_mappings_path {
            Some(path) => load_runtime_mappings(path)?,
            None => JsonValue::Object(Default::default()),
        };
        Ok(LogSource {
            indices: self.index.clone(),
            timestamp_field: self.timestamp_field.clone(),
            runtime_mappings,
        })
    }
}

pub fn load_rules(path: &Path) -> Result<Vec<LogThresholdRule>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    let rules: Vec<LogThresholdRule> = serde_json::from_str(&raw)
        .with_context(|| format!("rules file {} is not a JSON array of rules", path.display()))?;
    let mut seen = std::collections::HashSet::new();
    for rule in &rules {
        if !seen.insert(rule.id.as_str()) {
            anyhow::bail!("duplicate rule id {} in {}", rule.id, path.display());
        }
    }
    Ok(rules)
}

pub fn load_runtime_mappings(path: &Path) -> Result<JsonValue> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read runtime mappings {}", path.display()))?;
    let value: JsonValue = serde_json::from_str(&raw)
        .with_context(|| format!("runtime mappings {} are not valid JSON", path.display()))?;
    if !value.is_object() {
        anyhow::bail!("runtime mappings {} must be a JSON object", path.display());
    }
    Ok(value)
}

fn env_string(key: &str, default: &str) -> String {
    env_optional_string(key).unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

fn env_path(key: &str, default: &str) -> Result<PathBuf> {
    let value = env_optional_string(key).unwrap_or_else(|| default.to_string());
    let path = PathBuf::from(value);
    if path.as_os_str().is_empty() {
        anyhow::bail!("{key} resolved to an empty path");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "rules.json",
            r#"[{"id":"errors","name":"Error spike","params":{"timeSize":5}}]"#,
        );
        let rules = load_rules(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "errors");
        assert_eq!(rules[0].params, json!({ "timeSize": 5 }));
    }

    #[test]
    fn rejects_duplicate_rule_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "rules.json",
            r#"[{"id":"a","params":{}},{"id":"a","params":{}}]"#,
        );
        let err = load_rules(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id a"));
    }

    #[test]
    fn missing_rules_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_rules(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn runtime_mappings_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(
            &dir,
            "mappings.json",
            r#"{"day_of_week":{"type":"keyword"}}"#,
        );
        let bad = write(&dir, "bad.json", "[1, 2]");
        assert_eq!(
            load_runtime_mappings(&good).unwrap(),
            json!({ "day_of_week": { "type": "keyword" } })
        );
        assert!(load_runtime_mappings(&bad).is_err());
    }

    #[test]
    fn log_source_defaults_to_empty_mappings() {
        let config = RunnerConfig {
            es_url: Url::parse("http://127.0.0.1:9200").unwrap(),
            es_username: Some("elastic".to_string()),
            es_password: None,
            index: "logs-*".to_string(),
            timestamp_field: "@timestamp".to_string(),
            runtime_mappings_path: None,
            rules_path: PathBuf::from("rules.json"),
            poll_interval_seconds: 60,
            request_timeout_seconds: 30,
        };
        let source = config.log_source().unwrap();
        assert_eq!(source.runtime_mappings, json!({}));
        assert_eq!(config.basic_auth().unwrap().username, "elastic");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
