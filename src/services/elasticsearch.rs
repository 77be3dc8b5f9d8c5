use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::error::SearchError;
use crate::services::log_threshold::query::SearchRequest;

/// Search capability the evaluator runs its compiled requests against.
pub trait SearchClient: Send + Sync {
    fn search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<JsonValue, SearchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

/// `_search` over HTTP.
#[derive(Clone)]
pub struct ElasticsearchClient {
    base_url: Url,
    http: reqwest::Client,
    auth: Option<BasicAuth>,
    timeout: Duration,
}

impl ElasticsearchClient {
    pub fn new(
        base_url: Url,
        http: reqwest::Client,
        auth: Option<BasicAuth>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url,
            http,
            auth,
            timeout,
        }
    }

    pub fn search_url(&self, request: &SearchRequest) -> Result<Url, SearchError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SearchError::Url(format!("{} cannot be a base", self.base_url)))?;
            segments.pop_if_empty().push(&request.index).push("_search");
        }
        url.query_pairs_mut()
            .append_pair("allow_no_indices", bool_param(request.allow_no_indices))
            .append_pair("ignore_unavailable", bool_param(request.ignore_unavailable));
        Ok(url)
    }
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl SearchClient for ElasticsearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<JsonValue, SearchError> {
        let url = self.search_url(request)?;
        let mut builder = self
            .http
            .post(url.clone())
            .timeout(self.timeout)
            .json(&request.body);
        if let Some(auth) = &self.auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_deref());
        }

        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%url, status, "search request rejected");
            return Err(SearchError::Status { status, body });
        }
        Ok(resp.json().await?)
    }
}
