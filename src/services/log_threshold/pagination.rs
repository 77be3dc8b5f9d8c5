use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::query::SearchRequest;
use super::results::{
    decode_grouped_response, decode_ungrouped_response, CompositeGroups, GroupBucket,
};
use crate::error::{EvalResult, EvaluationError};
use crate::services::elasticsearch::SearchClient;

/// Runs one search, giving up as soon as `cancel` fires.
pub async fn search_cancellable<S: SearchClient>(
    client: &S,
    request: &SearchRequest,
    cancel: &CancellationToken,
) -> EvalResult<JsonValue> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EvaluationError::Cancelled),
        result = client.search(request) => result.map_err(EvaluationError::from),
    }
}

pub async fn fetch_ungrouped_count<S: SearchClient>(
    client: &S,
    request: &SearchRequest,
    cancel: &CancellationToken,
) -> EvalResult<u64> {
    let raw = search_cancellable(client, request, cancel).await?;
    Ok(decode_ungrouped_response(raw)?.hits.total.value)
}

enum PageState {
    Fetching { after_key: Option<JsonValue> },
    Accumulating { groups: CompositeGroups },
    Done,
}

/// Collected buckets of a composite walk.
#[derive(Debug, Clone, Default)]
pub struct CompositeWalk {
    pub buckets: Vec<GroupBucket>,
    pub round_trips: usize,
}

/// Walks the `groups` composite aggregation of `request` page by page.
///
/// Each page is requested with the previous page's `after_key`. The walk
/// ends on the first page holding fewer than `page_size` buckets, so a last
/// page of exactly `page_size` costs one more (empty) round trip.
pub async fn fetch_all_groups<S: SearchClient>(
    client: &S,
    request: &SearchRequest,
    page_size: usize,
    cancel: &CancellationToken,
) -> EvalResult<CompositeWalk> {
    let mut walk = CompositeWalk::default();
    let mut state = PageState::Fetching { after_key: None };

    loop {
        state = match state {
            PageState::Fetching { after_key } => {
                let mut page_request = request.clone();
                page_request.set_after_key(after_key.as_ref());
                let raw = search_cancellable(client, &page_request, cancel).await?;
                walk.round_trips += 1;
                let response = decode_grouped_response(raw)?;
                PageState::Accumulating {
                    groups: response.aggregations.groups,
                }
            }
            PageState::Accumulating { groups } => {
                let page_len = groups.buckets.len();
                tracing::debug!(
                    page = walk.round_trips,
                    buckets = page_len,
                    "composite page received"
                );
                walk.buckets.extend(groups.buckets);
                if page_len < page_size {
                    PageState::Done
                } else {
                    let Some(after_key) = groups.after_key else {
                        return Err(EvaluationError::MalformedResponse(format!(
                            "full composite page ({page_len} buckets) without after_key"
                        )));
                    };
                    PageState::Fetching {
                        after_key: Some(after_key),
                    }
                }
            }
            PageState::Done => return Ok(walk),
        };
    }
}
