use thiserror::Error;

/// Failure talking to the search backend.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid search url: {0}")]
    Url(String),
}

/// Errors that abort a whole evaluation cycle. No partial alerts are
/// emitted once any of these is raised.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Rule parameters failed decoding or validation.
    #[error("invalid rule params: {0}")]
    Validation(String),

    /// Parameters are well-formed but insufficient to build a search.
    #[error("query could not be built: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] SearchError),

    /// The backend answered with a body that does not have the expected shape.
    #[error("malformed search response: {0}")]
    MalformedResponse(String),

    #[error("evaluation cancelled")]
    Cancelled,
}

pub type EvalResult<T> = Result<T, EvaluationError>;
