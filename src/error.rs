//! Error types for model calls and input loading.

use async_openai::error::OpenAIError;
use thiserror::Error;

/// API error types reported when the provider is rate limiting
const RATE_LIMIT_KINDS: &[&str] = &["requests", "tokens", "rate_limit_exceeded"];

/// API error types that clear up on their own after a wait
const TRANSIENT_API_KINDS: &[&str] = &["server_error", "service_unavailable"];

/// Errors that can occur when calling the model endpoint.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Rate limited by the provider - retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider rejected or failed the request.
    #[error("api error ({kind}): {message}")]
    Api {
        kind: String,
        message: String,
        retryable: bool,
    },

    /// Connection failure, timeout or other transport problem.
    #[error("http error: {message}")]
    Transport { message: String, retryable: bool },

    /// The body was not the JSON the API sends, e.g. a proxy's 502/503 page - retryable.
    #[error("undecodable response body: {0}")]
    UndecodableBody(String),

    /// The response decoded but had no usable choice.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Request could not be built (bad model name, missing key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl CompletionError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Transport { retryable, .. } => *retryable,
            Self::UndecodableBody(_) => true,
            Self::MalformedResponse(_) => false,
            Self::Config(_) => false,
        }
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Api { .. } => "api_error",
            Self::Transport { .. } => "http_error",
            Self::UndecodableBody(_) => "undecodable_body",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Config(_) => "config_error",
        }
    }
}

impl From<OpenAIError> for CompletionError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::ApiError(api) => {
                let kind = api.r#type.clone().unwrap_or_else(|| "unknown".to_string());
                if RATE_LIMIT_KINDS.contains(&kind.as_str()) {
                    return Self::RateLimited(api.message);
                }
                let retryable = TRANSIENT_API_KINDS.contains(&kind.as_str());
                Self::Api {
                    kind,
                    message: api.message,
                    retryable,
                }
            }
            OpenAIError::Reqwest(e) => Self::from(e),
            OpenAIError::JSONDeserialize(e) => Self::UndecodableBody(e.to_string()),
            OpenAIError::InvalidArgument(message) => Self::Config(message),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout()
            || e.is_connect()
            || e.is_request()
            || e
                .status()
                .is_some_and(|s| s.is_server_error() || s.as_u16() == 429);
        Self::Transport {
            message: e.to_string(),
            retryable,
        }
    }
}

/// A model call that failed for good while grading a row.
#[derive(Debug, Error)]
#[error("completion failed at row {row}: {source}")]
pub struct CompletionFailure {
    /// 0-indexed data row (header excluded)
    pub row: usize,
    #[source]
    pub source: CompletionError,
}

/// Problems with the input CSV detected before any row is graded.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file {path} could not be read: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("required column '{0}' is missing from the header row")]
    MissingColumn(&'static str),

    #[error("malformed CSV record: {0}")]
    Record(#[from] csv::Error),
}
