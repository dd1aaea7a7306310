use reqwest::Method;
use reqwest::StatusCode;
use thiserror::Error;

/// Longest response body kept on a [`ProtocolError`].
pub const BODY_EXCERPT_LIMIT: usize = 2000;

pub type Result<T> = std::result::Result<T, SessionError>;

/// A terminal non-2xx response that the retry rules did not absorb.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{method} {url} failed: {status}; body={body}")]
pub struct ProtocolError {
    pub status: StatusCode,
    pub method: Method,
    pub url: String,
    pub body: String,
}

impl ProtocolError {
    pub fn new(status: StatusCode, method: Method, url: impl Into<String>, body: &str) -> Self {
        Self {
            status,
            method,
            url: url.into(),
            body: excerpt(body, BODY_EXCERPT_LIMIT),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot reach backend host {host}: {detail}")]
    Connectivity { host: String, detail: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("request was cancelled")]
    Cancelled,

    #[error("{method} {url}: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SessionError {
    /// HTTP status of a terminal protocol failure, if that is what this is.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SessionError::Protocol(err) => Some(err.status),
            _ => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            SessionError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

fn excerpt(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
