use std::fmt::Write as _;

use reqwest::{Method, StatusCode, Url, Version};

use crate::{transport::TransportFailure, AttemptRecord};

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ResilientHttpError {
    /// `max_attempts` was zero. Raised before any request is built.
    #[error("invalid retry configuration: max_attempts must be at least 1, got {max_attempts}")]
    InvalidRetryConfig { max_attempts: u32 },
    /// No request factory was supplied to the engine.
    #[error("the request factory cannot be empty")]
    NullRequestFactory,
    /// The request URL could not be parsed.
    #[error("invalid request URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    /// Transport failure that was not retried, or connect failures that used up every attempt.
    #[error("exception at URL: {url}, verb: {method}")]
    Transport {
        url: Url,
        method: Method,
        attempts: Vec<AttemptRecord>,
        #[source]
        source: TransportFailure,
    },
    /// The caller cancelled the request. URL and verb are absent when the token
    /// fired before the first request was built.
    #[error("{}", canceled_message(.url.as_ref(), .method.as_ref()))]
    Canceled {
        url: Option<Url>,
        method: Option<Method>,
        attempts: Vec<AttemptRecord>,
        #[source]
        source: Option<TransportFailure>,
    },
    /// A client-side deadline expired.
    #[error("request timed out for URL: {url}, verb: {method}")]
    TimedOut {
        url: Url,
        method: Method,
        attempts: Vec<AttemptRecord>,
        #[source]
        source: TransportFailure,
    },
    /// Non-success response that is terminal for the caller.
    #[error("{message}")]
    UnsuccessfulResponse {
        status: StatusCode,
        url: Url,
        version: Version,
        message: String,
        attempts: Vec<AttemptRecord>,
    },
    /// Defensive fallback: the retry loop ended without any response.
    #[error("there is no HTTP response")]
    NoResponse { attempts: Vec<AttemptRecord> },
    /// No converter exists for the content type and the value is not plain text.
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),
    /// Request body could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Response body could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl ResilientHttpError {
    /// Attempts dispatched before the failure, oldest first.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Transport { attempts, .. }
            | Self::Canceled { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::UnsuccessfulResponse { attempts, .. }
            | Self::NoResponse { attempts } => attempts,
            _ => &[],
        }
    }

    /// Status of the last response, when the failure came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UnsuccessfulResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Transport { url, .. }
            | Self::TimedOut { url, .. }
            | Self::UnsuccessfulResponse { url, .. } => Some(url),
            Self::Canceled { url, .. } => url.as_ref(),
            _ => None,
        }
    }

    /// Renders the message followed by URL, status and every send time, one per line.
    pub fn diagnostics(&self) -> String {
        let mut out = self.to_string();
        if let Some(url) = self.url() {
            let _ = write!(out, "\nURL: {url}");
        }
        if let Some(status) = self.status() {
            let _ = write!(out, "\nStatus Code: {status}");
        }
        let attempts = self.attempts();
        if !attempts.is_empty() {
            out.push_str("\nRequest Send Times:");
            for attempt in attempts {
                let _ = write!(out, "\n{attempt}");
            }
        }
        out
    }
}

fn canceled_message(url: Option<&Url>, method: Option<&Method>) -> String {
    match (url, method) {
        (Some(url), Some(method)) => {
            format!("request was canceled for URL: {url}, verb: {method}")
        }
        _ => "request was canceled before dispatch".to_owned(),
    }
}
