use std::{error::Error as StdError, fmt};

use async_trait::async_trait;
use reqwest::{Request, Response};

/// Classification of a failed dispatch, decided before any retry logic runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The connection could not be established (refused, unreachable, DNS).
    Connect,
    /// A client-side deadline expired.
    Timeout,
    /// The caller aborted the request.
    Canceled,
    /// Any other transport fault.
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connect => "connect failure",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Other => "transport error",
        };
        f.write_str(label)
    }
}

/// Error raised by a [`Transport`].
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportFailure {
    kind: FailureKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Canceled, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        let kind = classify_reqwest_error(&err);
        Self {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Maps a reqwest error onto a [`FailureKind`].
///
/// A connect timeout reports both `is_timeout` and `is_connect`; it is treated
/// as a timeout so it is never retried.
pub fn classify_reqwest_error(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        return FailureKind::Timeout;
    }
    if err.is_connect() || has_connection_refused_cause(err) {
        return FailureKind::Connect;
    }
    FailureKind::Other
}

fn has_connection_refused_cause(err: &(dyn StdError + 'static)) -> bool {
    let mut cause = err.source();
    while let Some(inner) = cause {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        cause = inner.source();
    }
    false
}

/// Dispatches a single HTTP request.
///
/// Implementations own pooling, TLS and proxies. The retry engine only sees a
/// response or a classified [`TransportFailure`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportFailure>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send(&self, request: Request) -> Result<Response, TransportFailure> {
        self.execute(request).await.map_err(TransportFailure::from)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportFailure> {
        (**self).send(request).await
    }
}
