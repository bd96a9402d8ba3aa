use std::{fmt, sync::Arc, time::Duration};

use encoding_rs::{Encoding, UTF_8};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method, Request, Response, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{self, media_type, Converter},
    response::process_typed,
    retry::{self, Backoff},
    transport::Transport,
    ClientOptions, ContentFactory, ResilientHttpError, Result, RetryPolicy,
};

#[derive(Clone)]
/// HTTP client that retries requests per [`RetryPolicy`].
pub struct ResilientClient<T = reqwest::Client> {
    transport: T,
    options: ClientOptions,
    backoff: Backoff,
    converter: Option<Arc<dyn Converter>>,
}

impl<T> fmt::Debug for ResilientClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("options", &self.options)
            .field("converter", &self.converter.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl ResilientClient<reqwest::Client> {
    /// Creates a client backed by a default `reqwest::Client`.
    pub fn new() -> Self {
        Self::with_transport(reqwest::Client::new())
    }

    /// Creates a reqwest-backed client configured from environment variables.
    ///
    /// See [`ClientOptions::from_env`] for the variables read.
    pub fn from_env() -> std::result::Result<Self, String> {
        Ok(Self::new().with_options(ClientOptions::from_env()?))
    }
}

impl Default for ResilientClient<reqwest::Client> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResilientClient<T> {
    /// Wraps any [`Transport`], e.g. a preconfigured `reqwest::Client` or a test double.
    pub fn with_transport(transport: T) -> Self {
        let options = ClientOptions::default();
        Self {
            transport,
            backoff: backoff_for(&options),
            options,
            converter: None,
        }
    }

    /// Applies client options such as timeout, retry and backoff behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.backoff = backoff_for(&opts);
        self.options = opts;
        self
    }

    /// Uses `converter` for every request and response body, whatever the media type.
    pub fn with_converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn get_resilient(&self, url: impl Into<String>) -> ResilientRequest<'_, T> {
        self.request(Method::GET, url)
    }

    pub fn delete_resilient(&self, url: impl Into<String>) -> ResilientRequest<'_, T> {
        self.request(Method::DELETE, url)
    }

    pub fn put_resilient(&self, url: impl Into<String>) -> ResilientRequest<'_, T> {
        self.request(Method::PUT, url)
    }

    pub fn patch_resilient(&self, url: impl Into<String>) -> ResilientRequest<'_, T> {
        self.request(Method::PATCH, url)
    }

    /// Starts a request with an arbitrary method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> ResilientRequest<'_, T> {
        ResilientRequest {
            client: self,
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            content: None,
            encoding: UTF_8,
            timeout: None,
            policy: self.options.retry.clone(),
            cancellation: None,
            error: None,
        }
    }
}

impl<T: Transport> ResilientClient<T> {
    /// Runs the retry engine directly with a caller-built request factory.
    ///
    /// `factory` is called once per attempt. `None` fails with
    /// [`ResilientHttpError::NullRequestFactory`].
    pub async fn send_resilient<F>(
        &self,
        factory: Option<F>,
        cancellation: Option<&CancellationToken>,
        policy: &RetryPolicy,
    ) -> Result<Response>
    where
        F: Fn() -> Request,
    {
        retry::send_resilient(&self.transport, factory, cancellation, policy, &self.backoff).await
    }
}

fn backoff_for(options: &ClientOptions) -> Backoff {
    Backoff::new(
        options.long_backoff,
        options.short_backoff,
        options.jitter_seed,
    )
}

/// A request under construction. Nothing is sent until [`send`](Self::send)
/// or [`send_as`](Self::send_as) is awaited.
#[must_use = "requests do nothing until `send` or `send_as` is awaited"]
pub struct ResilientRequest<'a, T> {
    client: &'a ResilientClient<T>,
    method: Method,
    url: String,
    headers: HeaderMap,
    content: Option<Content>,
    encoding: &'static Encoding,
    timeout: Option<Duration>,
    policy: RetryPolicy,
    cancellation: Option<CancellationToken>,
    error: Option<ResilientHttpError>,
}

impl<T> fmt::Debug for ResilientRequest<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content", &self.content)
            .field("encoding", &self.encoding.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<'a, T> ResilientRequest<'a, T> {
    /// Overrides the client's attempt count for this request.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Replaces the set of statuses that trigger a retry.
    pub fn retry_on<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.policy.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Per-attempt timeout, overriding [`ClientOptions::timeout_ms`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sends `value` as a UTF-8 JSON body.
    pub fn body<B>(self, value: &B) -> Self
    where
        B: Serialize + ?Sized,
    {
        self.body_as(value, media_type::JSON)
    }

    /// Serializes `value` according to `content_type`, or the client's converter if set.
    pub fn body_as<B>(mut self, value: &B, content_type: &str) -> Self
    where
        B: Serialize + ?Sized,
    {
        let converter = self.client.converter.as_deref();
        match codec::serialize(value, content_type, converter) {
            Ok(text) => self.text(text, content_type),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    /// Sends `text` verbatim, labelled `content_type; charset=<encoding>`.
    ///
    /// A `content_type` that already names a charset is sent unchanged.
    pub fn text(mut self, text: impl Into<String>, content_type: &str) -> Self {
        self.content = Some(Content::Text {
            content_type: content_type.to_owned(),
            text: text.into(),
        });
        self
    }

    /// Character encoding for text bodies. Defaults to UTF-8.
    ///
    /// Applies to [`body`](Self::body), [`body_as`](Self::body_as) and
    /// [`text`](Self::text) whichever order the calls come in. Text that the
    /// encoding cannot represent fails at send with
    /// [`ResilientHttpError::Serialization`].
    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Uses a caller-built body, produced fresh for every attempt.
    pub fn content<F>(mut self, content_type: &str, factory: F) -> Self
    where
        F: Fn() -> reqwest::Body + Send + Sync + 'static,
    {
        match HeaderValue::from_str(content_type) {
            Ok(value) => self.content = Some(Content::Custom(value, Arc::new(factory))),
            Err(_) => {
                self.error
                    .get_or_insert(ResilientHttpError::UnsupportedContentType(
                        content_type.to_owned(),
                    ));
            }
        }
        self
    }
}

/// Request body as given to the builder.
enum Content {
    /// Encoded with the request's encoding when sent.
    Text { content_type: String, text: String },
    Custom(HeaderValue, ContentFactory),
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { content_type, .. } => f.debug_tuple("Text").field(content_type).finish(),
            Self::Custom(content_type, _) => f.debug_tuple("Custom").field(content_type).finish(),
        }
    }
}

impl Content {
    /// Content-Type header and per-attempt body factory.
    fn resolve(self, encoding: &'static Encoding) -> Result<(HeaderValue, ContentFactory)> {
        let (content_type, text) = match self {
            Self::Custom(content_type, factory) => return Ok((content_type, factory)),
            Self::Text { content_type, text } => (content_type, text),
        };

        let (bytes, used, unmappable) = encoding.encode(&text);
        if unmappable {
            return Err(ResilientHttpError::Serialization(format!(
                "body cannot be represented in {}",
                used.name()
            )));
        }
        let bytes = bytes.into_owned();

        let header = if content_type.to_ascii_lowercase().contains("charset=") {
            content_type
        } else {
            format!("{content_type}; charset={}", used.name().to_ascii_lowercase())
        };
        let value = HeaderValue::from_str(&header)
            .map_err(|_| ResilientHttpError::UnsupportedContentType(header))?;
        Ok((value, Arc::new(move || reqwest::Body::from(bytes.clone()))))
    }
}

impl<'a, T: Transport> ResilientRequest<'a, T> {
    /// Sends the request, retrying per the effective policy.
    ///
    /// Any status, including an exhausted retryable one, comes back as `Ok`.
    pub async fn send(self) -> Result<Response> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let url = Url::parse(&self.url).map_err(|err| ResilientHttpError::InvalidUrl {
            url: self.url.clone(),
            message: err.to_string(),
        })?;
        let timeout = self.timeout.or_else(|| {
            (self.client.options.timeout_ms > 0)
                .then(|| Duration::from_millis(self.client.options.timeout_ms))
        });

        let content = self
            .content
            .map(|content| content.resolve(self.encoding))
            .transpose()?;
        let method = self.method;
        let headers = self.headers;
        let factory = move || {
            let mut request = Request::new(method.clone(), url.clone());
            *request.headers_mut() = headers.clone();
            if let Some((content_type, make_body)) = &content {
                request
                    .headers_mut()
                    .insert(CONTENT_TYPE, content_type.clone());
                *request.body_mut() = Some(make_body());
            }
            *request.timeout_mut() = timeout;
            request
        };

        self.client
            .send_resilient(Some(factory), self.cancellation.as_ref(), &self.policy)
            .await
    }

    /// Sends the request and deserializes a successful body into `R`.
    ///
    /// A non-success final status becomes
    /// [`ResilientHttpError::UnsuccessfulResponse`].
    pub async fn send_as<R>(self) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let client = self.client;
        let max_attempts = self.policy.max_attempts;
        let response = self.send().await?;
        process_typed(response, max_attempts, client.converter.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{header::HeaderValue, Method};

    use super::{Content, ResilientClient};
    use crate::{codec::Converter, ResilientHttpError, Result};

    struct Opaque;

    impl Converter for Opaque {
        fn serialize(&self, _value: &serde_json::Value) -> Result<String> {
            Ok(String::new())
        }

        fn deserialize(&self, _text: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn verb_helpers_set_method() {
        let client = ResilientClient::new();
        assert_eq!(client.get_resilient("http://x").method, Method::GET);
        assert_eq!(client.delete_resilient("http://x").method, Method::DELETE);
        assert_eq!(client.put_resilient("http://x").method, Method::PUT);
        assert_eq!(client.patch_resilient("http://x").method, Method::PATCH);
    }

    #[test]
    fn request_inherits_client_policy_and_overrides_apply() {
        let client = ResilientClient::new();
        let request = client.get_resilient("http://x");
        assert_eq!(request.policy, client.options().retry);

        let request = client
            .get_resilient("http://x")
            .max_attempts(5)
            .retry_on([reqwest::StatusCode::BAD_GATEWAY]);
        assert_eq!(request.policy.max_attempts, 5);
        assert!(request
            .policy
            .retryable_status_codes
            .contains(&reqwest::StatusCode::BAD_GATEWAY));
        assert_eq!(request.policy.retryable_status_codes.len(), 1);
    }

    fn resolved_content_type(
        content: Option<Content>,
        encoding: &'static encoding_rs::Encoding,
    ) -> Result<HeaderValue> {
        let content = content.expect("content must be set");
        content.resolve(encoding).map(|(content_type, _)| content_type)
    }

    #[test]
    fn json_body_gets_utf8_content_type() {
        let client = ResilientClient::new();
        let request = client.put_resilient("http://x").body(&["a", "b"]);
        assert!(request.error.is_none());
        let content_type = resolved_content_type(request.content, request.encoding).expect("resolve");
        assert_eq!(content_type, "application/json; charset=utf-8");
    }

    #[test]
    fn encoding_set_after_body_still_applies() {
        let client = ResilientClient::new();
        let request = client
            .put_resilient("http://x")
            .text("café", "text/plain")
            .encoding(encoding_rs::WINDOWS_1252);
        let content_type = resolved_content_type(request.content, request.encoding).expect("resolve");
        assert_eq!(content_type, "text/plain; charset=windows-1252");
    }

    #[test]
    fn explicit_charset_is_left_alone() {
        let client = ResilientClient::new();
        let request = client
            .put_resilient("http://x")
            .text("<a/>", "application/xml; charset=UTF-8");
        let content_type = resolved_content_type(request.content, request.encoding).expect("resolve");
        assert_eq!(content_type, "application/xml; charset=UTF-8");
    }

    #[test]
    fn unmappable_text_is_a_serialization_error() {
        let client = ResilientClient::new();
        let request = client
            .put_resilient("http://x")
            .text("snowman \u{2603}", "text/plain")
            .encoding(encoding_rs::WINDOWS_1252);
        let err = resolved_content_type(request.content, request.encoding).expect_err("must fail");
        assert!(matches!(err, ResilientHttpError::Serialization(ref msg) if msg.contains("windows-1252")));
    }

    #[test]
    fn unsupported_body_is_recorded_until_send() {
        let client = ResilientClient::new();
        let request = client
            .put_resilient("http://x")
            .body_as(&["a", "b"], "text/csv");
        assert!(request.content.is_none());
        assert!(matches!(
            request.error,
            Some(ResilientHttpError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn debug_hides_converter_internals() {
        let client = ResilientClient::new().with_converter(Opaque);
        let debug = format!("{client:?}");
        assert!(debug.contains("<custom>"));
    }
}
