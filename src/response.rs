use reqwest::{header::CONTENT_TYPE, Response};
use serde::de::DeserializeOwned;

use crate::{
    codec::{self, Converter},
    AttemptRecord, ResilientHttpError, Result,
};

/// Turns a non-success response into a terminal [`ResilientHttpError::UnsuccessfulResponse`].
///
/// The body is read best-effort; a read failure is embedded in the message instead.
pub(crate) async fn unsuccessful_response(
    response: Response,
    max_attempts: u32,
    attempts: Vec<AttemptRecord>,
) -> ResilientHttpError {
    let status = response.status();
    let url = response.url().clone();
    let version = response.version();

    let message = match response.text().await {
        Ok(body) => format!(
            "HTTP response was not successful, retried {max_attempts}\n\n\
             Response Status Code: {status}\nVersion: {version:?}\n\
             Response Message:\n\n{body}"
        ),
        Err(err) => format!(
            "HTTP response was not successful, retried {max_attempts}\n\n\
             Response Status Code: {status}\nVersion: {version:?}\n\
             Response Message:\n\nunable to read content: {err}\nDetails:\n{err:?}"
        ),
    };

    ResilientHttpError::UnsuccessfulResponse {
        status,
        url,
        version,
        message,
        attempts,
    }
}

/// Deserializes a successful response into `T`.
///
/// Non-success statuses are classified as
/// [`ResilientHttpError::UnsuccessfulResponse`]; nothing is retried here. A
/// body with no matching converter fails with
/// [`ResilientHttpError::Deserialization`] unless `T` accepts plain text.
pub async fn process_typed<T>(
    response: Response,
    max_attempts: u32,
    converter: Option<&dyn Converter>,
) -> Result<T>
where
    T: DeserializeOwned,
{
    if !response.status().is_success() {
        return Err(unsuccessful_response(response, max_attempts, Vec::new()).await);
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let body = response.text().await.map_err(|err| {
        ResilientHttpError::Deserialization(format!("unable to read response body: {err}"))
    })?;

    codec::deserialize(&body, &content_type, converter).map_err(|err| match err {
        ResilientHttpError::UnsupportedContentType(content_type) => {
            ResilientHttpError::Deserialization(format!(
                "no converter for content type '{content_type}'; body: {body}"
            ))
        }
        other => other,
    })
}
