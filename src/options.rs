use std::collections::HashSet;

use reqwest::StatusCode;

use crate::{ResilientHttpError, Result};

/// How many times to try a request and which statuses trigger another try.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Statuses that cause a retry while attempts remain. `404` is never retried.
    pub retryable_status_codes: HashSet<StatusCode>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_retryable_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Rejects configurations that could never dispatch a request.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ResilientHttpError::InvalidRetryConfig {
                max_attempts: self.max_attempts,
            });
        }
        Ok(())
    }

    pub(crate) fn should_retry_status(&self, status: StatusCode) -> bool {
        !status.is_success()
            && status != StatusCode::NOT_FOUND
            && self.retryable_status_codes.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retryable_status_codes: HashSet::from([StatusCode::REQUEST_TIMEOUT]),
        }
    }
}

/// Inclusive jitter range in milliseconds, multiplied by the attempt number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffBand {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl BackoffBand {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Band used after a connect failure.
    pub const LONG: Self = Self::new(750, 1_500);
    /// Band used after a retryable status.
    pub const SHORT: Self = Self::new(250, 750);
}

/// Configures timeout, retry and backoff behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Default policy for requests that do not override it.
    pub retry: RetryPolicy,
    pub long_backoff: BackoffBand,
    pub short_backoff: BackoffBand,
    /// Seeds the jitter generator. `None` seeds from OS entropy.
    pub jitter_seed: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 100_000,
            retry: RetryPolicy::default(),
            long_backoff: BackoffBand::LONG,
            short_backoff: BackoffBand::SHORT,
            jitter_seed: None,
        }
    }
}

impl ClientOptions {
    /// Reads options from environment variables, keeping defaults for unset ones.
    ///
    /// Reads:
    /// - `RESILIENT_HTTP_TIMEOUT_MS`: per-attempt timeout
    /// - `RESILIENT_HTTP_MAX_ATTEMPTS`: total attempts, at least 1
    /// - `RESILIENT_HTTP_RETRY_STATUS_CODES`: comma separated, e.g. `408,503`
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> std::result::Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(raw) = non_empty(lookup("RESILIENT_HTTP_TIMEOUT_MS")) {
            options.timeout_ms = raw
                .parse()
                .map_err(|_| format!("RESILIENT_HTTP_TIMEOUT_MS is not a number: '{raw}'"))?;
        }

        if let Some(raw) = non_empty(lookup("RESILIENT_HTTP_MAX_ATTEMPTS")) {
            let max_attempts: u32 = raw
                .parse()
                .map_err(|_| format!("RESILIENT_HTTP_MAX_ATTEMPTS is not a number: '{raw}'"))?;
            if max_attempts == 0 {
                return Err("RESILIENT_HTTP_MAX_ATTEMPTS must be at least 1".to_owned());
            }
            options.retry.max_attempts = max_attempts;
        }

        if let Some(raw) = non_empty(lookup("RESILIENT_HTTP_RETRY_STATUS_CODES")) {
            let mut codes = HashSet::new();
            for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
                let code = part
                    .parse::<u16>()
                    .ok()
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .ok_or_else(|| {
                        format!("RESILIENT_HTTP_RETRY_STATUS_CODES has an invalid status: '{part}'")
                    })?;
                codes.insert(code);
            }
            options.retry.retryable_status_codes = codes;
        }

        Ok(options)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use reqwest::StatusCode;

    use super::{ClientOptions, RetryPolicy};
    use crate::ResilientHttpError;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn default_policy_retries_request_timeout_twice() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 2);
        assert!(policy.should_retry_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!policy.should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn not_found_is_never_retryable() {
        let policy = RetryPolicy::new(5).with_retryable_status_codes([StatusCode::NOT_FOUND]);
        assert!(!policy.should_retry_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn zero_attempts_is_a_configuration_error() {
        let err = RetryPolicy::new(0).validate().expect_err("zero must be rejected");
        assert!(matches!(
            err,
            ResilientHttpError::InvalidRetryConfig { max_attempts: 0 }
        ));
    }

    #[test]
    fn env_overrides_defaults() {
        let options = ClientOptions::from_lookup(lookup(&[
            ("RESILIENT_HTTP_TIMEOUT_MS", "2500"),
            ("RESILIENT_HTTP_MAX_ATTEMPTS", "4"),
            ("RESILIENT_HTTP_RETRY_STATUS_CODES", "408, 503"),
        ]))
        .expect("options must parse");

        assert_eq!(options.timeout_ms, 2_500);
        assert_eq!(options.retry.max_attempts, 4);
        assert!(options
            .retry
            .retryable_status_codes
            .contains(&StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(options.retry.retryable_status_codes.len(), 2);
    }

    #[test]
    fn env_unset_keeps_defaults() {
        let options = ClientOptions::from_lookup(lookup(&[])).expect("options must parse");
        assert_eq!(options, ClientOptions::default());
    }

    #[test]
    fn env_rejects_zero_attempts_and_bad_codes() {
        let zero = ClientOptions::from_lookup(lookup(&[("RESILIENT_HTTP_MAX_ATTEMPTS", "0")]));
        assert!(zero.is_err());

        let bad = ClientOptions::from_lookup(lookup(&[(
            "RESILIENT_HTTP_RETRY_STATUS_CODES",
            "408,teapot",
        )]));
        assert_eq!(
            bad.expect_err("bad status must fail"),
            "RESILIENT_HTTP_RETRY_STATUS_CODES has an invalid status: 'teapot'"
        );
    }
}
