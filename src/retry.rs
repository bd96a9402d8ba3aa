//! The resilient send loop.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::{Method, Request, Response, Url};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    transport::{FailureKind, Transport, TransportFailure},
    AttemptRecord, BackoffBand, ResilientHttpError, Result, RetryPolicy,
};

/// Draws jittered retry delays.
///
/// Cloning shares the underlying generator.
#[derive(Clone, Debug)]
pub struct Backoff {
    long: BackoffBand,
    short: BackoffBand,
    rng: Arc<Mutex<StdRng>>,
}

/// Which band a retry draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffReason {
    /// The connection could not be established.
    ConnectFailure,
    /// The response status is in the retry set.
    RetryableStatus,
}

impl Backoff {
    pub fn new(long: BackoffBand, short: BackoffBand, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            long,
            short,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Delay before attempt `attempt + 1`, scaled linearly by `attempt`.
    pub fn delay(&self, reason: BackoffReason, attempt: u32) -> Duration {
        let band = match reason {
            BackoffReason::ConnectFailure => self.long,
            BackoffReason::RetryableStatus => self.short,
        };
        let (low, high) = if band.min_ms <= band.max_ms {
            (band.min_ms, band.max_ms)
        } else {
            (band.max_ms, band.min_ms)
        };
        let base_ms = {
            // Generator state stays valid after a poisoning panic.
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(low..=high)
        };
        Duration::from_millis(base_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffBand::LONG, BackoffBand::SHORT, None)
    }
}

/// Sends a request built by `factory`, retrying per `policy`.
///
/// A status in the retry set that is still returned on the last attempt comes
/// back as `Ok`; only connect failures turn exhaustion into an error.
///
/// The token is checked before `factory` runs; an already cancelled token
/// fails without building a request.
pub async fn send_resilient<T, F>(
    transport: &T,
    factory: Option<F>,
    cancellation: Option<&CancellationToken>,
    policy: &RetryPolicy,
    backoff: &Backoff,
) -> Result<Response>
where
    T: Transport + ?Sized,
    F: Fn() -> Request,
{
    policy.validate()?;
    let factory = factory.ok_or(ResilientHttpError::NullRequestFactory)?;

    let max_attempts = policy.max_attempts;
    let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(max_attempts as usize);
    let mut attempt = 0u32;
    // URL and verb of the previous attempt, for cancellations between attempts.
    let mut previous: Option<(Url, Method)> = None;

    while attempt < max_attempts {
        if is_cancelled(cancellation) {
            let (url, method) = previous.unzip();
            return Err(canceled(url, method, attempts, None));
        }

        attempt += 1;
        let request = factory();
        let url = request.url().clone();
        let method = request.method().clone();

        attempts.push(AttemptRecord::now(attempt));
        let sent = match cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportFailure::canceled("cancellation requested")),
                sent = transport.send(request) => sent,
            },
            None => transport.send(request).await,
        };

        let response = match sent {
            Ok(response) => response,
            Err(failure) => match failure.kind() {
                FailureKind::Connect if attempt < max_attempts => {
                    let delay = backoff.delay(BackoffReason::ConnectFailure, attempt);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        %url, %method, attempt, delay_ms = delay.as_millis() as u64,
                        "connect failure, retrying: {failure}"
                    );
                    if !wait(delay, cancellation).await {
                        return Err(canceled(Some(url), Some(method), attempts, Some(failure)));
                    }
                    previous = Some((url, method));
                    continue;
                }
                FailureKind::Connect | FailureKind::Other => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%url, %method, attempt, "request failed: {failure}");
                    return Err(ResilientHttpError::Transport {
                        url,
                        method,
                        attempts,
                        source: failure,
                    });
                }
                FailureKind::Canceled => {
                    return Err(canceled(Some(url), Some(method), attempts, Some(failure)));
                }
                FailureKind::Timeout => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%url, %method, attempt, "request timed out: {failure}");
                    return Err(ResilientHttpError::TimedOut {
                        url,
                        method,
                        attempts,
                        source: failure,
                    });
                }
            },
        };

        let status = response.status();
        if !policy.should_retry_status(status) || attempt >= max_attempts {
            return Ok(response);
        }

        let delay = backoff.delay(BackoffReason::RetryableStatus, attempt);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            %url, %method, attempt, %status, delay_ms = delay.as_millis() as u64,
            "retryable status, retrying"
        );
        // Releases the connection before sleeping.
        drop(response);
        if !wait(delay, cancellation).await {
            return Err(canceled(Some(url), Some(method), attempts, None));
        }
        previous = Some((url, method));
    }

    // Every path through the loop returns once attempts run out.
    Err(ResilientHttpError::NoResponse { attempts })
}

fn is_cancelled(cancellation: Option<&CancellationToken>) -> bool {
    cancellation.is_some_and(CancellationToken::is_cancelled)
}

/// Sleeps for `delay`. Returns `false` if cancelled first.
async fn wait(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    match cancellation {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        },
        None => {
            sleep(delay).await;
            true
        }
    }
}

fn canceled(
    url: Option<Url>,
    method: Option<Method>,
    attempts: Vec<AttemptRecord>,
    source: Option<TransportFailure>,
) -> ResilientHttpError {
    #[cfg(feature = "tracing")]
    tracing::debug!(?url, ?method, attempts = attempts.len(), "request canceled");
    ResilientHttpError::Canceled {
        url,
        method,
        attempts,
        source,
    }
}
