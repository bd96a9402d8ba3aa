//! `resilient-http` adds bounded retry, jittered backoff and typed bodies on
//! top of an async HTTP transport (by default `reqwest`).
//!
//! Entry points:
//! - [`ResilientClient::get_resilient`], [`ResilientClient::put_resilient`],
//!   [`ResilientClient::patch_resilient`], [`ResilientClient::delete_resilient`]
//! - [`ResilientClient::send_resilient`] for a caller-built request factory
//! - [`send_resilient`] for the bare retry engine over any [`Transport`]
//!
//! ```no_run
//! use resilient_http::ResilientClient;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     id: u64,
//! }
//!
//! # async fn run() -> resilient_http::Result<()> {
//! let client = ResilientClient::new();
//! let order: Order = client
//!     .get_resilient("https://api.example.com/orders/7")
//!     .max_attempts(3)
//!     .send_as()
//!     .await?;
//! # let _ = order.id;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod codec;
mod error;
mod options;
mod response;
mod retry;
pub mod transport;
mod types;

pub use client::{ResilientClient, ResilientRequest};
pub use codec::{media_type, Converter};
pub use encoding_rs;
pub use error::ResilientHttpError;
pub use options::{BackoffBand, ClientOptions, RetryPolicy};
pub use response::process_typed;
pub use retry::{send_resilient, Backoff, BackoffReason};
pub use tokio_util::sync::CancellationToken;
pub use transport::{FailureKind, Transport, TransportFailure};
pub use types::{AttemptRecord, ContentFactory};

pub type Result<T> = std::result::Result<T, ResilientHttpError>;
