#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP plumbing for opsctl
//!
//! This crate provides:
//! - A hyper-based transport ([`HttpClient`]) that resolves relative paths
//!   against the target URL, with rustls TLS, optional custom CA and
//!   "skip verification" mode, connection pooling and transparent
//!   response decompression
//! - The [`HttpExecutor`] capability that every client layer implements
//! - Request bodies that know their length and whether they can be replayed
//! - [`RetryingClient`], which retries transport failures and nothing else
//! - [`ProgressClient`](progress::ProgressClient), which reports upload and
//!   download progress and writes a heartbeat while the server is busy
//!
//! Layers compose by wrapping:
//!
//! ```ignore
//! use opskit_http::{HttpClient, RetryConfig, RetryingClient, RequestBuilder};
//! use opskit_http::progress::ProgressClient;
//!
//! let transport = HttpClient::builder(parse_target("opsman.example.com")?)
//!     .timeout(None)
//!     .build()?;
//! let client = RetryingClient::new(ProgressClient::for_terminal(transport), RetryConfig::default());
//!
//! let response = RequestBuilder::new(Method::GET, "/api/v0/installations")
//!     .send(&client)
//!     .await?;
//! ```

mod body;
mod builder;
mod client;
mod config;
mod error;
mod executor;
pub mod progress;
mod request;
mod response;
mod retry;
pub mod tls;

pub use body::{CountingBody, FileSource, RequestBody, TransferCounter, UploadSource};
pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT, ExponentialBackoff,
    HttpClientConfig, RetryConfig, TlsConfig, TlsRootConfig, TransportSecurity, parse_target,
};
pub use error::{BodyLengthMismatch, BoxError, HttpError};
pub use executor::{HttpExecutor, SharedExecutor};
pub use request::{APPLICATION_JSON, FORM_URLENCODED, RequestBuilder, clone_parts};
pub use response::{DUMP_BODY_LIMIT, HttpResponse, ResponseBody, dump_response, full_body};
pub use retry::{RetryingClient, calculate_backoff};
