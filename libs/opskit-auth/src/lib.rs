#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Credentials for opsctl
//!
//! - [`AuthClient`] mints UAA access tokens with the password or client
//!   credentials grant, caches them, refreshes them before they expire and
//!   retries a request once when the server rejects a cached token
//! - [`UnlockClient`] unlocks an installation with its decryption passphrase
//!   before the first request and waits for the auth system to start
//!
//! Both are [`HttpExecutor`](opskit_http::HttpExecutor) wrappers and compose
//! with the transport layers from `opskit-http`.

mod client;
mod config;
mod error;
mod token;
mod unlock;

pub use client::AuthClient;
pub use config::{AuthConfig, DEFAULT_TOKEN_PATH, Grant, PASSWORD_GRANT_CLIENT_ID};
pub use error::AuthError;
pub use token::CachedToken;
pub use unlock::{
    Availability, DEFAULT_AVAILABILITY_INTERVAL, ENSURE_AVAILABILITY_PATH, UNLOCK_PATH,
    UnlockClient, check_availability,
};
