//! Upload and download progress reporting.
//!
//! [`ProgressClient`] wraps any [`HttpExecutor`](crate::HttpExecutor). While
//! a request body is being sent it drives a [`ProgressBar`] from the number
//! of bytes read; once the last byte is out it writes a heartbeat line to a
//! [`LiveWriter`] on every polling tick until the server answers.

mod client;
mod render;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

pub use client::ProgressClient;
pub use render::{SilentProgress, TerminalLiveWriter, TerminalProgressBar};

/// Default time between progress updates and heartbeat lines
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request override of the polling interval.
///
/// Insert into the request extensions to change how often the bar is
/// refreshed and heartbeat lines are written for that one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingInterval(pub Duration);

/// A byte-oriented progress bar.
pub trait ProgressBar: Send + Sync {
    fn set_total(&self, total: u64);

    /// Shows the bar. Called once, before any byte is read.
    fn kickoff(&self);

    fn set_position(&self, position: u64);

    /// Finishes the bar. Called at most once per kickoff.
    fn end(&self);
}

/// Output sink that overwrites its previous line instead of appending.
pub trait LiveWriter: Send + Sync {
    fn start(&self);

    fn write_line(&self, line: &str);

    /// Clears the live line and releases the terminal.
    fn stop(&self);
}
