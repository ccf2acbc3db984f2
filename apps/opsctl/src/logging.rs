//! Log output on stderr.

use std::fmt;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as layer};

/// Crates whose progress messages are shown by default
const OWN_CRATES: [&str; 4] = ["opsctl", "opskit_api", "opskit_auth", "opskit_http"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Filter used when `RUST_LOG` is not set.
///
/// Other crates stay at `warn`; ours log at `info`, or `debug` and `trace`
/// with one and two `-v`.
pub fn default_directives(verbose: u8) -> String {
    let own = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut directives = String::from("warn");
    for name in OWN_CRATES {
        directives.push(',');
        directives.push_str(name);
        directives.push('=');
        directives.push_str(own);
    }
    directives
}

/// Installs the global subscriber.
///
/// # Errors
/// Fails when a subscriber is already installed.
pub fn init(format: LogFormat, verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let output = layer::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose > 0);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(output.json())
            .try_init()?,
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(output.without_time())
            .try_init()?,
    }
    Ok(())
}
