mod commands;
mod config;
mod logging;
mod multipart;
mod output;
mod signals;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser};
use mimalloc::MiMalloc;
use opskit_api::{ApiError, connect};
use opskit_auth::Grant;
use tokio_util::sync::CancellationToken;

use crate::commands::{Command, Context, Outcome};
use crate::config::{Overrides, Settings};
use crate::logging::LogFormat;
use crate::output::OutputFormat;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Exit status after Ctrl+C or SIGTERM
const CANCELLED_EXIT_CODE: u8 = 130;

/// opsctl - command line client for the Ops Manager API
///
/// Connection options go before the subcommand. Each can also be set in the
/// `--env` file or as an `OPSCTL_*` environment variable.
#[derive(Parser)]
#[command(name = "opsctl", version, about)]
struct Cli {
    /// Ops Manager host name or URL
    #[arg(short = 't', long)]
    target: Option<String>,

    /// Admin username
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Admin password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Client id for the client credentials grant
    #[arg(short = 'c', long)]
    client_id: Option<String>,

    /// Client secret for the client credentials grant
    #[arg(short = 's', long)]
    client_secret: Option<String>,

    /// Accept any server certificate
    #[arg(short = 'k', long)]
    skip_ssl_validation: bool,

    /// Extra trusted CA, as PEM text or a path to a PEM file
    #[arg(long)]
    ca_cert: Option<String>,

    /// e.g. 10s
    #[arg(long)]
    connect_timeout: Option<String>,

    /// Deadline for regular requests, e.g. 30m
    #[arg(long)]
    request_timeout: Option<String>,

    /// Pause between status polls, e.g. 1s
    #[arg(long)]
    polling_interval: Option<String>,

    /// Unlocks the Ops Manager before the first request after a reboot
    #[arg(short = 'd', long)]
    decryption_passphrase: Option<String>,

    /// Send requests without credentials
    #[arg(long)]
    skip_auth: bool,

    /// YAML file with connection options
    #[arg(short = 'e', long = "env")]
    env: Option<PathBuf>,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// How listings are printed
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            target: self.target.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            skip_ssl_validation: self.skip_ssl_validation.then_some(true),
            ca_cert: self.ca_cert.clone(),
            connect_timeout: self.connect_timeout.clone(),
            request_timeout: self.request_timeout.clone(),
            polling_interval: self.polling_interval.clone(),
            decryption_passphrase: self.decryption_passphrase.clone(),
            skip_auth: self.skip_auth.then_some(true),
            verbose: (self.verbose > 0).then_some(self.verbose),
            log_format: self.log_format,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Failure) => ExitCode::FAILURE,
        Err(err) if is_cancelled(&err) => {
            eprintln!("cancelled");
            ExitCode::from(CANCELLED_EXIT_CODE)
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<Outcome> {
    let settings = Settings::load(cli.env.as_deref(), &cli.overrides())?;
    logging::init(settings.log_format, settings.verbose)?;

    let mut api_config = settings.api_config();
    if !cli.command.needs_credentials() {
        // the target may not have users or a passphrase yet
        api_config.grant = Grant::SkipAuth;
        api_config.decryption_passphrase = None;
    }
    let api = connect(&api_config)?;

    let token = CancellationToken::new();
    let interrupt = token.clone();
    let signals = tokio::spawn(async move {
        match signals::wait_for_interrupt().await {
            Ok(()) => {
                tracing::info!("interrupted, cancelling the running command");
                interrupt.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "could not install signal handlers"),
        }
    });

    let ctx = Context {
        api: api.with_cancellation(token),
        settings,
        format: cli.format,
    };
    let outcome = cli.command.run(&ctx).await;
    signals.abort();
    outcome
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ApiError>())
        .any(ApiError::is_cancelled)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn cancellation_is_found_under_context() {
        let err: Result<()> = Err(ApiError::Cancelled).context("could not list installations");
        assert!(is_cancelled(&err.unwrap_err()));
        assert!(!is_cancelled(&anyhow::anyhow!("boom")));
    }

    #[test]
    fn only_given_flags_override() {
        let cli = Cli::parse_from(["opsctl", "-t", "opsman.example.com", "-vv", "installations"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.target.as_deref(), Some("opsman.example.com"));
        assert_eq!(overrides.verbose, Some(2));
        assert_eq!(overrides.skip_auth, None);
        assert_eq!(overrides.skip_ssl_validation, None);
    }
}
