//! One module per group of subcommands. Each argument struct runs itself
//! against a [`Context`].

mod assets;
mod authentication;
mod curl;
mod director;
mod installations;
mod products;
mod reports;

use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use opskit_api::Api;
use serde::de::DeserializeOwned;

use crate::config::Settings;
use crate::output::OutputFormat;

/// Outcome of a command that finished without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Finished, but the result says something went wrong
    Failure,
}

pub struct Context {
    pub api: Api,
    pub settings: Settings,
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Command {
    /// Trigger an install on the Ops Manager and follow its logs
    ApplyChanges(installations::ApplyChangesArgs),
    /// List recent installation events
    Installations(installations::InstallationsArgs),
    /// Upload a product to the Ops Manager
    UploadProduct(products::UploadProductArgs),
    /// Stage an uploaded product
    StageProduct(products::StageProductArgs),
    /// List products uploaded to the Ops Manager
    AvailableProducts(products::AvailableProductsArgs),
    /// List staged products
    StagedProducts(products::StagedProductsArgs),
    /// Configure a staged product from a YAML file
    ConfigureProduct(products::ConfigureProductArgs),
    /// Configure the BOSH director from a YAML file
    ConfigureDirector(director::ConfigureDirectorArgs),
    /// Export the current installation to a file
    ExportInstallation(assets::ExportInstallationArgs),
    /// Import an installation onto an unconfigured Ops Manager
    ImportInstallation(assets::ImportInstallationArgs),
    /// Delete the installation and everything it deployed
    DeleteInstallation(assets::DeleteInstallationArgs),
    /// List pending changes
    PendingChanges(reports::PendingChangesArgs),
    /// Print the diagnostic report
    DiagnosticReport(reports::DiagnosticReportArgs),
    /// Show the manifest changes the next apply-changes would make
    BoshDiff(reports::BoshDiffArgs),
    /// Configure authentication on a fresh Ops Manager
    ConfigureAuthentication(authentication::ConfigureAuthenticationArgs),
    /// Send an arbitrary request to the Ops Manager API
    Curl(curl::CurlArgs),
}

impl Command {
    /// Whether the command talks to a target that may not be set up yet
    #[must_use]
    pub fn needs_credentials(&self) -> bool {
        !matches!(
            self,
            Self::ImportInstallation(_) | Self::ConfigureAuthentication(_)
        )
    }

    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        match self {
            Self::ApplyChanges(args) => args.run(ctx).await,
            Self::Installations(args) => args.run(ctx).await,
            Self::UploadProduct(args) => args.run(ctx).await,
            Self::StageProduct(args) => args.run(ctx).await,
            Self::AvailableProducts(args) => args.run(ctx).await,
            Self::StagedProducts(args) => args.run(ctx).await,
            Self::ConfigureProduct(args) => args.run(ctx).await,
            Self::ConfigureDirector(args) => args.run(ctx).await,
            Self::ExportInstallation(args) => args.run(ctx).await,
            Self::ImportInstallation(args) => args.run(ctx).await,
            Self::DeleteInstallation(args) => args.run(ctx).await,
            Self::PendingChanges(args) => args.run(ctx).await,
            Self::DiagnosticReport(args) => args.run(ctx).await,
            Self::BoshDiff(args) => args.run(ctx).await,
            Self::ConfigureAuthentication(args) => args.run(ctx).await,
            Self::Curl(args) => args.run(ctx).await,
        }
    }
}

/// Reads and parses a YAML file given on the command line.
fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    serde_saphyr::from_str(&text).with_context(|| format!("could not parse {}", path.display()))
}
