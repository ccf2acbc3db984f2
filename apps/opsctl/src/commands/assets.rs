use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use opskit_api::InstallationStatus;
use opskit_auth::Availability;

use super::{Context, Outcome};
use crate::multipart::MultipartForm;
use crate::output::print_logs;

#[derive(Args)]
pub struct ExportInstallationArgs {
    /// Where to write the installation archive
    #[arg(short = 'o', long)]
    output_file: PathBuf,
}

impl ExportInstallationArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        tracing::info!(output = %self.output_file.display(), "exporting installation");
        ctx.api.export_installation(&self.output_file).await?;
        tracing::info!("finished exporting installation");
        Ok(Outcome::Success)
    }
}

#[derive(Args)]
pub struct ImportInstallationArgs {
    /// Installation archive produced by export-installation
    #[arg(short = 'i', long)]
    installation: PathBuf,
}

impl ImportInstallationArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let api = &ctx.api;
        if api.ensure_availability().await? != Availability::Unstarted {
            tracing::info!("Ops Manager is already configured");
            return Ok(Outcome::Success);
        }

        let Some(passphrase) = ctx
            .settings
            .decryption_passphrase
            .as_ref()
            .filter(|p| !p.is_empty())
        else {
            bail!("a decryption passphrase is required to import an installation");
        };

        tracing::info!(installation = %self.installation.display(), "importing installation");
        let form = MultipartForm::with_file("installation[file]", &self.installation)
            .await?
            .field("passphrase", passphrase.expose());
        let content_type = form.content_type();
        api.import_installation(form.into_body().await?, &content_type)
            .await?;
        tracing::info!("waiting for import to complete, this should take only a couple minutes");
        api.wait_until_available().await?;
        tracing::info!("successfully imported installation");
        Ok(Outcome::Success)
    }
}

#[derive(Args)]
pub struct DeleteInstallationArgs {}

impl DeleteInstallationArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let api = &ctx.api;
        let Some(deleted) = api.delete_installation().await? else {
            tracing::info!("no installation to delete");
            return Ok(Outcome::Success);
        };

        tracing::info!(id = deleted.id, "deleting installation");
        let status = api
            .wait_for_installation(deleted.id, print_logs)
            .await?;
        if status == InstallationStatus::Failed {
            bail!("installation was unsuccessful");
        }
        Ok(Outcome::Success)
    }
}
