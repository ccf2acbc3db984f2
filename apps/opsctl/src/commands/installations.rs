use anyhow::{Context as _, Result, bail};
use clap::Args;
use opskit_api::{DeployProducts, Installation, InstallationStatus};

use super::{Context, Outcome};
use crate::output::{OutputFormat, Table, print_json, print_logs};

#[derive(Args)]
pub struct ApplyChangesArgs {
    /// Ignore verifier warnings
    #[arg(short = 'i', long)]
    ignore_warnings: bool,

    /// Deploy only these products; repeat for several
    #[arg(short = 'n', long = "product-name", conflicts_with = "skip_deploy_products")]
    product_names: Vec<String>,

    /// Update the director only
    #[arg(short = 's', long)]
    skip_deploy_products: bool,

    /// Follow an installation that is already running instead of failing
    #[arg(long)]
    reattach: bool,
}

impl ApplyChangesArgs {
    fn deploy_products(&self) -> DeployProducts {
        if self.skip_deploy_products {
            DeployProducts::None
        } else if self.product_names.is_empty() {
            DeployProducts::All
        } else {
            DeployProducts::Named(self.product_names.clone())
        }
    }

    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let api = &ctx.api;
        let running = api
            .running_installation()
            .await
            .context("could not check for any already running installation")?;

        let id = match running {
            Some(installation) if self.reattach => {
                tracing::info!(
                    id = installation.id,
                    started_at = %started_at(&installation),
                    "found already running installation, re-attaching"
                );
                installation.id
            }
            Some(installation) => {
                tracing::info!(
                    id = installation.id,
                    started_at = %started_at(&installation),
                    "found already running installation, not re-attaching"
                );
                bail!("apply changes is already running, use \"--reattach\" to enable reattaching");
            }
            None => {
                tracing::info!("attempting to apply changes to the targeted Ops Manager");
                api.apply_changes(self.ignore_warnings, &self.deploy_products())
                    .await
                    .context("installation failed to trigger")?
            }
        };

        let status = api.wait_for_installation(id, print_logs).await?;

        if status == InstallationStatus::Failed {
            bail!("installation was unsuccessful");
        }
        Ok(Outcome::Success)
    }
}

fn started_at(installation: &Installation) -> String {
    installation
        .started_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Args)]
pub struct InstallationsArgs {}

impl InstallationsArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let installations = ctx.api.list_installations().await?;
        match ctx.format {
            OutputFormat::Json => print_json(&installations)?,
            OutputFormat::Table => installations_table(&installations).print()?,
        }
        Ok(Outcome::Success)
    }
}

fn installations_table(installations: &[Installation]) -> Table {
    let mut table = Table::new(&["ID", "USER", "STATUS", "STARTED AT", "FINISHED AT"]);
    for installation in installations {
        table.row(vec![
            installation.id.to_string(),
            installation.user_name.clone(),
            installation.status.to_string(),
            started_at(installation),
            installation
                .finished_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ]);
    }
    table
}
