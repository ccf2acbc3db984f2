use anyhow::{Context as _, Result};
use clap::Args;
use opskit_api::{IdentityProvider, SetupInput};
use opskit_auth::Availability;
use opskit_utils::SecretString;

use super::{Context, Outcome};

/// Admin credentials fall back to the global `--username`, `--password` and
/// `--decryption-passphrase` settings.
#[derive(Args)]
pub struct ConfigureAuthenticationArgs {
    #[arg(short = 'u', long)]
    username: Option<String>,

    #[arg(short = 'p', long)]
    password: Option<String>,

    #[arg(short = 'd', long = "decryption-passphrase")]
    decryption_passphrase: Option<String>,

    /// Proxy for outbound HTTP traffic
    #[arg(long = "http-proxy-url")]
    http_proxy: Option<String>,

    /// Proxy for outbound HTTPS traffic
    #[arg(long = "https-proxy-url")]
    https_proxy: Option<String>,

    /// Comma-separated hosts that bypass the proxy
    #[arg(long)]
    no_proxy: Option<String>,
}

impl ConfigureAuthenticationArgs {
    fn setup_input(&self, ctx: &Context) -> Result<SetupInput> {
        let settings = &ctx.settings;
        let username = self
            .username
            .clone()
            .or_else(|| settings.username.clone())
            .filter(|u| !u.is_empty())
            .context("an admin username is required")?;
        let password = self
            .password
            .as_deref()
            .map(SecretString::new)
            .or_else(|| settings.password.clone())
            .filter(|p| !p.is_empty())
            .context("an admin password is required")?;
        let decryption_passphrase = self
            .decryption_passphrase
            .as_deref()
            .map(SecretString::new)
            .or_else(|| settings.decryption_passphrase.clone())
            .filter(|p| !p.is_empty())
            .context("a decryption passphrase is required")?;

        Ok(SetupInput {
            identity_provider: IdentityProvider::Internal,
            admin_user_name: username,
            admin_password: password,
            decryption_passphrase,
            eula_accepted: true,
            http_proxy: self.http_proxy.clone(),
            https_proxy: self.https_proxy.clone(),
            no_proxy: self.no_proxy.clone(),
        })
    }

    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let input = self.setup_input(ctx)?;
        let api = &ctx.api;

        let availability = api
            .ensure_availability()
            .await
            .context("could not determine initial configuration status")?;
        if availability != Availability::Unstarted {
            tracing::info!("configuration previously completed, skipping configuration");
            return Ok(Outcome::Success);
        }

        tracing::info!("configuring internal userstore");
        api.setup(&input)
            .await
            .context("could not configure authentication")?;

        tracing::info!("waiting for configuration to complete");
        api.wait_until_available()
            .await
            .context("could not determine final configuration status")?;
        tracing::info!("configuration complete");
        Ok(Outcome::Success)
    }
}
