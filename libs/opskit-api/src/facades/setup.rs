use opskit_auth::{Availability, check_availability};
use opskit_utils::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::{Call, Variant};

const SETUP_PATH: &str = "/api/v0/setup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    #[default]
    Internal,
    Saml,
    Ldap,
}

impl IdentityProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Saml => "saml",
            Self::Ldap => "ldap",
        }
    }
}

/// First-time configuration of the target's authentication.
#[derive(Debug, Clone, Default)]
pub struct SetupInput {
    pub identity_provider: IdentityProvider,
    pub admin_user_name: String,
    pub admin_password: SecretString,
    pub decryption_passphrase: SecretString,
    pub eula_accepted: bool,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl SetupInput {
    fn payload(&self) -> Value {
        let mut setup = Map::new();
        let mut put = |key: &str, value: &str| {
            setup.insert(key.to_owned(), Value::from(value));
        };
        put("identity_provider", self.identity_provider.as_str());
        put("admin_user_name", &self.admin_user_name);
        put("admin_password", self.admin_password.expose());
        put("admin_password_confirmation", self.admin_password.expose());
        put("decryption_passphrase", self.decryption_passphrase.expose());
        put("decryption_passphrase_confirmation", self.decryption_passphrase.expose());
        put("eula_accepted", if self.eula_accepted { "true" } else { "false" });
        let proxies = [
            ("http_proxy", &self.http_proxy),
            ("https_proxy", &self.https_proxy),
            ("no_proxy", &self.no_proxy),
        ];
        for (key, value) in proxies {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                put(key, value);
            }
        }
        json!({ "setup": setup })
    }
}

impl Api {
    /// Configures authentication on a fresh target.
    ///
    /// # Errors
    /// Request failures, prefixed with the endpoint.
    pub async fn setup(&self, input: &SetupInput) -> Result<(), ApiError> {
        let call = Call::post(SETUP_PATH)
            .via(Variant::Unauthed)
            .json(&input.payload());
        self.orchestrator
            .send(call)
            .await
            .context("could not make api request to setup endpoint")?;
        Ok(())
    }

    /// Where the target's authentication system stands.
    ///
    /// # Errors
    /// [`ApiError::Auth`] when the answer cannot be classified.
    pub async fn ensure_availability(&self) -> Result<Availability, ApiError> {
        let executor = self.orchestrator.executor(Variant::Unauthed);
        self.orchestrator
            .guard(async { Ok(check_availability(&**executor).await?) })
            .await
    }

    /// Polls until the authentication system is up.
    ///
    /// # Errors
    /// See [`ensure_availability`](Self::ensure_availability); also
    /// [`ApiError::Cancelled`] while waiting.
    pub async fn wait_until_available(&self) -> Result<(), ApiError> {
        let mut announced = false;
        loop {
            match self.ensure_availability().await? {
                Availability::Complete => return Ok(()),
                state => {
                    if !announced {
                        tracing::info!("waiting for the authentication system to start");
                        announced = true;
                    }
                    tracing::debug!(%state, "authentication system not ready");
                }
            }
            self.pause().await?;
        }
    }
}
