use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::Call;

const INSTALLATIONS_PATH: &str = "/api/v0/installations";
const CONTEXT: &str = "could not make api request to installations endpoint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Running,
    Succeeded,
    Failed,
}

impl InstallationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_finished(self) -> bool {
        self != Self::Running
    }
}

impl std::fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: u64,
    #[serde(default)]
    pub user_name: String,
    pub status: InstallationStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Which staged products an apply-changes deploys besides the director.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeployProducts {
    #[default]
    All,
    /// Director only
    None,
    /// Products by name; each must be staged
    Named(Vec<String>),
}

#[derive(Deserialize)]
struct InstallationList {
    installations: Vec<Installation>,
}

#[derive(Deserialize)]
struct InstallId {
    id: u64,
}

#[derive(Deserialize)]
struct CreatedInstallation {
    install: InstallId,
}

#[derive(Deserialize)]
struct StatusBody {
    status: InstallationStatus,
}

#[derive(Deserialize)]
struct LogsBody {
    logs: String,
}

impl Api {
    /// Installations, newest first.
    ///
    /// # Errors
    /// Request and decode failures, prefixed with the endpoint.
    pub async fn list_installations(&self) -> Result<Vec<Installation>, ApiError> {
        let list: Option<InstallationList> = self
            .orchestrator
            .fetch_json(Call::get(INSTALLATIONS_PATH))
            .await
            .context(CONTEXT)?;
        Ok(list.map(|l| l.installations).unwrap_or_default())
    }

    /// The installation currently running, if any.
    ///
    /// # Errors
    /// See [`list_installations`](Self::list_installations).
    pub async fn running_installation(&self) -> Result<Option<Installation>, ApiError> {
        Ok(self
            .list_installations()
            .await?
            .into_iter()
            .find(|i| i.status == InstallationStatus::Running))
    }

    /// Starts an installation and returns its id.
    ///
    /// # Errors
    /// [`ApiError::ProductNotFound`] when a named product is not staged,
    /// besides request failures.
    pub async fn apply_changes(
        &self,
        ignore_warnings: bool,
        products: &DeployProducts,
    ) -> Result<u64, ApiError> {
        let deploy_products = match products {
            DeployProducts::All => Value::from("all"),
            DeployProducts::None => Value::from("none"),
            DeployProducts::Named(names) => {
                let staged = self.list_staged_products().await?;
                let mut guids = Vec::with_capacity(names.len());
                for name in names {
                    let product = staged
                        .iter()
                        .find(|p| &p.kind == name)
                        .ok_or_else(|| ApiError::ProductNotFound(name.clone()))?;
                    guids.push(Value::from(product.guid.as_str()));
                }
                Value::Array(guids)
            }
        };
        let body = json!({
            "ignore_warnings": ignore_warnings.to_string(),
            "deploy_products": deploy_products,
        });

        let created: Option<CreatedInstallation> = self
            .orchestrator
            .fetch_json(Call::post(INSTALLATIONS_PATH).json(&body))
            .await
            .context(CONTEXT)?;
        let id = created
            .map(|c| c.install.id)
            .ok_or_else(|| ApiError::MalformedResponse {
                path: INSTALLATIONS_PATH.to_owned(),
                reason: "installation id missing".to_owned(),
            })?;
        tracing::info!(id, "installation started");
        Ok(id)
    }

    /// # Errors
    /// Request and decode failures, prefixed with the endpoint.
    pub async fn installation_status(&self, id: u64) -> Result<InstallationStatus, ApiError> {
        let path = format!("{INSTALLATIONS_PATH}/{id}");
        let body: Option<StatusBody> = self
            .orchestrator
            .fetch_json(Call::get(path.as_str()))
            .await
            .context(CONTEXT)?;
        body.map(|b| b.status).ok_or(ApiError::MalformedResponse {
            path,
            reason: "installation status missing".to_owned(),
        })
    }

    /// # Errors
    /// Request and decode failures, prefixed with the endpoint.
    pub async fn installation_logs(&self, id: u64) -> Result<String, ApiError> {
        let body: Option<LogsBody> = self
            .orchestrator
            .fetch_json(Call::get(format!("{INSTALLATIONS_PATH}/{id}/logs")))
            .await
            .context(CONTEXT)?;
        Ok(body.map(|b| b.logs).unwrap_or_default())
    }

    /// Polls the installation until it finishes, handing each new chunk of
    /// its log to `on_logs`.
    ///
    /// # Errors
    /// Request failures, or [`ApiError::Cancelled`] while waiting.
    pub async fn wait_for_installation<F>(
        &self,
        id: u64,
        mut on_logs: F,
    ) -> Result<InstallationStatus, ApiError>
    where
        F: FnMut(&str),
    {
        let mut seen = 0;
        loop {
            let status = self.installation_status(id).await?;
            let logs = self.installation_logs(id).await?;
            let fresh = logs.get(seen..).unwrap_or(logs.as_str());
            if !fresh.is_empty() {
                on_logs(fresh);
            }
            seen = logs.len();

            if status.is_finished() {
                tracing::debug!(id, %status, "installation finished");
                return Ok(status);
            }
            self.pause().await?;
        }
    }
}
