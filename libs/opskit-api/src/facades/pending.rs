use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::Call;
use crate::validate::StatusPolicy;

const PENDING_CHANGES_PATH: &str = "/api/v0/staged/pending_changes";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingErrand {
    pub name: String,
    /// `"true"`, `"false"`, `"default"` or `"when-changed"`
    #[serde(default, deserialize_with = "lenient_string")]
    pub post_deploy: String,
}

/// What the next apply-changes will do to one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    #[serde(rename = "guid")]
    pub product: String,
    #[serde(default)]
    pub errands: Vec<PendingErrand>,
    /// `install`, `update`, `delete` or `unchanged`
    #[serde(default)]
    pub action: String,
}

#[derive(Deserialize, Default)]
struct PendingChangesBody {
    #[serde(default)]
    product_changes: Vec<PendingChange>,
}

/// Some servers send booleans where others send strings.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Api {
    /// Staged changes not yet applied. Empty on servers without the endpoint.
    ///
    /// # Errors
    /// Request and decode failures.
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>, ApiError> {
        let call = Call::get(PENDING_CHANGES_PATH).policy(StatusPolicy::OkOrNotAllowed);
        let validated = self
            .orchestrator
            .fetch(call)
            .await
            .context("could not make api request to pending_changes endpoint")?;
        let body: PendingChangesBody = validated.json_or_default(PENDING_CHANGES_PATH).await?;
        Ok(body.product_changes)
    }
}
