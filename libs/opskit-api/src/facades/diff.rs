use serde::{Deserialize, Serialize};

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::Call;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedDiff {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpiConfigDiff {
    pub guid: String,
    #[serde(default)]
    pub iaas_configuration_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub diff: String,
}

/// Pending changes to the director's own manifests and configs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorDiff {
    #[serde(default)]
    pub manifest: DiffEntry,
    #[serde(default)]
    pub cloud_config: DiffEntry,
    #[serde(default)]
    pub runtime_configs: Vec<NamedDiff>,
    #[serde(default)]
    pub cpi_configs: Vec<CpiConfigDiff>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDiff {
    #[serde(default)]
    pub manifest: DiffEntry,
    #[serde(default)]
    pub runtime_configs: Vec<NamedDiff>,
}

impl Api {
    /// # Errors
    /// Request and decode failures.
    pub async fn director_diff(&self) -> Result<DirectorDiff, ApiError> {
        self.orchestrator
            .fetch_json(Call::get("/api/v0/director/diff"))
            .await
            .map(Option::unwrap_or_default)
            .context("could not retrieve director diff")
    }

    /// Diff of a staged product, by product name.
    ///
    /// # Errors
    /// [`ApiError::ProductNotFound`] when the product is not staged, besides
    /// request failures.
    pub async fn product_diff(&self, name: &str) -> Result<ProductDiff, ApiError> {
        let product = self.find_staged_product(name).await?;
        self.orchestrator
            .fetch_json(Call::get(format!("/api/v0/products/{}/diff", product.guid)))
            .await
            .map(Option::unwrap_or_default)
            .context("could not retrieve product diff")
    }
}
