use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::Call;
use crate::properties::{PropertyMap, ResponseProperty};
use crate::validate::StatusPolicy;

const STAGED_PRODUCTS_PATH: &str = "/api/v0/staged/products";
const DEPLOYED_PRODUCTS_PATH: &str = "/api/v0/deployed/products";
const PROPERTIES_CONTEXT: &str = "could not make api request to staged product properties endpoint";
const NETWORKS_CONTEXT: &str =
    "could not make api request to staged product networks_and_azs endpoint";

/// A staged or deployed product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedProduct {
    pub guid: String,
    /// Product name, e.g. `cf`
    #[serde(rename = "type")]
    pub kind: String,
}

/// Server-side properties of a staged product, by property name
pub type StagedProductProperties = BTreeMap<String, ResponseProperty>;

#[derive(Deserialize)]
struct PropertiesBody {
    #[serde(default)]
    properties: StagedProductProperties,
}

#[derive(Deserialize)]
struct NetworksAndAzsBody {
    #[serde(default)]
    networks_and_azs: Option<Value>,
}

impl Api {
    /// # Errors
    /// Request and decode failures.
    pub async fn list_staged_products(&self) -> Result<Vec<StagedProduct>, ApiError> {
        self.orchestrator
            .fetch_json(Call::get(STAGED_PRODUCTS_PATH))
            .await
            .map(Option::unwrap_or_default)
            .context("could not make request to staged-products endpoint")
    }

    /// # Errors
    /// Request and decode failures.
    pub async fn list_deployed_products(&self) -> Result<Vec<StagedProduct>, ApiError> {
        self.orchestrator
            .fetch_json(Call::get(DEPLOYED_PRODUCTS_PATH))
            .await
            .map(Option::unwrap_or_default)
            .context("could not make request to deployed-products endpoint")
    }

    /// Looks up a staged product by name.
    ///
    /// # Errors
    /// [`ApiError::ProductNotFound`] when nothing by that name is staged.
    pub async fn find_staged_product(&self, name: &str) -> Result<StagedProduct, ApiError> {
        self.list_staged_products()
            .await?
            .into_iter()
            .find(|p| p.kind == name)
            .ok_or_else(|| ApiError::ProductNotFound(name.to_owned()))
    }

    /// Stages `name` at `version`.
    ///
    /// A product that is neither deployed nor staged is added; otherwise the
    /// deployed (or else staged) instance is upgraded in place.
    ///
    /// # Errors
    /// Request failures, prefixed with the method used.
    pub async fn stage_product(&self, name: &str, version: &str) -> Result<(), ApiError> {
        let existing = match self
            .list_deployed_products()
            .await?
            .into_iter()
            .find(|p| p.kind == name)
        {
            Some(deployed) => Some(deployed),
            None => self
                .list_staged_products()
                .await?
                .into_iter()
                .find(|p| p.kind == name),
        };

        let call = match existing {
            Some(product) => Call::put(format!("{STAGED_PRODUCTS_PATH}/{}", product.guid))
                .json(&json!({ "to_version": version })),
            None => Call::post(STAGED_PRODUCTS_PATH)
                .json(&json!({ "name": name, "product_version": version })),
        };
        let context = format!(
            "could not make {} api request to staged products endpoint",
            call.method()
        );
        self.orchestrator.send(call).await.context(&context)?;
        tracing::info!(product = name, version, "product staged");
        Ok(())
    }

    /// Removes a staged product.
    ///
    /// # Errors
    /// [`ApiError::ProductNotFound`] when nothing by that name is staged.
    pub async fn unstage_product(&self, name: &str) -> Result<(), ApiError> {
        let product = self.find_staged_product(name).await?;
        self.orchestrator
            .send(Call::delete(format!("{STAGED_PRODUCTS_PATH}/{}", product.guid)).json(&json!({})))
            .await
            .context("could not make api request to staged products endpoint")?;
        Ok(())
    }

    /// # Errors
    /// Request and decode failures.
    pub async fn staged_product_properties(
        &self,
        guid: &str,
        redact: bool,
    ) -> Result<StagedProductProperties, ApiError> {
        let path = format!("{STAGED_PRODUCTS_PATH}/{guid}/properties?redact={redact}");
        let body: Option<PropertiesBody> = self
            .orchestrator
            .fetch_json(Call::get(path))
            .await
            .context(PROPERTIES_CONTEXT)?;
        Ok(body.map(|b| b.properties).unwrap_or_default())
    }

    /// Sends new property values for a staged product.
    ///
    /// Collection entries that correspond to entries already on the server
    /// get the server's `guid` first, so that the server updates them instead
    /// of replacing them.
    ///
    /// # Errors
    /// Request failures; a 207 is one unless `ignore_warnings` is set.
    pub async fn update_staged_product_properties(
        &self,
        guid: &str,
        mut properties: PropertyMap,
        ignore_warnings: bool,
    ) -> Result<(), ApiError> {
        let current = self.staged_product_properties(guid, false).await?;
        let merged = self.merger.merge_properties(&mut properties, &current);
        tracing::debug!(product = guid, collections = %merged.join(","), "collection guids assigned");

        let call = Call::put(format!("{STAGED_PRODUCTS_PATH}/{guid}/properties"))
            .json(&json!({ "properties": properties }))
            .policy(StatusPolicy::ignoring_warnings(ignore_warnings));
        self.orchestrator.send(call).await.context(PROPERTIES_CONTEXT)?;
        Ok(())
    }

    /// Network and AZ placement of a staged product, `None` when the product
    /// has none.
    ///
    /// # Errors
    /// Request and decode failures.
    pub async fn staged_product_networks_and_azs(
        &self,
        guid: &str,
    ) -> Result<Option<Value>, ApiError> {
        let call = Call::get(format!("{STAGED_PRODUCTS_PATH}/{guid}/networks_and_azs"))
            .policy(StatusPolicy::OkOrMissing);
        let body: Option<NetworksAndAzsBody> = self
            .orchestrator
            .fetch_json(call)
            .await
            .context(NETWORKS_CONTEXT)?;
        Ok(body.and_then(|b| b.networks_and_azs))
    }

    /// # Errors
    /// Request failures.
    pub async fn update_staged_product_networks_and_azs(
        &self,
        guid: &str,
        networks_and_azs: &Value,
    ) -> Result<(), ApiError> {
        let call = Call::put(format!("{STAGED_PRODUCTS_PATH}/{guid}/networks_and_azs"))
            .json(&json!({ "networks_and_azs": networks_and_azs }));
        self.orchestrator.send(call).await.context(NETWORKS_CONTEXT)?;
        Ok(())
    }
}
