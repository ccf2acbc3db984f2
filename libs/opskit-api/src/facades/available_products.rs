use opskit_http::RequestBody;
use serde::{Deserialize, Serialize};

use super::{Api, ensure_content};
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::{Call, Variant};

const AVAILABLE_PRODUCTS_PATH: &str = "/api/v0/available_products";
const CONTEXT: &str = "could not make api request to available_products endpoint";

/// A product uploaded to the target but not necessarily staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableProduct {
    pub name: String,
    #[serde(rename = "product_version")]
    pub version: String,
}

impl Api {
    /// Uploads a product bundle, reporting progress while it is sent and a
    /// heartbeat while the server processes it.
    ///
    /// The body goes out as-is under `content_type`; callers choose the
    /// encoding the target expects.
    ///
    /// # Errors
    /// [`ApiError::InvalidInput`] for an empty body, besides request failures.
    #[tracing::instrument(skip(self, body), fields(bytes = body.content_length()))]
    pub async fn upload_product(
        &self,
        body: RequestBody,
        content_type: &str,
    ) -> Result<(), ApiError> {
        ensure_content(&body)?;
        let call = Call::post(AVAILABLE_PRODUCTS_PATH)
            .via(Variant::Progress)
            .body(body, content_type)
            .polling_interval(self.polling_interval);
        self.orchestrator.send(call).await.context(CONTEXT)?;
        Ok(())
    }

    /// # Errors
    /// Request and decode failures.
    pub async fn list_available_products(&self) -> Result<Vec<AvailableProduct>, ApiError> {
        self.orchestrator
            .fetch_json(Call::get(AVAILABLE_PRODUCTS_PATH))
            .await
            .map(Option::unwrap_or_default)
            .context(CONTEXT)
    }

    /// Whether `name` at `version` has been uploaded.
    ///
    /// # Errors
    /// See [`list_available_products`](Self::list_available_products).
    pub async fn is_product_available(&self, name: &str, version: &str) -> Result<bool, ApiError> {
        Ok(self
            .list_available_products()
            .await?
            .iter()
            .any(|p| p.name == name && p.version == version))
    }

    /// Deletes one uploaded product, or every unused one when `product` is
    /// `None`.
    ///
    /// # Errors
    /// Request failures.
    pub async fn delete_available_products(
        &self,
        product: Option<(&str, &str)>,
    ) -> Result<(), ApiError> {
        let path = match product {
            Some((name, version)) => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("product_name", name)
                    .append_pair("version", version)
                    .finish();
                format!("{AVAILABLE_PRODUCTS_PATH}?{query}")
            }
            None => AVAILABLE_PRODUCTS_PATH.to_owned(),
        };
        self.orchestrator
            .send(Call::delete(path))
            .await
            .context(CONTEXT)?;
        Ok(())
    }
}
