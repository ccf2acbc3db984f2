use std::path::Path;

use http_body_util::BodyExt;
use opskit_http::{HttpError, RequestBody, ResponseBody};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use super::{Api, ensure_content};
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::{Call, Variant};
use crate::validate::StatusPolicy;

const ASSET_COLLECTION_PATH: &str = "/api/v0/installation_asset_collection";
const CONTEXT: &str = "could not make api request to installation_asset_collection endpoint";

/// The installation started to tear down the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeletedInstallation {
    pub id: u64,
}

#[derive(Deserialize)]
struct DeleteBody {
    install: DeletedInstallation,
}

impl Api {
    /// Downloads the installation assets to `output`, reporting progress.
    ///
    /// A partially written file is removed when the download fails or is
    /// cancelled.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    /// Request failures and [`ApiError::Io`] for the output file.
    #[tracing::instrument(skip(self, output), fields(output = %output.as_ref().display()))]
    pub async fn export_installation(&self, output: impl AsRef<Path>) -> Result<u64, ApiError> {
        let output = output.as_ref();
        let call = Call::get(ASSET_COLLECTION_PATH)
            .via(Variant::Progress)
            .polling_interval(self.polling_interval);
        let response = self
            .orchestrator
            .fetch(call)
            .await
            .context(CONTEXT)?
            .into_response()
            .ok_or_else(|| ApiError::MalformedResponse {
                path: ASSET_COLLECTION_PATH.to_owned(),
                reason: "no installation assets returned".to_owned(),
            })?;

        let result = self
            .orchestrator
            .guard(write_body(response.into_body(), output))
            .await;
        if result.is_err()
            && let Err(err) = tokio::fs::remove_file(output).await
        {
            tracing::debug!(error = %err, "could not remove partial export");
        }
        let written = result?;
        tracing::info!(bytes = written, "installation exported");
        Ok(written)
    }

    /// Uploads an exported installation to a target that has not been set
    /// up yet. The body carries the export and its decryption passphrase in
    /// whatever encoding `content_type` names.
    ///
    /// # Errors
    /// [`ApiError::InvalidInput`] for an empty body, besides request failures.
    pub async fn import_installation(
        &self,
        body: RequestBody,
        content_type: &str,
    ) -> Result<(), ApiError> {
        ensure_content(&body)?;
        let call = Call::post(ASSET_COLLECTION_PATH)
            .via(Variant::UnauthedProgress)
            .body(body, content_type)
            .polling_interval(self.polling_interval);
        self.orchestrator.send(call).await.context(CONTEXT)?;
        Ok(())
    }

    /// Deletes the installation and everything it deployed.
    ///
    /// `None` when there was nothing left to delete.
    ///
    /// # Errors
    /// Request and decode failures.
    pub async fn delete_installation(&self) -> Result<Option<DeletedInstallation>, ApiError> {
        let call = Call::delete(ASSET_COLLECTION_PATH)
            .json(&json!({ "errands": {} }))
            .policy(StatusPolicy::OkOrGone);
        let body: Option<DeleteBody> = self
            .orchestrator
            .fetch_json(call)
            .await
            .context(CONTEXT)?;
        Ok(body.map(|b| b.install))
    }
}

async fn write_body(mut body: ResponseBody, path: &Path) -> Result<u64, ApiError> {
    let io_error = |source| ApiError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut written = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| ApiError::Request(HttpError::Body(e)))?;
        if let Ok(data) = frame.into_data() {
            file.write_all(&data).await.map_err(io_error)?;
            written += data.len() as u64;
        }
    }
    file.flush().await.map_err(io_error)?;
    Ok(written)
}
