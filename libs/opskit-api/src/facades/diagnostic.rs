use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::Call;
use crate::validate::{StatusPolicy, decode_bytes, validate};

const DIAGNOSTIC_REPORT_PATH: &str = "/api/v0/diagnostic_report";
const CONTEXT: &str = "could not make api request to diagnostic_report endpoint";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticStemcell {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticProduct {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemcell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stemcells: Vec<DiagnosticStemcell>,
}

/// What the server knows about its infrastructure, products and stemcells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub infrastructure_type: String,
    pub stemcells: Vec<String>,
    pub staged_products: Vec<DiagnosticProduct>,
    pub deployed_products: Vec<DiagnosticProduct>,
    pub available_stemcells: Vec<DiagnosticStemcell>,
    /// The report exactly as the server sent it
    #[serde(skip)]
    pub full_report: String,
}

#[derive(Deserialize, Default)]
struct AddedProducts {
    #[serde(default)]
    staged: Vec<DiagnosticProduct>,
    #[serde(default)]
    deployed: Vec<DiagnosticProduct>,
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(default)]
    infrastructure_type: String,
    #[serde(default)]
    stemcells: Vec<String>,
    #[serde(default)]
    added_products: AddedProducts,
    #[serde(default)]
    available_stemcells: Vec<DiagnosticStemcell>,
}

impl Api {
    /// # Errors
    /// [`ApiError::DiagnosticReportUnavailable`] when the server answers 500,
    /// besides request and decode failures.
    pub async fn diagnostic_report(&self) -> Result<DiagnosticReport, ApiError> {
        let response = self
            .orchestrator
            .execute(Call::get(DIAGNOSTIC_REPORT_PATH))
            .await
            .context(CONTEXT)?;
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            response.discard().await;
            return Err(ApiError::DiagnosticReportUnavailable);
        }

        let body = self
            .orchestrator
            .guard(async {
                let validated =
                    validate(response, StatusPolicy::Ok, &Method::GET, DIAGNOSTIC_REPORT_PATH)
                        .await?;
                match validated.into_response() {
                    Some(response) => Ok(response.bytes().await?),
                    None => Ok(bytes::Bytes::new()),
                }
            })
            .await?;

        let raw: RawReport = decode_bytes(&body, DIAGNOSTIC_REPORT_PATH)?;
        Ok(DiagnosticReport {
            infrastructure_type: raw.infrastructure_type,
            stemcells: raw.stemcells,
            staged_products: raw.added_products.staged,
            deployed_products: raw.added_products.deployed,
            available_stemcells: raw.available_stemcells,
            full_report: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
