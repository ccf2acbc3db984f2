//! Typed wrappers around the Ops Manager endpoints.
//!
//! Each submodule adds methods to [`Api`] for one area of the API. The
//! methods build [`Call`](crate::Call)s, hand them to the [`Orchestrator`]
//! and decode the result; failures are prefixed with the endpoint they came
//! from.

mod available_products;
mod curl;
mod diagnostic;
mod diff;
mod director;
mod installation_assets;
mod installations;
mod pending;
mod setup;
mod staged_products;
mod zones;

use std::time::Duration;

use opskit_http::RequestBody;
use opskit_http::progress::DEFAULT_POLLING_INTERVAL;
use tokio_util::sync::CancellationToken;

use crate::form::FormSession;
use crate::merge::{CollectionMerger, MergeStrategy};
use crate::orchestrator::Orchestrator;

pub use available_products::AvailableProduct;
pub use curl::{RawRequest, RawResponse};
pub use diagnostic::{DiagnosticProduct, DiagnosticReport, DiagnosticStemcell};
pub use diff::{CpiConfigDiff, DiffEntry, DirectorDiff, NamedDiff, ProductDiff};
pub use director::{DirectorProperties, NetworkAssignment};
pub use installation_assets::DeletedInstallation;
pub use installations::{DeployProducts, Installation, InstallationStatus};
pub use pending::{PendingChange, PendingErrand};
pub use setup::{IdentityProvider, SetupInput};
pub use staged_products::{StagedProduct, StagedProductProperties};

/// Entry point for every endpoint facade.
#[derive(Debug, Clone)]
pub struct Api {
    orchestrator: Orchestrator,
    merger: CollectionMerger,
    polling_interval: Duration,
}

impl Api {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            merger: CollectionMerger::default(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merger = CollectionMerger::new(strategy);
        self
    }

    /// Cadence of progress heartbeats and status polls
    #[must_use]
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Same API whose calls end with [`ApiError::Cancelled`](crate::ApiError::Cancelled)
    /// once `token` fires.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            orchestrator: self.orchestrator.with_cancellation(token),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    #[must_use]
    pub fn forms(&self) -> FormSession<'_> {
        FormSession::new(&self.orchestrator)
    }

    /// Sleeps for one polling interval unless cancelled first.
    async fn pause(&self) -> Result<(), crate::ApiError> {
        let interval = self.polling_interval;
        self.orchestrator
            .guard(async move {
                tokio::time::sleep(interval).await;
                Ok(())
            })
            .await
    }
}

/// Uploads must declare a length and carry at least one byte.
fn ensure_content(body: &RequestBody) -> Result<(), crate::ApiError> {
    match body.content_length() {
        Some(0) | None => Err(crate::ApiError::InvalidInput(
            "upload body provided has no content".to_owned(),
        )),
        Some(_) => Ok(()),
    }
}
