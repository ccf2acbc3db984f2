#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Ops Manager API client for opsctl
//!
//! - [`Orchestrator`] routes each [`Call`] through one of four executor
//!   stacks, applies the transport retry layer and validates the response
//!   against the call's [`StatusPolicy`]
//! - [`FormSession`] drives the legacy HTML screens: it reads a form's
//!   authenticity token and submits the form with it
//! - [`CollectionMerger`] keeps collection entries' GUIDs across a property
//!   update
//! - [`Api`] wraps the endpoints with typed methods
//!
//! [`connect`] builds all of it from an [`ApiConfig`]:
//!
//! ```ignore
//! use opskit_api::{ApiConfig, connect};
//! use opskit_auth::Grant;
//!
//! let api = connect(&ApiConfig::new("opsman.example.com", grant))?;
//! for installation in api.list_installations().await? {
//!     println!("{} {}", installation.id, installation.status);
//! }
//! ```

mod connect;
mod error;
mod facades;
mod form;
mod merge;
mod orchestrator;
mod properties;
mod validate;

pub use connect::{ApiConfig, connect};
pub use error::{ApiError, FormError, ResultExt};
pub use facades::{
    Api, AvailableProduct, CpiConfigDiff, DeletedInstallation, DeployProducts, DiagnosticProduct,
    DiagnosticReport, DiagnosticStemcell, DiffEntry, DirectorDiff, DirectorProperties,
    IdentityProvider, Installation, InstallationStatus, NamedDiff, NetworkAssignment,
    PendingChange, PendingErrand, ProductDiff, RawRequest, RawResponse, SetupInput,
    StagedProduct, StagedProductProperties,
};
pub use form::{
    AUTHENTICITY_TOKEN, Form, FormMatch, FormSession, RAILS_METHOD, ZoneGuid, parse_form,
    parse_zone_guids,
};
pub use merge::{CollectionMerger, MergeDecision, MergeStrategy};
pub use orchestrator::{Call, Executors, Orchestrator, Variant};
pub use properties::{
    CollectionItem, GUID_FIELD, PropertyMap, PropertyValue, ResponseProperty,
};
pub use validate::{StatusPolicy, Validated, Verdict, decode, decode_bytes, validate};
