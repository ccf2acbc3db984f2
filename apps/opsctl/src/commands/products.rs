use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use opskit_api::{AvailableProduct, PropertyMap, StagedProduct};
use serde::Deserialize;
use serde_json::Value;

use super::{Context, Outcome, read_yaml};
use crate::multipart::MultipartForm;
use crate::output::{OutputFormat, Table, print_json};

#[derive(Args)]
pub struct UploadProductArgs {
    /// Path to the product file
    #[arg(short = 'p', long)]
    product: PathBuf,
}

impl UploadProductArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        tracing::info!(product = %self.product.display(), "uploading product");
        let form = MultipartForm::with_file("product[file]", &self.product).await?;
        let content_type = form.content_type();
        ctx.api
            .upload_product(form.into_body().await?, &content_type)
            .await?;
        tracing::info!("finished upload");
        Ok(Outcome::Success)
    }
}

#[derive(Args)]
pub struct StageProductArgs {
    #[arg(short = 'p', long)]
    product_name: String,

    #[arg(short = 'v', long)]
    product_version: String,
}

impl StageProductArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let api = &ctx.api;
        let available = api
            .is_product_available(&self.product_name, &self.product_version)
            .await?;
        anyhow::ensure!(
            available,
            "cannot find product {} {}",
            self.product_name,
            self.product_version
        );
        tracing::info!(
            product = %self.product_name,
            version = %self.product_version,
            "staging product"
        );
        api.stage_product(&self.product_name, &self.product_version)
            .await?;
        tracing::info!("finished staging");
        Ok(Outcome::Success)
    }
}

#[derive(Args)]
pub struct AvailableProductsArgs {}

impl AvailableProductsArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let products = ctx.api.list_available_products().await?;
        match ctx.format {
            OutputFormat::Json => print_json(&products)?,
            OutputFormat::Table => available_table(&products).print()?,
        }
        Ok(Outcome::Success)
    }
}

fn available_table(products: &[AvailableProduct]) -> Table {
    let mut table = Table::new(&["NAME", "VERSION"]);
    for product in products {
        table.row(vec![product.name.clone(), product.version.clone()]);
    }
    table
}

#[derive(Args)]
pub struct StagedProductsArgs {}

impl StagedProductsArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let products = ctx.api.list_staged_products().await?;
        match ctx.format {
            OutputFormat::Json => print_json(&products)?,
            OutputFormat::Table => staged_table(&products).print()?,
        }
        Ok(Outcome::Success)
    }
}

fn staged_table(products: &[StagedProduct]) -> Table {
    let mut table = Table::new(&["NAME", "GUID"]);
    for product in products {
        table.row(vec![product.kind.clone(), product.guid.clone()]);
    }
    table
}

/// Contents of a `configure-product` file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ProductConfig {
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    product_properties: Option<PropertyMap>,
    #[serde(default)]
    network_properties: Option<Value>,
}

#[derive(Args)]
pub struct ConfigureProductArgs {
    /// Staged product to configure; defaults to `product-name` in the file
    #[arg(short = 'n', long)]
    product_name: Option<String>,

    /// YAML file with `product-properties` and `network-properties`
    #[arg(short = 'c', long = "properties")]
    properties: PathBuf,

    /// Accept the update despite verifier warnings
    #[arg(short = 'i', long)]
    ignore_warnings: bool,
}

impl ConfigureProductArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let config: ProductConfig = read_yaml(&self.properties)?;
        let name = self
            .product_name
            .clone()
            .or(config.product_name)
            .context("no product name given, set --product-name or product-name in the file")?;

        let api = &ctx.api;
        let product = api.find_staged_product(&name).await?;
        tracing::debug!(product = %name, guid = %product.guid, "found staged product");

        if let Some(networks) = &config.network_properties {
            tracing::info!(product = %name, "setting up network");
            api.update_staged_product_networks_and_azs(&product.guid, networks)
                .await?;
        }
        if let Some(properties) = config.product_properties {
            tracing::info!(product = %name, "setting properties");
            api.update_staged_product_properties(&product.guid, properties, self.ignore_warnings)
                .await?;
        }
        tracing::info!(product = %name, "finished configuring product");
        Ok(Outcome::Success)
    }
}
