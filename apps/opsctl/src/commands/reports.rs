use std::fmt::Write as _;

use anyhow::Result;
use clap::Args;
use opskit_api::{DiagnosticReport, DiffEntry, DirectorDiff, NamedDiff, PendingChange, ProductDiff};

use super::{Context, Outcome};
use crate::output::{OutputFormat, Table, print_json, print_text};

#[derive(Args)]
pub struct PendingChangesArgs {
    /// Exit non-zero when any product has a pending change
    #[arg(long)]
    check: bool,
}

impl PendingChangesArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let changes = ctx.api.pending_changes().await?;
        match ctx.format {
            OutputFormat::Json => print_json(&changes)?,
            OutputFormat::Table => pending_table(&changes).print()?,
        }
        if self.check && changes.iter().any(|c| c.action != "unchanged") {
            tracing::warn!("there are pending changes");
            return Ok(Outcome::Failure);
        }
        Ok(Outcome::Success)
    }
}

fn pending_table(changes: &[PendingChange]) -> Table {
    let mut table = Table::new(&["PRODUCT", "ACTION", "ERRANDS"]);
    for change in changes {
        let errands: Vec<&str> = change.errands.iter().map(|e| e.name.as_str()).collect();
        table.row(vec![
            change.product.clone(),
            change.action.clone(),
            errands.join(", "),
        ]);
    }
    table
}

#[derive(Args)]
pub struct DiagnosticReportArgs {}

impl DiagnosticReportArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let report = ctx.api.diagnostic_report().await?;
        match ctx.format {
            OutputFormat::Json => print_text(&report.full_report)?,
            OutputFormat::Table => diagnostic_table(&report).print()?,
        }
        Ok(Outcome::Success)
    }
}

fn diagnostic_table(report: &DiagnosticReport) -> Table {
    let mut table = Table::new(&["PRODUCT", "VERSION", "STATE", "STEMCELL"]);
    let products = report
        .staged_products
        .iter()
        .map(|p| (p, "staged"))
        .chain(report.deployed_products.iter().map(|p| (p, "deployed")));
    for (product, state) in products {
        let stemcell = product.stemcell.clone().unwrap_or_else(|| {
            product
                .stemcells
                .iter()
                .map(|s| format!("{} {}", s.os, s.version))
                .collect::<Vec<_>>()
                .join(", ")
        });
        table.row(vec![
            product.name.clone(),
            product.version.clone(),
            state.to_owned(),
            stemcell,
        ]);
    }
    table
}

#[derive(Args)]
pub struct BoshDiffArgs {
    /// Only show the director's diff
    #[arg(short = 'd', long)]
    director: bool,

    /// Products to diff; repeat for several. Defaults to every staged product
    #[arg(short = 'p', long = "product-name")]
    product_names: Vec<String>,
}

impl BoshDiffArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let api = &ctx.api;
        let all = !self.director && self.product_names.is_empty();

        let director = if self.director || all {
            Some(api.director_diff().await?)
        } else {
            None
        };

        let names = if all {
            api.list_staged_products()
                .await?
                .into_iter()
                .map(|p| p.kind)
                .filter(|kind| kind != "p-bosh")
                .collect()
        } else {
            self.product_names.clone()
        };
        let mut products = Vec::with_capacity(names.len());
        for name in names {
            let diff = api.product_diff(&name).await?;
            products.push((name, diff));
        }

        match ctx.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "director": director,
                "products": products.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
            }))?,
            OutputFormat::Table => print_text(&render_diffs(director.as_ref(), &products))?,
        }
        Ok(Outcome::Success)
    }
}

fn render_diffs(director: Option<&DirectorDiff>, products: &[(String, ProductDiff)]) -> String {
    let mut out = String::new();
    if let Some(director) = director {
        out.push_str("## Director Manifest\n\n");
        render_entry(&mut out, &director.manifest);
        out.push_str("## Director Cloud Config\n\n");
        render_entry(&mut out, &director.cloud_config);
        render_named(&mut out, "Director Runtime Config", &director.runtime_configs);
        for cpi in &director.cpi_configs {
            let _ = writeln!(out, "## Director CPI Config: {}\n", cpi.iaas_configuration_name);
            render_entry(
                &mut out,
                &DiffEntry {
                    status: cpi.status.clone(),
                    diff: cpi.diff.clone(),
                },
            );
        }
    }
    for (name, diff) in products {
        let _ = writeln!(out, "## Product Manifest: {name}\n");
        render_entry(&mut out, &diff.manifest);
        render_named(&mut out, &format!("Product Runtime Config: {name}"), &diff.runtime_configs);
    }
    out
}

fn render_entry(out: &mut String, entry: &DiffEntry) {
    if entry.diff.trim().is_empty() {
        let _ = writeln!(out, "no changes ({})\n", status_or_unknown(&entry.status));
    } else {
        out.push_str(entry.diff.trim_end());
        out.push_str("\n\n");
    }
}

fn render_named(out: &mut String, title: &str, configs: &[NamedDiff]) {
    for config in configs {
        let _ = writeln!(out, "## {title} ({})\n", config.name);
        render_entry(
            out,
            &DiffEntry {
                status: config.status.clone(),
                diff: config.diff.clone(),
            },
        );
    }
}

fn status_or_unknown(status: &str) -> &str {
    if status.is_empty() { "unknown" } else { status }
}
