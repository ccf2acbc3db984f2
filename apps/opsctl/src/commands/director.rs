use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use opskit_api::{DirectorProperties, NetworkAssignment};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Context, Outcome, read_yaml};

/// Contents of a `configure-director` file. Missing sections are left
/// untouched on the server.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DirectorConfig {
    #[serde(default)]
    properties_configuration: Option<DirectorProperties>,
    #[serde(default)]
    az_configuration: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    networks_configuration: Option<Value>,
    #[serde(default)]
    network_assignment: Option<Value>,
}

#[derive(Args)]
pub struct ConfigureDirectorArgs {
    /// YAML file with the director sections
    #[arg(short = 'c', long = "properties")]
    properties: PathBuf,

    /// Accept the update despite verifier warnings
    #[arg(short = 'i', long)]
    ignore_warnings: bool,
}

impl ConfigureDirectorArgs {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let config: DirectorConfig = read_yaml(&self.properties)?;
        let api = &ctx.api;

        if let Some(zones) = config.az_configuration {
            tracing::info!("started configuring availability zone options for bosh tile");
            api.update_director_availability_zones(zones).await?;
            tracing::info!("finished configuring availability zone options for bosh tile");
        }
        if let Some(networks) = &config.networks_configuration {
            tracing::info!("started configuring network options for bosh tile");
            api.update_director_networks(networks).await?;
            tracing::info!("finished configuring network options for bosh tile");
        }
        if let Some(network_and_az) = config.network_assignment {
            tracing::info!("started configuring network assignment options for bosh tile");
            api.update_director_network_and_az(&NetworkAssignment { network_and_az })
                .await?;
            tracing::info!("finished configuring network assignment options for bosh tile");
        }
        if let Some(properties) = &config.properties_configuration {
            tracing::info!("started configuring director options for bosh tile");
            api.update_director_properties(properties, self.ignore_warnings)
                .await?;
            tracing::info!("finished configuring director options for bosh tile");
        }
        Ok(Outcome::Success)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn director_file_sections() {
        let config: DirectorConfig = serde_saphyr::from_str(
            r"
az-configuration:
  - name: z1
    cluster: c1
networks-configuration:
  icmp_checks_enabled: false
properties-configuration:
  director_configuration:
    ntp_servers_string: ntp.example.com
",
        )
        .unwrap();

        let zones = config.az_configuration.unwrap();
        assert_eq!(zones[0]["name"], json!("z1"));
        assert_eq!(
            config.networks_configuration,
            Some(json!({"icmp_checks_enabled": false}))
        );
        let properties = config.properties_configuration.unwrap();
        assert_eq!(
            properties.director_configuration,
            Some(json!({"ntp_servers_string": "ntp.example.com"}))
        );
        assert!(properties.iaas_configuration.is_none());
        assert!(config.network_assignment.is_none());
    }
}
