use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::Api;
use crate::error::{ApiError, ResultExt};
use crate::orchestrator::Call;
use crate::validate::StatusPolicy;

const PROPERTIES_PATH: &str = "/api/v0/staged/director/properties";
const AVAILABILITY_ZONES_PATH: &str = "/api/v0/staged/director/availability_zones";
const NETWORKS_PATH: &str = "/api/v0/staged/director/networks";
const NETWORK_AND_AZ_PATH: &str = "/api/v0/staged/director/network_and_az";
const DEPLOYED_CREDENTIALS_PATH: &str = "/api/v0/deployed/director/credentials";

/// Director settings; sections left `None` are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectorProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iaas_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_configuration: Option<Value>,
}

/// Where the director VM itself is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAssignment {
    pub network_and_az: Value,
}

#[derive(Deserialize, Default)]
struct AvailabilityZones {
    #[serde(default)]
    availability_zones: Vec<Map<String, Value>>,
}

impl Api {
    /// # Errors
    /// Request failures; a 207 is one unless `ignore_warnings` is set.
    pub async fn update_director_properties(
        &self,
        properties: &DirectorProperties,
        ignore_warnings: bool,
    ) -> Result<(), ApiError> {
        let call = Call::put(PROPERTIES_PATH)
            .json(properties)
            .policy(StatusPolicy::ignoring_warnings(ignore_warnings));
        self.orchestrator
            .send(call)
            .await
            .context("could not update director properties")?;
        Ok(())
    }

    /// Staged availability zones. Empty on servers without the endpoint.
    ///
    /// # Errors
    /// Request and decode failures.
    pub async fn director_availability_zones(&self) -> Result<Vec<Map<String, Value>>, ApiError> {
        let call = Call::get(AVAILABILITY_ZONES_PATH).policy(StatusPolicy::OkOrNotAllowed);
        let validated = self
            .orchestrator
            .fetch(call)
            .await
            .context("could not fetch director availability zones")?;
        let zones: AvailabilityZones = validated.json_or_default(AVAILABILITY_ZONES_PATH).await?;
        Ok(zones.availability_zones)
    }

    /// Replaces the staged availability zones.
    ///
    /// Zones already on the server keep their `guid`, matched by name, so
    /// that they are updated rather than recreated.
    ///
    /// # Errors
    /// [`ApiError::InvalidInput`] for a zone without a name, besides request
    /// failures.
    pub async fn update_director_availability_zones(
        &self,
        mut zones: Vec<Map<String, Value>>,
    ) -> Result<(), ApiError> {
        for (index, zone) in zones.iter().enumerate() {
            if zone_name(zone).is_none() {
                return Err(ApiError::InvalidInput(format!(
                    "provided AZ config [{index}] does not specify the AZ 'name'"
                )));
            }
        }

        let call = Call::get(AVAILABILITY_ZONES_PATH).policy(StatusPolicy::OkOrMissing);
        let existing: Option<AvailabilityZones> = self
            .orchestrator
            .fetch_json(call)
            .await
            .context("unable to fetch existing AZ configuration")?;
        match existing {
            Some(existing) => assign_zone_guids(&mut zones, &existing.availability_zones),
            None => tracing::warn!(
                "unable to retrieve existing AZ configuration, attempting to configure anyway"
            ),
        }

        self.orchestrator
            .send(Call::put(AVAILABILITY_ZONES_PATH).json(&json!({ "availability_zones": zones })))
            .await
            .context("could not update director availability zones")?;
        Ok(())
    }

    /// # Errors
    /// Request failures.
    pub async fn update_director_networks(&self, networks: &Value) -> Result<(), ApiError> {
        self.orchestrator
            .send(Call::put(NETWORKS_PATH).json(networks))
            .await
            .context("could not update director networks")?;
        Ok(())
    }

    /// Places the director VM. Skipped once the director is deployed, since
    /// the server no longer accepts a change then.
    ///
    /// Returns whether the assignment was sent.
    ///
    /// # Errors
    /// Request failures.
    pub async fn update_director_network_and_az(
        &self,
        assignment: &NetworkAssignment,
    ) -> Result<bool, ApiError> {
        let probe = self
            .orchestrator
            .execute(Call::get(DEPLOYED_CREDENTIALS_PATH))
            .await?;
        let deployed = probe.status() == StatusCode::OK;
        probe.discard().await;
        if deployed {
            tracing::warn!(
                "unable to set network assignment for director as it has already been deployed"
            );
            return Ok(false);
        }

        self.orchestrator
            .send(Call::put(NETWORK_AND_AZ_PATH).json(assignment))
            .await
            .context("could not update director network assignment")?;
        Ok(true)
    }
}

fn zone_name(zone: &Map<String, Value>) -> Option<&str> {
    zone.get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

fn assign_zone_guids(zones: &mut [Map<String, Value>], existing: &[Map<String, Value>]) {
    for zone in zones {
        let Some(name) = zone_name(zone) else {
            continue;
        };
        let guid = existing
            .iter()
            .find(|e| zone_name(e) == Some(name))
            .and_then(|e| e.get("guid"))
            .cloned();
        if let Some(guid) = guid {
            zone.insert("guid".to_owned(), guid);
        }
    }
}
