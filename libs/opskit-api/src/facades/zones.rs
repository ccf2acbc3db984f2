//! The availability zone screen, driven through its HTML form.

use std::collections::HashMap;

use super::Api;
use crate::error::{ApiError, FormError, ResultExt};
use crate::form::{Form, FormMatch, ZoneGuid, parse_form, parse_zone_guids};

const EDIT_PATH: &str = "/infrastructure/availability_zones/edit";
const SUBMIT_PATH: &str = "/infrastructure/availability_zones";
const ZONE_FIELD: &str = "availability_zones[availability_zones][][iaas_identifier]";
const GUID_FIELD: &str = "availability_zones[availability_zones][][guid]";

impl Api {
    /// Saves the availability zones through the legacy form and returns the
    /// GUID the server assigned to each.
    ///
    /// Zones already listed on the form keep their GUID.
    ///
    /// # Errors
    /// [`ApiError::Form`] when the page has no usable form or the response
    /// does not list one GUID per zone, besides request failures.
    pub async fn configure_availability_zones(
        &self,
        names: &[String],
    ) -> Result<Vec<ZoneGuid>, ApiError> {
        let forms = self.forms();
        let page = forms
            .fetch_page(EDIT_PATH)
            .await
            .context("could not load the availability zone form")?;

        let form = match parse_form(&page, EDIT_PATH, &FormMatch::Action(SUBMIT_PATH.to_owned()))? {
            Some(form) => form,
            None => parse_form(&page, EDIT_PATH, &FormMatch::First)?.ok_or_else(|| {
                FormError::FormNotFound {
                    path: EDIT_PATH.to_owned(),
                }
            })?,
        };
        let form = Form {
            action: SUBMIT_PATH.to_owned(),
            rails_method: Some("put".to_owned()),
            ..form
        };

        let existing: HashMap<String, String> = match parse_zone_guids(&page, EDIT_PATH) {
            Ok(zones) => zones.into_iter().map(|z| (z.name, z.guid)).collect(),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring zone guids on the edit page");
                HashMap::new()
            }
        };

        let mut fields = Vec::with_capacity(names.len() * 2);
        // Rails starts a new array entry when a key repeats, so each entry
        // opens with its identifier.
        for name in names {
            fields.push((ZONE_FIELD.to_owned(), name.clone()));
            if let Some(guid) = existing.get(name) {
                fields.push((GUID_FIELD.to_owned(), guid.clone()));
            }
        }

        let response = forms
            .submit_form(&form, &fields)
            .await
            .context("could not save availability zones")?;
        let zones = parse_zone_guids(&response, SUBMIT_PATH)?;
        if zones.len() != names.len() {
            return Err(FormError::GuidCountMismatch {
                names: names.len(),
                guids: zones.len(),
            }
            .into());
        }
        tracing::debug!(zones = zones.len(), "availability zones saved");
        Ok(zones)
    }
}
