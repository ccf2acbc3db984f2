//! Server-rendered form pages.
//!
//! A few screens exist only as Rails forms. Driving them means reading the
//! form's `action`, its `authenticity_token` and the `_method` override from
//! the page, then posting the payload url-encoded with those two fields
//! prepended.

use tl::{HTMLTag, Node, ParserOptions, VDom};

use crate::error::{ApiError, FormError};
use crate::orchestrator::{Call, Orchestrator, Variant};
use crate::validate::Validated;

pub const AUTHENTICITY_TOKEN: &str = "authenticity_token";
pub const RAILS_METHOD: &str = "_method";

/// What a form page hands back for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    pub action: String,
    pub authenticity_token: String,
    /// `put`, `delete` or none for a plain POST
    pub rails_method: Option<String>,
}

impl Form {
    /// True for the placeholder returned when an optional form is absent
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.action.is_empty() && self.authenticity_token.is_empty()
    }

    /// Hidden fields first, then the caller's fields, in order.
    #[must_use]
    pub fn payload(&self, fields: &[(String, String)]) -> Vec<(String, String)> {
        let mut payload = Vec::with_capacity(fields.len() + 2);
        if let Some(method) = &self.rails_method {
            payload.push((RAILS_METHOD.to_owned(), method.clone()));
        }
        payload.push((AUTHENTICITY_TOKEN.to_owned(), self.authenticity_token.clone()));
        payload.extend_from_slice(fields);
        payload
    }
}

/// Which `<form>` on the page is wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMatch {
    First,
    /// The form whose `action` attribute equals this
    Action(String),
}

impl FormMatch {
    fn matches(&self, action: Option<&str>) -> bool {
        match self {
            Self::First => true,
            Self::Action(wanted) => action == Some(wanted.as_str()),
        }
    }
}

/// An availability zone and the GUID the server gave it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneGuid {
    pub name: String,
    pub guid: String,
}

fn parse_dom<'a>(html: &'a str, path: &str) -> Result<VDom<'a>, FormError> {
    tl::parse(html, ParserOptions::default()).map_err(|e| FormError::Html {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

fn attr(tag: &HTMLTag<'_>, name: &str) -> Option<String> {
    tag.attributes()
        .get(name)
        .flatten()
        .map(|value| unescape(&value.as_utf8_str()))
}

fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x2F;", "/")
        .replace("&#x3D;", "=")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// `<input>` tags of the document, or of one element, in document order.
fn inputs<'p, 'a>(dom: &'p VDom<'a>, scope: Option<&'p HTMLTag<'a>>) -> Vec<&'p HTMLTag<'a>> {
    let parser = dom.parser();
    let handles: Vec<_> = match scope {
        Some(tag) => tag
            .query_selector(parser, "input")
            .map(Iterator::collect)
            .unwrap_or_default(),
        None => dom
            .query_selector("input")
            .map(Iterator::collect)
            .unwrap_or_default(),
    };
    handles
        .into_iter()
        .filter_map(|handle| handle.get(parser).and_then(Node::as_tag))
        .collect()
}

fn input_value(inputs: &[&HTMLTag<'_>], name: &str) -> Option<String> {
    inputs
        .iter()
        .find(|tag| attr(tag, "name").as_deref() == Some(name))
        .and_then(|tag| attr(tag, "value"))
}

/// Finds the wanted form on a page.
///
/// `Ok(None)` when no form matches.
///
/// # Errors
/// Returns [`FormError::MissingToken`] when the form has no authenticity
/// token and [`FormError::Html`] when the page cannot be parsed.
pub fn parse_form(html: &str, path: &str, wanted: &FormMatch) -> Result<Option<Form>, FormError> {
    let dom = parse_dom(html, path)?;
    let parser = dom.parser();

    let form = dom
        .query_selector("form")
        .into_iter()
        .flatten()
        .filter_map(|handle| handle.get(parser).and_then(Node::as_tag))
        .find(|tag| wanted.matches(attr(tag, "action").as_deref()));
    let Some(form) = form else {
        return Ok(None);
    };

    let scoped = inputs(&dom, Some(form));
    let authenticity_token = input_value(&scoped, AUTHENTICITY_TOKEN)
        .or_else(|| input_value(&inputs(&dom, None), AUTHENTICITY_TOKEN))
        .ok_or_else(|| FormError::MissingToken {
            path: path.to_owned(),
        })?;

    Ok(Some(Form {
        action: attr(form, "action").unwrap_or_default(),
        authenticity_token,
        rails_method: input_value(&scoped, RAILS_METHOD).filter(|m| !m.is_empty()),
    }))
}

/// Pairs zone names with their GUIDs on the availability zone page.
///
/// Inputs named `availability_zones[...][guid]` are paired, in order, with
/// the `[iaas_identifier]` (or, failing that, `[name]`) inputs.
///
/// # Errors
/// Returns [`FormError::GuidCountMismatch`] when the counts differ.
pub fn parse_zone_guids(html: &str, path: &str) -> Result<Vec<ZoneGuid>, FormError> {
    let dom = parse_dom(html, path)?;
    let fields: Vec<(String, String)> = inputs(&dom, None)
        .into_iter()
        .filter_map(|tag| {
            let name = attr(tag, "name")?;
            name.starts_with("availability_zones[")
                .then(|| (name, attr(tag, "value").unwrap_or_default()))
        })
        .collect();

    let values_of = |suffix: &str| -> Vec<String> {
        fields
            .iter()
            .filter(|(name, _)| name.ends_with(suffix))
            .map(|(_, value)| value.clone())
            .collect()
    };

    let guids = values_of("[guid]");
    let mut names = values_of("[iaas_identifier]");
    if names.is_empty() {
        names = values_of("[name]");
    }

    if names.len() != guids.len() {
        return Err(FormError::GuidCountMismatch {
            names: names.len(),
            guids: guids.len(),
        });
    }

    Ok(names
        .into_iter()
        .zip(guids)
        .map(|(name, guid)| ZoneGuid { name, guid })
        .collect())
}

/// Form round trips through one client stack.
#[derive(Debug, Clone, Copy)]
pub struct FormSession<'a> {
    api: &'a Orchestrator,
    variant: Variant,
}

impl<'a> FormSession<'a> {
    #[must_use]
    pub fn new(api: &'a Orchestrator) -> Self {
        Self {
            api,
            variant: Variant::Authed,
        }
    }

    #[must_use]
    pub fn via(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// GETs a page and returns its HTML.
    ///
    /// # Errors
    /// Anything [`Orchestrator::fetch`] returns, or a body read failure.
    pub async fn fetch_page(&self, path: &str) -> Result<String, ApiError> {
        let validated = self.api.fetch(Call::get(path).via(self.variant)).await?;
        self.text(validated).await
    }

    async fn text(&self, validated: Validated) -> Result<String, ApiError> {
        match validated {
            Validated::Present(response) => {
                self.api.guard(async { Ok(response.text().await?) }).await
            }
            Validated::Absent(_) => Ok(String::new()),
        }
    }

    /// Reads the wanted form from `path`.
    ///
    /// With `optional` set, a page without a matching form yields an empty
    /// [`Form`] instead of an error.
    ///
    /// # Errors
    /// [`FormError::FormNotFound`] or [`FormError::MissingToken`] wrapped in
    /// [`ApiError::Form`], besides request failures.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_form(
        &self,
        path: &str,
        wanted: &FormMatch,
        optional: bool,
    ) -> Result<Form, ApiError> {
        let html = self.fetch_page(path).await?;
        match parse_form(&html, path, wanted)? {
            Some(form) => Ok(form),
            None if optional => {
                tracing::debug!("optional form not present");
                Ok(Form::default())
            }
            None => Err(FormError::FormNotFound {
                path: path.to_owned(),
            }
            .into()),
        }
    }

    /// POSTs `fields` url-encoded to the form's action and returns the HTML
    /// the server answers with.
    ///
    /// # Errors
    /// [`ApiError::UnexpectedStatus`] for anything but 200, besides request
    /// failures.
    pub async fn submit_form(
        &self,
        form: &Form,
        fields: &[(String, String)],
    ) -> Result<String, ApiError> {
        let call = Call::post(form.action.as_str())
            .via(self.variant)
            .form(&form.payload(fields));
        let validated = self.api.fetch(call).await?;
        self.text(validated).await
    }
}
