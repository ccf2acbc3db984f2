use std::path::Path;

use anyhow::{Context as _, Result, bail};
use bytes::Bytes;
use clap::Args;
use http::Method;
use opskit_api::RawRequest;

use super::{Context, Outcome};
use crate::output::print_text;

#[derive(Args)]
pub struct CurlArgs {
    /// API path, e.g. /api/v0/info
    #[arg(short = 'p', long)]
    path: String,

    /// HTTP method; GET, or POST when --data is given
    #[arg(short = 'x', long = "request")]
    method: Option<String>,

    /// Request body; `@FILE` reads it from a file
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Extra header as `Name: value`; repeat for several
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Only print the status and headers for 4xx and 5xx answers
    #[arg(short = 's', long)]
    silent: bool,
}

impl CurlArgs {
    fn request(&self) -> Result<RawRequest> {
        let method = match &self.method {
            Some(method) => Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid request method {method}"))?,
            None if self.data.is_some() => Method::POST,
            None => Method::GET,
        };

        let mut request = RawRequest::new(method, self.path.as_str());
        for header in &self.headers {
            request.headers.push(parse_header(header)?);
        }
        request.body = match self.data.as_deref() {
            Some(data) => Some(match data.strip_prefix('@') {
                Some(file) => read_body(Path::new(file))?,
                None => Bytes::copy_from_slice(data.as_bytes()),
            }),
            None => None,
        };
        Ok(request)
    }

    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let response = ctx
            .api
            .raw_request(self.request()?)
            .await
            .context("failed to make api request")?;

        let failed = response.status.as_u16() >= 400;
        if !self.silent || failed {
            let mut head = format!("Status: {}\n", response.status);
            for (name, value) in &response.headers {
                head.push_str(name.as_str());
                head.push_str(": ");
                head.push_str(&String::from_utf8_lossy(value.as_bytes()));
                head.push('\n');
            }
            eprint!("{head}");
        }

        let is_json = response
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let body = if is_json {
            match serde_json::from_slice::<serde_json::Value>(&response.body) {
                Ok(value) => serde_json::to_string_pretty(&value)?,
                Err(_) => String::from_utf8_lossy(&response.body).into_owned(),
            }
        } else {
            String::from_utf8_lossy(&response.body).into_owned()
        };
        print_text(&body)?;

        if failed {
            bail!("server responded with a {} error", response.status.as_u16());
        }
        Ok(Outcome::Success)
    }
}

fn read_body(path: &Path) -> Result<Bytes> {
    std::fs::read(path)
        .map(Bytes::from)
        .with_context(|| format!("couldn't open {}", path.display()))
}

/// Splits `Name: value`.
fn parse_header(header: &str) -> Result<(String, String)> {
    let Some((name, value)) = header.split_once(':') else {
        bail!("invalid header \"{header}\", expected \"Name: value\"");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header \"{header}\", expected \"Name: value\"");
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}
