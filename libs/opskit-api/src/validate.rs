//! Status code policies.
//!
//! Every call names the statuses it accepts. Statuses outside the policy turn
//! into [`ApiError::UnexpectedStatus`] carrying a dump of the response.

use http::{Method, StatusCode};
use opskit_http::HttpResponse;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Which statuses a call accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// 200 only
    Ok,
    /// 200, or 207 when the server only produced verifier warnings
    OkOrWarn,
    /// 200, or 404 meaning "nothing there"
    OkOrMissing,
    /// 200, or 405 from servers that predate the endpoint
    OkOrNotAllowed,
    /// 200, or 410 for something already deleted
    OkOrGone,
    /// 204 only
    NoContent,
}

/// How a status fits a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Accepted with warnings the caller chose to ignore
    AcceptWithWarnings,
    /// Accepted, meaning the resource is absent
    Absent,
    Reject,
}

impl StatusPolicy {
    /// `OkOrWarn` when verifier warnings are ignored, `Ok` otherwise.
    #[must_use]
    pub fn ignoring_warnings(ignore: bool) -> Self {
        if ignore { Self::OkOrWarn } else { Self::Ok }
    }

    #[must_use]
    pub fn verdict(self, status: StatusCode) -> Verdict {
        match (self, status) {
            (Self::NoContent, StatusCode::NO_CONTENT) => Verdict::Accept,
            (Self::NoContent, _) => Verdict::Reject,
            (_, StatusCode::OK) => Verdict::Accept,
            (Self::OkOrWarn, StatusCode::MULTI_STATUS) => Verdict::AcceptWithWarnings,
            (Self::OkOrMissing, StatusCode::NOT_FOUND)
            | (Self::OkOrNotAllowed, StatusCode::METHOD_NOT_ALLOWED)
            | (Self::OkOrGone, StatusCode::GONE) => Verdict::Absent,
            _ => Verdict::Reject,
        }
    }

    #[must_use]
    pub fn accepts(self, status: StatusCode) -> bool {
        self.verdict(status) != Verdict::Reject
    }
}

/// A response that passed validation.
#[derive(Debug)]
pub enum Validated {
    /// The response carries a body worth reading
    Present(HttpResponse),
    /// The policy mapped the status to "absent"; the body was discarded
    Absent(StatusCode),
}

impl Validated {
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent(_))
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Present(response) => response.status(),
            Self::Absent(status) => *status,
        }
    }

    /// The response, unless the resource was absent.
    #[must_use]
    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            Self::Present(response) => Some(response),
            Self::Absent(_) => None,
        }
    }

    /// Decodes the body, or returns `None` when the resource was absent.
    ///
    /// # Errors
    /// Returns [`ApiError::Decode`] when the body is not valid JSON for `T`.
    pub async fn json<T: DeserializeOwned>(self, path: &str) -> Result<Option<T>, ApiError> {
        match self {
            Self::Absent(_) => Ok(None),
            Self::Present(response) => decode(response, path).await.map(Some),
        }
    }

    /// Decodes the body, falling back to `T::default()` when absent.
    ///
    /// # Errors
    /// Same as [`json`](Self::json).
    pub async fn json_or_default<T>(self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Default,
    {
        self.json(path).await.map(Option::unwrap_or_default)
    }

    /// Drops the body without reading it into memory.
    pub async fn discard(self) {
        if let Self::Present(response) = self {
            response.discard().await;
        }
    }
}

/// Reads a JSON body.
///
/// # Errors
/// Returns [`ApiError::Decode`] for malformed JSON and [`ApiError::Request`]
/// when the body cannot be read.
pub async fn decode<T: DeserializeOwned>(response: HttpResponse, path: &str) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    decode_bytes(&bytes, path)
}

/// Parses a JSON body that was already read.
///
/// # Errors
/// Returns [`ApiError::Decode`] for malformed JSON.
pub fn decode_bytes<T: DeserializeOwned>(bytes: &[u8], path: &str) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|source| ApiError::Decode {
        path: path.to_owned(),
        source,
    })
}

/// Applies `policy` to `response`.
///
/// # Errors
/// Returns [`ApiError::UnexpectedStatus`] with a dump of the response when
/// the status is outside the policy.
pub async fn validate(
    response: HttpResponse,
    policy: StatusPolicy,
    method: &Method,
    path: &str,
) -> Result<Validated, ApiError> {
    let status = response.status();
    match policy.verdict(status) {
        Verdict::Accept => Ok(Validated::Present(response)),
        Verdict::AcceptWithWarnings => {
            tracing::warn!(
                %method,
                path,
                status = status.as_u16(),
                "server reported verifier warnings; continuing as requested"
            );
            Ok(Validated::Present(response))
        }
        Verdict::Absent => {
            tracing::debug!(%method, path, status = status.as_u16(), "treating response as absent");
            response.discard().await;
            Ok(Validated::Absent(status))
        }
        Verdict::Reject => Err(ApiError::UnexpectedStatus {
            method: method.clone(),
            path: path.to_owned(),
            status,
            dump: response.dump().await,
        }),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::Response;
    use opskit_http::full_body;

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse::new(
            Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(full_body(body))
                .unwrap(),
        )
    }

    #[test]
    fn policy_table() {
        type P = StatusPolicy;
        let cases = [
            (P::Ok, 200, Verdict::Accept),
            (P::Ok, 207, Verdict::Reject),
            (P::Ok, 204, Verdict::Reject),
            (P::OkOrWarn, 207, Verdict::AcceptWithWarnings),
            (P::OkOrWarn, 200, Verdict::Accept),
            (P::OkOrWarn, 422, Verdict::Reject),
            (P::OkOrMissing, 404, Verdict::Absent),
            (P::OkOrMissing, 405, Verdict::Reject),
            (P::OkOrNotAllowed, 405, Verdict::Absent),
            (P::OkOrNotAllowed, 404, Verdict::Reject),
            (P::OkOrGone, 410, Verdict::Absent),
            (P::OkOrGone, 404, Verdict::Reject),
            (P::NoContent, 204, Verdict::Accept),
            (P::NoContent, 200, Verdict::Reject),
        ];
        for (policy, status, expected) in cases {
            let status = StatusCode::from_u16(status).unwrap();
            assert_eq!(policy.verdict(status), expected, "{policy:?} {status}");
        }
    }

    #[test]
    fn warnings_flag_selects_policy() {
        assert_eq!(StatusPolicy::ignoring_warnings(true), StatusPolicy::OkOrWarn);
        assert_eq!(StatusPolicy::ignoring_warnings(false), StatusPolicy::Ok);
    }

    #[tokio::test]
    async fn rejection_dumps_response_and_names_path() {
        let err = validate(
            response(422, r#"{"errors":{"base":["verifier failed"]}}"#),
            StatusPolicy::Ok,
            &Method::PUT,
            "/api/v0/staged/director/properties",
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(
            message.starts_with(
                "request failed: unexpected response from PUT /api/v0/staged/director/properties:\nHTTP/1.1 422"
            ),
            "{message}"
        );
        assert!(message.contains("verifier failed"), "{message}");
        assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[tokio::test]
    async fn absent_decodes_to_none() {
        let validated = validate(
            response(405, "Method Not Allowed"),
            StatusPolicy::OkOrNotAllowed,
            &Method::GET,
            "/api/v0/staged/pending_changes",
        )
        .await
        .unwrap();
        assert!(validated.is_absent());
        let value: Option<serde_json::Value> = validated.json("/x").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let validated = validate(response(200, "{not json"), StatusPolicy::Ok, &Method::GET, "/x")
            .await
            .unwrap();
        let err = validated.json::<serde_json::Value>("/x").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
        assert!(err.to_string().starts_with("could not decode response from /x"));
    }
}
