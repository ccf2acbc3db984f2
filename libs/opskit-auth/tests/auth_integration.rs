//! Token lifecycle through the full client stack:
//! `RetryingClient` → `AuthClient` → `HttpClient` → mock server.

use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use httpmock::prelude::*;
use opskit_auth::{AuthClient, AuthConfig};
use opskit_http::{HttpClient, RequestBuilder, RetryConfig, RetryingClient};
use serde_json::json;
use url::Url;

type Stack = RetryingClient<AuthClient<HttpClient>>;

fn stack(server: &MockServer) -> Stack {
    let transport = HttpClient::builder(Url::parse(&server.base_url()).unwrap())
        .allow_insecure_http()
        .build()
        .unwrap();
    let auth = AuthClient::new(transport, AuthConfig::password("admin", "pw")).unwrap();
    RetryingClient::new(auth, RetryConfig::default())
}

fn token(value: &str) -> serde_json::Value {
    json!({"access_token": value, "expires_in": 3600, "token_type": "bearer"})
}

#[tokio::test]
async fn rejected_cached_token_is_reminted_and_request_retried_once() {
    let server = MockServer::start();
    let mut mint = server.mock(|when, then| {
        when.method(POST).path("/uaa/oauth/token");
        then.status(200).json_body(token("tok-1"));
    });
    let mut warm = server.mock(|when, then| {
        when.path("/api/v0/staged/products")
            .header("authorization", "Bearer tok-1");
        then.status(200).json_body(json!([]));
    });

    let client = stack(&server);
    RequestBuilder::new(Method::GET, "/api/v0/staged/products")
        .send(&client)
        .await
        .unwrap();
    mint.assert_calls(1);
    mint.delete();
    warm.delete();

    // The server now considers tok-1 revoked
    let revoked = server.mock(|when, then| {
        when.path("/api/v0/staged/director/properties")
            .header("authorization", "Bearer tok-1");
        then.status(401).json_body(json!({"error": "invalid_token"}));
    });
    let remint = server.mock(|when, then| {
        when.method(POST).path("/uaa/oauth/token");
        then.status(200).json_body(token("tok-2"));
    });
    let accepted = server.mock(|when, then| {
        when.method(PUT)
            .path("/api/v0/staged/director/properties")
            .header("authorization", "Bearer tok-2")
            .json_body(json!({"director_configuration": {"ntp_servers_string": "pool.ntp.org"}}));
        then.status(200).json_body(json!({"ok": true}));
    });

    let response = RequestBuilder::new(Method::PUT, "/api/v0/staged/director/properties")
        .json(&json!({"director_configuration": {"ntp_servers_string": "pool.ntp.org"}}))
        .send(&client)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"ok": true}));
    revoked.assert_calls(1);
    remint.assert_calls(1);
    accepted.assert_calls(1);
}

#[tokio::test]
async fn second_rejection_is_returned_to_caller() {
    let server = MockServer::start();
    let mut warm_mint = server.mock(|when, then| {
        when.path("/uaa/oauth/token");
        then.status(200).json_body(token("tok-1"));
    });
    let mut warm = server.mock(|when, then| {
        when.path("/api/v0/info");
        then.status(200);
    });
    let client = stack(&server);
    RequestBuilder::new(Method::GET, "/api/v0/info")
        .send(&client)
        .await
        .unwrap();
    warm_mint.delete();
    warm.delete();

    let mint = server.mock(|when, then| {
        when.path("/uaa/oauth/token");
        then.status(200).json_body(token("tok-2"));
    });
    let denied = server.mock(|when, then| {
        when.path("/api/v0/info");
        then.status(401);
    });

    let response = RequestBuilder::new(Method::GET, "/api/v0/info")
        .send(&client)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    mint.assert_calls(1);
    denied.assert_calls(2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_token_mint() {
    let server = MockServer::start();
    let mint = server.mock(|when, then| {
        when.method(POST).path("/uaa/oauth/token");
        then.status(200)
            .delay(Duration::from_millis(200))
            .json_body(token("shared"));
    });
    let api = server.mock(|when, then| {
        when.path("/api/v0/installations")
            .header("authorization", "Bearer shared");
        then.status(200).json_body(json!({"installations": []}));
    });

    let client = Arc::new(stack(&server));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            RequestBuilder::new(Method::GET, "/api/v0/installations")
                .send(&client)
                .await
                .map(|r| r.status())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), StatusCode::OK);
    }

    mint.assert_calls(1);
    api.assert_calls(8);
}

#[tokio::test]
async fn unreachable_token_endpoint_is_retried_then_reported() {
    let server = MockServer::start();
    let port = server.port();
    drop(server);

    let transport = HttpClient::builder(Url::parse(&format!("http://127.0.0.1:{port}")).unwrap())
        .allow_insecure_http()
        .build()
        .unwrap();
    let client = AuthClient::new(transport, AuthConfig::client_credentials("ci", "s")).unwrap();

    let err = RequestBuilder::new(Method::GET, "/api/v0/info")
        .send(&client)
        .await
        .unwrap_err();
    let rendered = format!("{:#}", anyhow::Error::new(err));
    assert!(
        rendered.starts_with(&format!(
            "token could not be retrieved from target url: could not send api request to POST http://127.0.0.1:{port}/uaa/oauth/token: "
        )),
        "{rendered}"
    );
    assert_eq!(rendered.matches("could not send api request").count(), 1, "{rendered}");
}
