#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Runs the opsctl binary against a mock Ops Manager.

use std::process::{Command, Output, Stdio};

use httpmock::prelude::*;
use serde_json::json;

fn opsctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_opsctl"))
        .args(args)
        .env_clear()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to execute opsctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_lists_subcommands() {
    let output = opsctl(&["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Usage:"));
    for command in ["apply-changes", "configure-product", "curl", "bosh-diff"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn version_is_printed() {
    let output = opsctl(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("opsctl "));
}

#[test]
fn unknown_subcommand_fails() {
    let output = opsctl(&["frobnicate"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unrecognized subcommand"));
}

#[test]
fn missing_env_file_fails() {
    let output = opsctl(&["--env", "/no/such/env.yml", "installations"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("config file does not exist: /no/such/env.yml"));
}

#[test]
fn missing_target_fails() {
    let output = opsctl(&["installations"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("target is required"));
}

#[test]
fn installations_are_listed() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/v0/installations");
        then.status(200).json_body(json!({
            "installations": [{
                "id": 7,
                "user_name": "admin",
                "status": "succeeded",
                "started_at": "2024-01-02T03:04:05Z",
                "finished_at": null
            }]
        }));
    });
    let target = server.base_url();

    let output = opsctl(&["--target", &target, "--skip-auth", "installations"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("ID  USER"));
    assert!(text.contains("7   admin  succeeded"));

    let output = opsctl(&["--target", &target, "--skip-auth", "--format", "json", "installations"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("\"id\": 7"));
    mock.assert_calls(2);
}

#[test]
fn curl_prints_the_body_and_fails_on_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v0/info");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"info":{"version":"3.0"}}"#);
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v0/missing");
        then.status(404).body("not here");
    });
    let target = server.base_url();

    let output = opsctl(&["-t", &target, "--skip-auth", "curl", "--path", "/api/v0/info"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("\"version\": \"3.0\""));
    assert!(stderr(&output).contains("Status: 200 OK"));

    let output = opsctl(&["-t", &target, "--skip-auth", "curl", "-p", "/api/v0/missing", "-s"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("not here"));
    assert!(stderr(&output).contains("server responded with a 404 error"));
}

#[test]
fn configure_authentication_skips_a_configured_target() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/login/ensure_availability");
        then.status(302)
            .header("location", "https://opsman.example.com/auth/cloudfoundry");
    });
    let setup = server.mock(|when, then| {
        when.method(POST).path("/api/v0/setup");
        then.status(200);
    });
    let target = server.base_url();

    let output = opsctl(&[
        "-t",
        &target,
        "configure-authentication",
        "-u",
        "admin",
        "-p",
        "secret",
        "-d",
        "passphrase",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("configuration previously completed"));
    setup.assert_calls(0);
}

#[test]
fn upload_product_streams_a_multipart_form() {
    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v0/available_products")
            .header_includes("content-type", "multipart/form-data; boundary=")
            .body_includes("name=\"product[file]\"; filename=\"cf.pivotal\"")
            .body_includes("tile bytes");
        then.status(200).json_body(json!({}));
    });
    let dir = tempfile::tempdir().unwrap();
    let product = dir.path().join("cf.pivotal");
    std::fs::write(&product, b"tile bytes").unwrap();
    let target = server.base_url();

    let output = opsctl(&[
        "-t",
        &target,
        "--skip-auth",
        "upload-product",
        "-p",
        product.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    upload.assert_calls(1);
}

#[test]
fn unreachable_target_reports_each_cause_once() {
    let server = MockServer::start();
    let target = server.base_url();
    drop(server);

    let output = opsctl(&["-t", &target, "--skip-auth", "installations"]);
    assert_eq!(output.status.code(), Some(1));
    let text = stderr(&output);
    let error = text
        .lines()
        .find(|line| line.starts_with("Error: "))
        .unwrap_or_else(|| panic!("no error line in {text}"));
    assert!(
        error.starts_with(&format!(
            "Error: could not make api request to installations endpoint: could not send api request to GET {target}/api/v0/installations: client error (Connect): "
        )),
        "{error}"
    );
    assert_eq!(error.matches("could not send api request").count(), 1, "{error}");
    assert_eq!(error.matches("client error (Connect)").count(), 1, "{error}");
}
