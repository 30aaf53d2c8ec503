//! CLI tests for the ctlog-s3 binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("ctlog-s3")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("put"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("--json-logs"));
}

#[test]
fn test_missing_config_fails() {
    Command::cargo_bin("ctlog-s3")
        .unwrap()
        .args(["--config", "/nonexistent/ctlog-s3.yaml", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn test_subcommand_required() {
    Command::cargo_bin("ctlog-s3").unwrap().assert().failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ls_against_mock_store() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("list-type", "2"))
        .and(query_param("prefix", "log/tile/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/xml")
                .set_body_string(
                    r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>test-bucket</Name>
  <KeyCount>2</KeyCount>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>log/tile/0/000</Key><Size>1</Size></Contents>
  <Contents><Key>log/tile/0/001</Key><Size>1</Size></Contents>
</ListBucketResult>"#,
                ),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "s3:\n  region: us-east-1\n  bucket: test-bucket\n  endpoint: {}\n  key_prefix: log/\n  force_path_style: true\n  access_key: AKID\n  secret_key: SECRET\n",
        mock_server.uri()
    )
    .unwrap();
    let config_path = file.path().to_path_buf();

    let output = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("ctlog-s3")
            .unwrap()
            .arg("--config")
            .arg(config_path)
            .args(["--metrics", "ls", "tile/"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "tile/0/000\ntile/0/001\n"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("s3_requests_total{code=\"200\",method=\"get\"} 1"));
}
