//! Configuration loading wired end to end: file, environment, client, request.

use crate::mock_infrastructure::DapiNodeMock;
use dapi_core::{
    config::ClientConfig,
    provider::Network,
    transport::{BanPolicy, RequestOptions},
    DapiClient,
};
use serde_json::json;
use serial_test::serial;
use std::{io::Write, time::Duration};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
#[serial]
async fn test_loaded_config_drives_client() {
    let mut node = DapiNodeMock::new().await;
    node.mock_result("getBestBlockHash", &json!("0000abcd"), 1).await;

    let file = write_config(&format!(
        r#"
[transport]
retries = 1
timeout_ms = 2000
json_rpc_ban_policy = "on_retriable_failure"

[addresses]
addresses = ["{}"]

[logging]
level = "debug"
"#,
        node.address()
    ));

    std::env::set_var("DAPI_CLIENT_CONFIG", file.path());
    let loaded = ClientConfig::load();
    std::env::remove_var("DAPI_CLIENT_CONFIG");
    let config = loaded.expect("config file loads");

    assert_eq!(config.transport.retries, 1);
    assert_eq!(config.transport.timeout(), Duration::from_secs(2));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.stream.max_retries_on_error, 10);

    let client = DapiClient::builder().config(config).build().expect("client builds");
    assert_eq!(client.address_provider().as_str(), "list");
    assert_eq!(
        client.json_rpc().executor().defaults().ban_policy,
        BanPolicy::OnRetriableFailure
    );

    let result = client
        .json_rpc()
        .request("getBestBlockHash", json!({}), &RequestOptions::new())
        .await
        .expect("node answers");

    assert_eq!(result, json!("0000abcd"));
    node.verify().await;
}

#[test]
#[serial]
fn test_environment_selects_network() {
    let file = write_config("[transport]\nretries = 3\n");

    std::env::set_var("DAPI__ADDRESSES__NETWORK", "local");
    let loaded = ClientConfig::from_file(file.path());
    std::env::remove_var("DAPI__ADDRESSES__NETWORK");
    let config = loaded.expect("config loads");

    assert_eq!(config.transport.retries, 3);
    assert_eq!(config.addresses.network, Some(Network::Local));

    let client = DapiClient::builder().config(config).build().expect("local network is static");
    assert_eq!(client.address_provider().as_str(), "list");
}

#[test]
#[serial]
fn test_mixed_address_groups_are_rejected() {
    let file = write_config(
        r#"
[addresses]
addresses = ["10.0.0.1"]
seeds = ["10.0.0.2"]
"#,
    );

    let config = ClientConfig::from_file(file.path()).expect("file parses");
    assert!(config.validate().is_err());
    assert!(DapiClient::builder().config(config).build().is_err());
}
