//! gRPC transport tests driven by a scripted stub.

use crate::mock_infrastructure::{pool_of, ScriptedGrpcStub};
use dapi_core::{
    address::{Address, AddressPool},
    provider::AddressProviderKind,
    transport::{
        errors::{CODE_METADATA_KEY, CONSENSUS_ERROR_METADATA_KEY},
        GrpcTarget, GrpcTransport, RequestOptions, ResponseErrorKind, TransportError,
    },
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tonic::{
    metadata::{MetadataMap, MetadataValue},
    Code, Status,
};

fn url(address: &str) -> String {
    GrpcTarget::from_address(&Address::parse(address).unwrap()).url
}

fn transport(addresses: &[&str]) -> (GrpcTransport, Arc<AddressPool>) {
    let addresses: Vec<String> = addresses.iter().map(|a| (*a).to_string()).collect();
    let pool = pool_of(&addresses, Duration::from_secs(60));
    (GrpcTransport::with_provider(AddressProviderKind::List(Arc::clone(&pool))), pool)
}

fn status_with(code: Code, message: &str, metadata: MetadataMap) -> Status {
    Status::with_metadata(code, message, metadata)
}

#[tokio::test]
async fn test_unavailable_node_is_banned_and_skipped() {
    let stub = ScriptedGrpcStub::new();
    stub.reply(&url("10.0.0.1"), Err(Status::unavailable("connection refused")))
        .reply(&url("10.0.0.2"), Ok(json!({ "height": 42 })));

    let (transport, pool) = transport(&["10.0.0.1", "10.0.0.2"]);

    let response = transport
        .request(&stub, "getBlockchainStatus", json!({}), &RequestOptions::new())
        .await
        .expect("second node answers");

    assert_eq!(response, json!({ "height": 42 }));
    assert_eq!(transport.last_used_address().unwrap().host(), "10.0.0.2");
    assert_eq!(stub.calls_to(&url("10.0.0.2")), 1);

    // The failing node was only tried if it happened to be picked first.
    let banned: Vec<String> = pool.banned_addresses().iter().map(|a| a.host()).collect();
    match stub.calls_to(&url("10.0.0.1")) {
        0 => assert!(banned.is_empty()),
        _ => assert_eq!(banned, vec!["10.0.0.1".to_string()]),
    }
}

#[tokio::test]
async fn test_every_call_carries_deadline() {
    let stub = ScriptedGrpcStub::new();
    stub.fallback(Ok(json!(null)));

    let (transport, _pool) = transport(&["10.0.0.1"]);
    transport
        .request(&stub, "getStatus", json!({}), &RequestOptions::new())
        .await
        .expect("stub answers");

    let calls = stub.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "getStatus");
    assert!(calls[0].has_deadline);
}

#[tokio::test]
async fn test_consensus_error_keeps_raw_payload() {
    let mut metadata = MetadataMap::new();
    metadata.insert(CODE_METADATA_KEY, MetadataValue::from_static("1040"));
    metadata.insert_bin(CONSENSUS_ERROR_METADATA_KEY, MetadataValue::from_bytes(&[0x01, 0x02]));

    let stub = ScriptedGrpcStub::new();
    stub.fallback(Err(status_with(Code::Unknown, "invalid state transition", metadata)));

    let (transport, pool) = transport(&["10.0.0.1", "10.0.0.2"]);

    let error = transport
        .request(&stub, "broadcastStateTransition", json!({}), &RequestOptions::new())
        .await
        .expect_err("consensus rejects the transition");

    let TransportError::Response(response) = &error else {
        panic!("expected a plain response error, got {error:?}");
    };
    assert_eq!(response.kind, ResponseErrorKind::ProtocolConsensusError);
    assert_eq!(response.code, 1040);
    assert_eq!(response.raw.as_deref(), Some(&[0x01, 0x02][..]));

    assert_eq!(stub.calls().len(), 1);
    assert!(pool.banned_addresses().is_empty());
}

#[tokio::test]
async fn test_unknown_with_standard_code_is_remapped() {
    let mut metadata = MetadataMap::new();
    metadata.insert(CODE_METADATA_KEY, MetadataValue::from_static("3"));

    let stub = ScriptedGrpcStub::new();
    stub.fallback(Err(status_with(Code::Unknown, "bad argument", metadata)));

    let (transport, pool) = transport(&["10.0.0.1"]);

    let error = transport
        .request(&stub, "getIdentity", json!({}), &RequestOptions::new())
        .await
        .expect_err("argument rejected");

    assert_eq!(error.kind(), Some(ResponseErrorKind::InvalidRequest));
    assert_eq!(error.response_error().unwrap().code, i64::from(Code::InvalidArgument as i32));
    assert!(pool.banned_addresses().is_empty());
}

#[tokio::test]
async fn test_internal_error_with_remote_stack() {
    let mut metadata = MetadataMap::new();
    metadata.insert_bin("stack-bin", MetadataValue::from_bytes(b"Error: drive\n    at abci"));

    let stub = ScriptedGrpcStub::new();
    stub.fallback(Err(status_with(Code::Internal, "drive crashed", metadata)));

    let (transport, pool) = transport(&["10.0.0.1", "10.0.0.2"]);

    let error = transport
        .request(&stub, "getIdentity", json!({}), &RequestOptions::new())
        .await
        .expect_err("every node crashes");

    assert!(matches!(error, TransportError::NoAvailableAddressesForRetry(_)));
    let response = error.response_error().unwrap();
    assert_eq!(response.kind, ResponseErrorKind::InternalServerError);
    assert!(response.stack.as_deref().is_some_and(|s| s.contains("at abci")));
    assert_eq!(pool.banned_addresses().len(), 2);
    assert_eq!(stub.calls().len(), 2);
}

#[tokio::test]
async fn test_not_found_does_not_ban() {
    let stub = ScriptedGrpcStub::new();
    stub.fallback(Err(Status::not_found("identity not found")));

    let (transport, pool) = transport(&["10.0.0.1"]);

    let error = transport
        .request(&stub, "getIdentity", json!({}), &RequestOptions::new())
        .await
        .expect_err("identity missing");

    assert!(matches!(error, TransportError::Response(_)));
    assert_eq!(error.kind(), Some(ResponseErrorKind::NotFound));
    assert_eq!(pool.live_addresses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_nodes_time_out_until_retries_run_out() {
    let stub = ScriptedGrpcStub::new();
    stub.delay(&url("10.0.0.1"), Duration::from_secs(30))
        .delay(&url("10.0.0.2"), Duration::from_secs(30))
        .fallback(Ok(json!(null)));

    let (transport, pool) = transport(&["10.0.0.1", "10.0.0.2"]);
    let options = RequestOptions::new().retries(1).timeout(Duration::from_secs(2));

    let error = transport
        .request(&stub, "getStatus", json!({}), &options)
        .await
        .expect_err("both nodes are too slow");

    assert!(matches!(error, TransportError::MaxRetriesReached(_)));
    assert_eq!(error.kind(), Some(ResponseErrorKind::Timeout));
    assert_eq!(pool.banned_addresses().len(), 2);
    assert_eq!(stub.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_surfaces_immediately_when_requested() {
    let stub = ScriptedGrpcStub::new();
    stub.delay(&url("10.0.0.1"), Duration::from_secs(30))
        .delay(&url("10.0.0.2"), Duration::from_secs(30))
        .fallback(Ok(json!(null)));

    let (transport, _pool) = transport(&["10.0.0.1", "10.0.0.2"]);
    let options =
        RequestOptions::new().timeout(Duration::from_secs(2)).throw_deadline_exceeded();

    let error = transport
        .request(&stub, "getStatus", json!({}), &options)
        .await
        .expect_err("deadline exceeded");

    assert!(matches!(error, TransportError::Response(_)));
    assert_eq!(error.kind(), Some(ResponseErrorKind::Timeout));
    assert_eq!(stub.calls().len(), 1);
}

#[tokio::test]
async fn test_custom_span_keeps_behavior() {
    let stub = ScriptedGrpcStub::new();
    stub.fallback(Ok(json!("ok")));

    let (transport, _pool) = transport(&["10.0.0.1"]);
    let transport = transport.with_span(tracing::info_span!("platform_client"));

    let response = transport
        .request(&stub, "getStatus", json!({}), &RequestOptions::new())
        .await
        .expect("stub answers");
    assert_eq!(response, json!("ok"));
}
