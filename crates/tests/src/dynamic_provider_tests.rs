//! Dynamic address provider tests: masternode list diffs flowing into the address pool.

use crate::mock_infrastructure::{diff, eventually, full_diff, masternode, ScriptedDiffSubscriber};
use dapi_core::{
    masternode::TrackerError,
    provider::{
        AddressOptions, AddressProvider, AddressProviderKind, DynamicAddressProvider,
        ProviderError, ProviderFactory,
    },
};
use std::sync::Arc;

fn dynamic_provider(
    subscriber: &Arc<ScriptedDiffSubscriber>,
    seeds: &[&str],
) -> (AddressProviderKind, Arc<DynamicAddressProvider>) {
    let options = AddressOptions {
        seeds: Some(seeds.iter().map(|s| (*s).to_string()).collect()),
        ..Default::default()
    };
    let provider = ProviderFactory::new()
        .diff_subscriber(subscriber.clone())
        .build(&options)
        .expect("seed options build a provider");

    let AddressProviderKind::Dynamic(dynamic) = &provider else {
        panic!("seeds must produce a dynamic provider, got {}", provider.as_str());
    };
    let dynamic = Arc::clone(dynamic);
    (provider, dynamic)
}

async fn block_hash_reaches(provider: &DynamicAddressProvider, block_hash: &str) -> bool {
    eventually(200, || provider.tracker().current_list().block_hash() == block_hash).await
}

#[tokio::test(start_paused = true)]
async fn test_ip_change_keeps_address_identity_and_ban_state() {
    let subscriber = ScriptedDiffSubscriber::new();
    let feed = subscriber.push_connection();
    let (provider, dynamic) = dynamic_provider(&subscriber, &["10.0.0.1:1443"]);

    feed.send_diff(full_diff("b1", vec![masternode("abc", "10.0.0.2", true)]));

    let address = provider.get_live_address().await.unwrap().expect("masternode is live");
    assert_eq!(address.host(), "10.0.0.2");
    assert_eq!(address.pro_tx_hash(), Some("abc"));
    assert_eq!(subscriber.subscribed_hosts(), vec!["10.0.0.1".to_string()]);

    address.mark_as_banned();

    feed.send_diff(diff("b1", "b2", &[], vec![masternode("abc", "10.0.0.3", true)]));
    assert!(block_hash_reaches(&dynamic, "b2").await);

    assert!(provider.get_live_address().await.unwrap().is_none());

    let known = dynamic.pool().all_addresses();
    assert_eq!(known.len(), 1);
    assert!(Arc::ptr_eq(&known[0], &address));
    assert_eq!(address.host(), "10.0.0.3");
    assert_eq!(address.ban_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_and_invalid_masternodes_leave_the_pool() {
    let subscriber = ScriptedDiffSubscriber::new();
    let feed = subscriber.push_connection();
    let (provider, dynamic) = dynamic_provider(&subscriber, &["10.0.0.1"]);

    feed.send_diff(full_diff(
        "b1",
        vec![
            masternode("aaa", "10.1.0.1", true),
            masternode("bbb", "10.1.0.2", true),
            masternode("ccc", "10.1.0.3", false),
        ],
    ));
    assert!(provider.has_live_addresses().await.unwrap());
    assert_eq!(dynamic.pool().len(), 2);

    feed.send_diff(diff("b1", "b2", &["aaa"], Vec::new()));
    assert!(block_hash_reaches(&dynamic, "b2").await);

    let address = provider.get_live_address().await.unwrap().expect("one masternode left");
    assert_eq!(address.pro_tx_hash(), Some("bbb"));
    assert_eq!(dynamic.pool().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_resets_list_and_moves_to_another_seed() {
    let subscriber = ScriptedDiffSubscriber::new();
    let first = subscriber.push_connection();
    let second = subscriber.push_connection();
    let (provider, dynamic) = dynamic_provider(&subscriber, &["10.0.0.1", "10.0.0.2"]);

    first.send_diff(full_diff("b1", vec![masternode("aaa", "10.1.0.1", true)]));
    let address = provider.get_live_address().await.unwrap().expect("masternode is live");
    assert_eq!(address.host(), "10.1.0.1");

    first.fail("connection reset");
    second.send_diff(full_diff("b5", vec![masternode("bbb", "10.1.0.2", true)]));
    assert!(block_hash_reaches(&dynamic, "b5").await);

    let hosts = subscriber.subscribed_hosts();
    assert_eq!(hosts.len(), 2);
    assert_ne!(hosts[0], hosts[1]);

    let address = provider.get_live_address().await.unwrap().expect("new list is live");
    assert_eq!(address.host(), "10.1.0.2");
    assert_eq!(dynamic.pool().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bad_diff_resubscribes_from_scratch() {
    let subscriber = ScriptedDiffSubscriber::new();
    let first = subscriber.push_connection();
    let second = subscriber.push_connection();
    let (provider, dynamic) = dynamic_provider(&subscriber, &["10.0.0.1"]);

    first.send_diff(full_diff("b1", vec![masternode("aaa", "10.1.0.1", true)]));
    assert!(provider.has_live_addresses().await.unwrap());

    first.send_diff(diff("unknown-base", "b2", &[], Vec::new()));
    second.send_diff(full_diff("b9", vec![masternode("aaa", "10.1.0.9", true)]));
    assert!(block_hash_reaches(&dynamic, "b9").await);

    assert_eq!(subscriber.subscription_count(), 2);
    let address = provider.get_live_address().await.unwrap().expect("masternode is live");
    assert_eq!(address.host(), "10.1.0.9");
}

#[tokio::test(start_paused = true)]
async fn test_initial_failure_surfaces_then_next_call_recovers() {
    let subscriber = ScriptedDiffSubscriber::new();
    subscriber.push_refusal("seed offline");
    let (provider, dynamic) = dynamic_provider(&subscriber, &["10.0.0.1", "10.0.0.2"]);

    let error = provider.get_live_address().await.expect_err("first subscription refused");
    assert!(matches!(error, ProviderError::Tracker(TrackerError::Subscription(_))));
    assert!(dynamic.pool().is_empty());

    let feed = subscriber.push_connection();
    feed.send_diff(full_diff("b1", vec![masternode("aaa", "10.1.0.1", true)]));

    let address = provider.get_live_address().await.unwrap().expect("second seed serves a list");
    assert_eq!(address.host(), "10.1.0.1");

    // The refusing seed was banned, so the retry went to the other one.
    let hosts = subscriber.subscribed_hosts();
    assert_eq!(hosts.len(), 2);
    assert_ne!(hosts[0], hosts[1]);
}

#[tokio::test(start_paused = true)]
async fn test_allow_list_filters_masternodes() {
    let subscriber = ScriptedDiffSubscriber::new();
    let feed = subscriber.push_connection();
    let options = AddressOptions {
        seeds: Some(vec!["10.0.0.1".to_string()]),
        allow_list: Some(vec!["10.1.0.2".to_string()]),
        ..Default::default()
    };
    let provider =
        ProviderFactory::new().diff_subscriber(subscriber.clone()).build(&options).unwrap();

    feed.send_diff(full_diff(
        "b1",
        vec![masternode("aaa", "10.1.0.1", true), masternode("bbb", "10.1.0.2", true)],
    ));

    for _ in 0..10 {
        let address = provider.get_live_address().await.unwrap().expect("allowed node is live");
        assert_eq!(address.host(), "10.1.0.2");
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_subscription() {
    let subscriber = ScriptedDiffSubscriber::new();
    let feed = subscriber.push_connection();
    let (provider, dynamic) = dynamic_provider(&subscriber, &["10.0.0.1"]);

    feed.send_diff(full_diff("b1", vec![masternode("aaa", "10.1.0.1", true)]));
    assert!(provider.has_live_addresses().await.unwrap());
    assert!(dynamic.tracker().is_running());

    dynamic.tracker().stop();
    dynamic.tracker().stop();

    assert!(!dynamic.tracker().is_running());
    assert!(dynamic.tracker().current_list().is_empty());
}
