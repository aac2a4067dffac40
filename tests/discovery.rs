mod common;

use std::sync::Arc;

use tokio::time::Duration;

use common::{register, FlakyStorage, ScriptedFetch, NODE_PAYLOAD};
use nodescrape::{
    Discovery, DiscoveryConfig, DiscoveryError, DiscoveryOutcome, FetchResponse, MemoryStorage,
    Storage,
};

fn discovery(storage: Arc<dyn Storage>, fetch: Arc<ScriptedFetch>) -> Discovery {
    Discovery::new(storage, fetch, DiscoveryConfig::default())
}

#[tokio::test]
async fn add_single_skips_probe_for_known_url() {
    let storage = Arc::new(MemoryStorage::new());
    register(storage.as_ref(), "known", "http://10.0.0.4:9100/metrics").await;
    let fetch = Arc::new(ScriptedFetch::new().respond("http://10.0.0.4:9100/metrics", NODE_PAYLOAD));

    let outcome = discovery(storage.clone(), fetch.clone())
        .add_single("10.0.0.4")
        .await
        .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::AlreadyExists);
    assert!(fetch.calls().is_empty());
    assert_eq!(storage.list_endpoints().await.unwrap().len(), 1);
}

#[tokio::test]
async fn add_single_unreachable_leaves_registry_alone() {
    let storage = Arc::new(MemoryStorage::new());
    let fetch = Arc::new(ScriptedFetch::new());

    let outcome = discovery(storage.clone(), fetch.clone())
        .add_single("10.0.0.9")
        .await
        .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Unreachable);
    assert_eq!(fetch.calls(), vec!["http://10.0.0.9:9100/metrics".to_string()]);
    assert_eq!(fetch.timeouts(), vec![Duration::from_secs(2)]);
    assert!(storage.list_endpoints().await.unwrap().is_empty());
}

#[tokio::test]
async fn add_single_treats_error_status_as_unreachable() {
    let storage = Arc::new(MemoryStorage::new());
    let fetch = Arc::new(ScriptedFetch::new().respond_with(
        "http://10.0.0.9:9100/metrics",
        FetchResponse {
            status: 404,
            body: "not found".into(),
            date: None,
        },
    ));

    let outcome = discovery(storage.clone(), fetch).add_single("10.0.0.9").await.unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Unreachable);
    assert!(storage.list_endpoints().await.unwrap().is_empty());
}

#[tokio::test]
async fn add_single_registers_fingerprinted_exporter() {
    let storage = Arc::new(MemoryStorage::new());
    let fetch = Arc::new(ScriptedFetch::new().respond("http://10.0.0.4:9100/metrics", NODE_PAYLOAD));

    let outcome = discovery(storage.clone(), fetch.clone())
        .add_single("10.0.0.4")
        .await
        .unwrap();
    assert_eq!(fetch.timeouts(), vec![Duration::from_secs(2)]);

    let endpoint = match outcome {
        DiscoveryOutcome::Added(endpoint) => endpoint,
        other => panic!("expected Added, got {:?}", other),
    };
    assert_eq!(endpoint.id, 1);
    assert_eq!(endpoint.name, "alpha");
    assert_eq!(endpoint.url, "http://10.0.0.4:9100/metrics");
    assert!(endpoint.enabled);
    assert_eq!(storage.list_endpoints().await.unwrap(), vec![endpoint]);
}

#[tokio::test]
async fn add_single_rejects_bad_address_without_probing() {
    let fetch = Arc::new(ScriptedFetch::new());
    let result = discovery(Arc::new(MemoryStorage::new()), fetch.clone())
        .add_single("   ")
        .await;

    assert!(matches!(result, Err(DiscoveryError::InvalidAddress(_))));
    assert!(fetch.calls().is_empty());
}

#[tokio::test]
async fn scan_subnet_probes_unregistered_hosts_with_bounded_concurrency() {
    let storage = Arc::new(MemoryStorage::new());
    register(storage.as_ref(), "known", "http://192.168.1.5:9100/metrics").await;

    let fetch = Arc::new(
        ScriptedFetch::new()
            .respond("http://192.168.1.5:9100/metrics", NODE_PAYLOAD)
            .respond("http://192.168.1.10:9100/metrics", NODE_PAYLOAD)
            .respond("http://192.168.1.20:9100/metrics", "node_network_up{device=\"eth0\"} 1\n")
            .respond_with(
                "http://192.168.1.30:9100/metrics",
                FetchResponse {
                    status: 500,
                    body: String::new(),
                    date: None,
                },
            )
            .delay(Duration::from_millis(5)),
    );

    let found = discovery(storage.clone(), fetch.clone())
        .scan_subnet("192.168.1")
        .await
        .unwrap();

    let calls = fetch.calls();
    assert_eq!(calls.len(), 253);
    assert!(!calls.contains(&"http://192.168.1.5:9100/metrics".to_string()));
    assert!(calls.contains(&"http://192.168.1.1:9100/metrics".to_string()));
    assert!(calls.contains(&"http://192.168.1.254:9100/metrics".to_string()));
    assert!(!calls.contains(&"http://192.168.1.0:9100/metrics".to_string()));
    assert!(!calls.contains(&"http://192.168.1.255:9100/metrics".to_string()));

    assert!(fetch.max_in_flight() <= 10, "in flight: {}", fetch.max_in_flight());
    assert!(fetch.max_in_flight() > 1);
    assert_eq!(fetch.timeouts(), vec![Duration::from_secs(2)]);

    let names: Vec<&str> = found.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "exporter-192.168.1.20"]);
    assert!(found.iter().all(|e| e.enabled && e.id > 1));

    let registered = storage.list_endpoints().await.unwrap();
    assert_eq!(registered.len(), 3);
    assert_eq!(&registered[1..], &found[..]);
}

#[tokio::test]
async fn scan_subnet_honours_configured_limit() {
    let fetch = Arc::new(ScriptedFetch::new().delay(Duration::from_millis(2)));
    let config = DiscoveryConfig {
        max_in_flight: 3,
        ..Default::default()
    };

    let found = Discovery::new(Arc::new(MemoryStorage::new()), fetch.clone(), config)
        .scan_subnet("10.1.2")
        .await
        .unwrap();

    assert!(found.is_empty());
    assert_eq!(fetch.calls().len(), 254);
    assert!(fetch.max_in_flight() <= 3);
    assert_eq!(fetch.timeouts(), vec![Duration::from_secs(2)]);
}

#[tokio::test]
async fn scan_subnet_surfaces_storage_failure() {
    let storage = Arc::new(FlakyStorage {
        fail_endpoints: true,
        ..Default::default()
    });
    let fetch = Arc::new(ScriptedFetch::new().respond("http://10.1.2.3:9100/metrics", NODE_PAYLOAD));

    let result = discovery(storage.clone(), fetch).scan_subnet("10.1.2").await;

    assert!(matches!(result, Err(DiscoveryError::Storage(_))));
    assert!(storage.list_endpoints().await.unwrap().is_empty());
}

#[tokio::test]
async fn configured_discovery_timeout_reaches_every_fetch() {
    let fetch = Arc::new(ScriptedFetch::new().respond("http://10.1.2.7:9100/metrics", NODE_PAYLOAD));
    let config = DiscoveryConfig {
        probe_timeout: Duration::from_millis(750),
        ..Default::default()
    };
    let discovery = Discovery::new(Arc::new(MemoryStorage::new()), fetch.clone(), config);

    discovery.add_single("10.1.2.7").await.unwrap();
    discovery.scan_subnet("10.1.2").await.unwrap();

    assert_eq!(fetch.calls().len(), 1 + 253);
    assert_eq!(fetch.timeouts(), vec![Duration::from_millis(750)]);
}
