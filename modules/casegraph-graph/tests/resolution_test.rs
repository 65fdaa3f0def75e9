//! Similarity scans, rejections and merges against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use casegraph_common::{CaseGraphError, Node, Relationship};
use casegraph_graph::{
    EntityResolver, GraphStore, InMemoryGraphStore, MergeFields, ScanEvent, ScanRequest,
};

const CASE: &str = "case-resolution";

async fn store_with(nodes: Vec<Node>) -> Arc<InMemoryGraphStore> {
    let store = Arc::new(InMemoryGraphStore::new());
    for node in nodes {
        store.create_node(CASE, node).await.unwrap();
    }
    store
}

fn marco_case() -> Vec<Node> {
    vec![
        Node::new("P1", "Person", "Marco"),
        Node::new("P2", "Person", "Marco D."),
        Node::new("C1", "Company", "Acme"),
        Node::new("D1", "Document", "Marco"),
    ]
}

fn pair_keys(pairs: &[casegraph_common::SimilarityPair]) -> BTreeSet<(String, String)> {
    pairs
        .iter()
        .map(|p| (p.entity1.key.clone(), p.entity2.key.clone()))
        .collect()
}

#[tokio::test]
async fn scan_matches_same_type_names_only() {
    let store = store_with(marco_case()).await;
    let resolver = EntityResolver::new(store);
    let request = ScanRequest { threshold: 0.7, ..Default::default() };
    let pairs = resolver.scan(CASE, &request).await.unwrap();

    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].entity1.key, "P1");
    assert_eq!(pairs[0].entity2.key, "P2");
    assert!((pairs[0].similarity - 10.0 / 13.0).abs() < 1e-12);
}

#[tokio::test]
async fn raising_threshold_yields_subset() {
    let names = [
        "Marco Rossi",
        "Marco Rosi",
        "M. Rossi",
        "Mario Rossi",
        "Maria Russo",
        "Marco",
        "Rossi Marco",
    ];
    let nodes = names
        .iter()
        .enumerate()
        .map(|(i, n)| Node::new(format!("p{i}"), "Person", *n))
        .collect();
    let store = store_with(nodes).await;
    let resolver = EntityResolver::new(store);

    let loose = ScanRequest { threshold: 0.6, max_results: 1000, ..Default::default() };
    let strict = ScanRequest { threshold: 0.9, max_results: 1000, ..Default::default() };
    let loose = pair_keys(&resolver.scan(CASE, &loose).await.unwrap());
    let strict = pair_keys(&resolver.scan(CASE, &strict).await.unwrap());

    assert!(!loose.is_empty());
    assert!(strict.is_subset(&loose));
}

#[tokio::test]
async fn results_are_sorted_and_capped() {
    let nodes = ["Acme", "Acme Ltd", "Acme Ltd.", "ACME LTD"]
        .iter()
        .enumerate()
        .map(|(i, n)| Node::new(format!("c{i}"), "Company", *n))
        .collect();
    let store = store_with(nodes).await;
    let resolver = EntityResolver::new(store);
    let request = ScanRequest { threshold: 0.5, max_results: 2, ..Default::default() };
    let pairs = resolver.scan(CASE, &request).await.unwrap();

    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].similarity, 1.0);
    assert!(pairs[0].similarity >= pairs[1].similarity);
}

#[tokio::test]
async fn rejected_pairs_are_skipped_regardless_of_order() {
    let store = store_with(marco_case()).await;
    let resolver = EntityResolver::new(store);
    let request = ScanRequest::default();

    let pair = resolver.reject_pair(CASE, "P2", "P1", "analyst").await.unwrap();
    assert_eq!((pair.key1.as_str(), pair.key2.as_str()), ("P1", "P2"));
    assert!(resolver.scan(CASE, &request).await.unwrap().is_empty());

    resolver.undo_rejection(CASE, "P1", "P2").await.unwrap();
    assert_eq!(resolver.scan(CASE, &request).await.unwrap().len(), 1);

    let err = resolver.undo_rejection(CASE, "P1", "P2").await.unwrap_err();
    assert!(matches!(err, CaseGraphError::NotFound(_)));
    let err = resolver.reject_pair(CASE, "P1", "ghost", "analyst").await.unwrap_err();
    assert!(matches!(err, CaseGraphError::NotFound(_)));
}

#[tokio::test]
async fn stream_emits_ordered_events() {
    let store = store_with(marco_case()).await;
    let resolver = EntityResolver::new(store);
    let events: Vec<ScanEvent> = resolver
        .scan_stream(CASE, ScanRequest::default(), CancellationToken::new())
        .collect()
        .await;

    let names: Vec<&str> = events.iter().map(ScanEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "start",
            "type_start",
            "type_complete",
            "type_start",
            "progress",
            "type_complete",
            "complete",
        ]
    );
    match events.last() {
        Some(ScanEvent::Complete { pairs, total_matches }) => {
            assert_eq!(*total_matches, 1);
            assert_eq!(pairs.len(), 1);
        }
        other => panic!("unexpected final event {other:?}"),
    }
}

#[tokio::test]
async fn invalid_threshold_ends_stream_with_error() {
    let store = store_with(marco_case()).await;
    let resolver = EntityResolver::new(store);
    let request = ScanRequest { threshold: 1.5, ..Default::default() };
    let events: Vec<ScanEvent> = resolver
        .scan_stream(CASE, request, CancellationToken::new())
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ScanEvent::Error { .. }));
}

fn crowd(n: usize) -> Vec<Node> {
    (0..n)
        .map(|i| Node::new(format!("p{i:03}"), "Person", format!("Person {i}")))
        .collect()
}

#[tokio::test]
async fn cancellation_is_observed_at_next_checkpoint() {
    let store = store_with(crowd(60)).await;
    let resolver = EntityResolver::new(store);
    let cancel = CancellationToken::new();
    let mut events = Box::pin(resolver.scan_stream(CASE, ScanRequest::default(), cancel.clone()));

    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        if matches!(event, ScanEvent::Progress { .. }) {
            cancel.cancel();
        }
        seen.push(event);
    }

    assert!(matches!(seen.last(), Some(ScanEvent::Cancelled { compared: 100 })));
    assert!(!seen.iter().any(|e| matches!(e, ScanEvent::Complete { .. })));
}

#[tokio::test]
async fn dropped_consumer_stops_the_producer() {
    let store = store_with(crowd(80)).await;
    let resolver = EntityResolver::new(store);
    let cancel = CancellationToken::new();
    let mut rx = resolver.spawn_scan(CASE, ScanRequest::default(), cancel.clone(), 1);

    assert!(matches!(rx.recv().await, Some(ScanEvent::Start { .. })));
    drop(rx);

    tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
        .await
        .expect("producer never noticed the dropped consumer");
}

#[tokio::test]
async fn merge_repoints_relationships_in_both_directions() {
    let store = store_with(vec![
        Node::new("A", "Person", "Marco"),
        Node::new("B", "Person", "Marco D."),
        Node::new("C", "Person", "Carla"),
        Node::new("D", "Person", "Dino"),
    ])
    .await;
    store
        .create_relationships(
            CASE,
            vec![Relationship::new("A", "C", "KNOWS"), Relationship::new("D", "A", "KNOWS")],
        )
        .await
        .unwrap();

    let resolver = EntityResolver::new(store.clone());
    let outcome = resolver
        .merge_value(CASE, "A", "B", json!({"name": "Marco Di Stefano", "alias": "MDS"}))
        .await
        .unwrap();

    assert_eq!(outcome.relationships_migrated, 2);
    assert_eq!(outcome.target.name, "Marco Di Stefano");
    assert_eq!(outcome.target.properties["alias"], json!("MDS"));

    let graph = store.get_full_graph(CASE, None).await.unwrap();
    assert!(!graph.keys().contains("A"));
    let edges: BTreeSet<_> = graph.relationships.iter().map(|r| r.identity()).collect();
    assert_eq!(
        edges,
        BTreeSet::from([
            ("B".to_string(), "C".to_string(), "KNOWS".to_string()),
            ("D".to_string(), "B".to_string(), "KNOWS".to_string()),
        ])
    );
}

#[tokio::test]
async fn merge_rejects_bad_requests() {
    let store = store_with(marco_case()).await;
    let resolver = EntityResolver::new(store);

    let err = resolver
        .merge(CASE, "P1", "P1", &MergeFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CaseGraphError::InvalidArgument(_)));

    let err = resolver
        .merge_value(CASE, "P1", "P2", json!("not an object"))
        .await
        .unwrap_err();
    assert!(matches!(err, CaseGraphError::InvalidArgument(_)));

    let err = resolver
        .merge("other-case", "P1", "P2", &MergeFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CaseGraphError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_merges_in_one_case_do_not_interleave() {
    let store = store_with(vec![
        Node::new("A", "Person", "A"),
        Node::new("B", "Person", "B"),
        Node::new("C", "Person", "C"),
    ])
    .await;
    let resolver = Arc::new(EntityResolver::new(store.clone()));

    let first = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.merge(CASE, "A", "C", &MergeFields::default()).await })
    };
    let second = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.merge(CASE, "B", "C", &MergeFields::default()).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let graph = store.get_full_graph(CASE, None).await.unwrap();
    assert_eq!(graph.keys(), BTreeSet::from(["C".to_string()]));
}
