//! Round trip through a real Neo4j container.
//! Run with: cargo test -p casegraph-graph --features test-utils --test neo4j_store_test

#![cfg(feature = "test-utils")]

use std::collections::BTreeSet;

use serde_json::json;

use casegraph_common::{AiInsight, CaseGraphError, Node, Relationship};
use casegraph_graph::testutil::neo4j_container;
use casegraph_graph::{EntityResolver, GraphStore, MergeFields, Neo4jGraphStore};

#[tokio::test]
async fn neo4j_store_round_trip() {
    let (_container, client) = neo4j_container().await;
    let store = std::sync::Arc::new(Neo4jGraphStore::new(client));

    let mut marco = Node::new("A", "Person", "Marco").with_property("nationality", "IT");
    marco.ai_insights.push(AiInsight { text: "Likely nominee".into(), ..Default::default() });
    store.create_node("case-1", marco).await.unwrap();
    for (key, name) in [("B", "Marco D."), ("C", "Carla"), ("D", "Dino")] {
        store.create_node("case-1", Node::new(key, "Person", name)).await.unwrap();
    }
    store.create_node("case-2", Node::new("Z", "Person", "Zed")).await.unwrap();
    store
        .create_relationships(
            "case-1",
            vec![Relationship::new("A", "C", "KNOWS"), Relationship::new("D", "A", "KNOWS")],
        )
        .await
        .unwrap();

    let node = store.get_node("case-1", "A").await.unwrap();
    assert_eq!(node.properties["nationality"], json!("IT"));
    assert_eq!(node.ai_insights.len(), 1);
    assert!(matches!(
        store.get_node("case-2", "A").await.unwrap_err(),
        CaseGraphError::NotFound(_)
    ));
    assert!(store
        .create_relationships("case-2", vec![Relationship::new("Z", "A", "KNOWS")])
        .await
        .is_err());

    let expanded = store.expand("case-1", &["C".to_string()], 1).await.unwrap();
    assert_eq!(expanded.keys(), BTreeSet::from(["A".to_string(), "C".to_string()]));

    let verified = store.verify_insight("case-1", "A", 0, "analyst").await.unwrap();
    assert_eq!(verified.verified_facts.len(), 1);

    let resolver = EntityResolver::new(store.clone());
    let outcome = resolver
        .merge("case-1", "A", "B", &MergeFields::default())
        .await
        .unwrap();
    assert_eq!(outcome.relationships_migrated, 2);
    assert_eq!(outcome.target.verified_facts.len(), 1);

    let graph = store.get_full_graph("case-1", None).await.unwrap();
    let edges: BTreeSet<_> = graph.relationships.iter().map(|r| r.identity()).collect();
    assert!(edges.contains(&("B".to_string(), "C".to_string(), "KNOWS".to_string())));
    assert!(edges.contains(&("D".to_string(), "B".to_string(), "KNOWS".to_string())));

    let path = store.shortest_path("case-1", "C", "D", 4).await.unwrap().unwrap();
    assert_eq!(path.relationships.len(), 2);

    let schema = store.schema_summary("case-1").await.unwrap();
    assert_eq!(schema.labels, vec![("Person".to_string(), 3)]);
}
