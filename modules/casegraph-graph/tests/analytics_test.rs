//! Analytics over the in-memory store.

use std::sync::Arc;

use casegraph_common::{CaseGraphError, Node, Relationship};
use casegraph_graph::analytics::{betweenness, pagerank, Adjacency};
use casegraph_graph::{
    AnalysisScope, BetweennessParams, GraphAnalytics, GraphStore, InMemoryGraphStore,
    LouvainParams, PageRankParams,
};

const CASE: &str = "case-analytics";

async fn seeded_store() -> Arc<InMemoryGraphStore> {
    let store = Arc::new(InMemoryGraphStore::new());
    let people = ["alice", "bob", "carol", "dave", "erin", "frank"];
    for key in people {
        store
            .create_node(CASE, Node::new(key, "Person", key.to_uppercase()))
            .await
            .unwrap();
    }
    store
        .create_node(CASE, Node::new("acme", "Company", "Acme Ltd"))
        .await
        .unwrap();

    let edges = [
        ("alice", "bob", "KNOWS"),
        ("bob", "carol", "KNOWS"),
        ("carol", "alice", "KNOWS"),
        ("dave", "erin", "KNOWS"),
        ("erin", "frank", "KNOWS"),
        ("frank", "dave", "KNOWS"),
        ("alice", "acme", "DIRECTOR_OF"),
        ("dave", "acme", "DIRECTOR_OF"),
        ("acme", "alice", "PAID"),
        ("acme", "dave", "PAID"),
    ];
    store
        .create_relationships(
            CASE,
            edges
                .iter()
                .map(|(a, b, t)| Relationship::new(*a, *b, *t))
                .collect(),
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn pagerank_scores_sum_to_one_on_closed_graph() {
    let store = seeded_store().await;
    let graph = store.get_full_graph(CASE, None).await.unwrap();
    let adj = Adjacency::from_subgraph(&graph);
    let scores = pagerank(&adj, 0.85, 100).unwrap();
    let total: f64 = scores.iter().sum();
    assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
}

#[tokio::test]
async fn pagerank_top_n_comes_with_induced_subgraph() {
    let store = seeded_store().await;
    let analytics = GraphAnalytics::new(store);
    let params = PageRankParams { top_n: 3, ..Default::default() };
    let result = analytics.pagerank(CASE, &AnalysisScope::Full, &params).await.unwrap();

    assert_eq!(result.scores.len(), 3);
    let top: Vec<&str> = result.scores.iter().map(|s| s.key.as_str()).collect();
    // the two directors collect rank from their circles and the company
    for key in ["alice", "dave", "acme"] {
        assert!(top.contains(&key), "{key} missing from {top:?}");
    }
    assert!(result.scores.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(result.subgraph.nodes.len(), 3);
    let keys = result.subgraph.keys();
    assert!(result
        .subgraph
        .relationships
        .iter()
        .all(|r| keys.contains(&r.source_key) && keys.contains(&r.target_key)));
}

#[tokio::test]
async fn normalized_betweenness_stays_in_unit_interval() {
    let store = seeded_store().await;
    let graph = store.get_full_graph(CASE, None).await.unwrap();
    let scores = betweenness(&Adjacency::from_subgraph(&graph), true);
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));

    let analytics = GraphAnalytics::new(store);
    let result = analytics
        .betweenness(CASE, &AnalysisScope::Full, &BetweennessParams::default())
        .await
        .unwrap();
    // the company bridges the two triangles
    assert_eq!(result.scores[0].key, "acme");
}

#[tokio::test]
async fn louvain_keeps_the_circles_apart() {
    let store = seeded_store().await;
    let analytics = GraphAnalytics::new(store);
    let params = LouvainParams { seed: Some(11), ..Default::default() };
    let result = analytics
        .communities(CASE, &AnalysisScope::Full, &params)
        .await
        .unwrap();

    assert_eq!(result.assignments.len(), 7);
    let a = &result.assignments;
    assert!(a.values().all(|c| *c < result.community_count));
    assert!(result.community_count >= 2);
    assert_ne!(a["bob"], a["erin"]);
    assert!(result.modularity > 0.0);
    let members = result.members();
    assert_eq!(members.len(), result.community_count);
    assert_eq!(members.iter().map(Vec::len).sum::<usize>(), 7);
}

#[tokio::test]
async fn seed_scope_limits_the_snapshot() {
    let store = seeded_store().await;
    let analytics = GraphAnalytics::new(store);

    let induced = AnalysisScope::Seeds { keys: vec!["alice".into(), "bob".into()], depth: 0 };
    let graph = analytics.snapshot(CASE, &induced).await.unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.relationships.len(), 1);

    let expanded = AnalysisScope::Seeds { keys: vec!["bob".into()], depth: 1 };
    let graph = analytics.snapshot(CASE, &expanded).await.unwrap();
    assert_eq!(graph.keys().len(), 3);

    let too_deep = AnalysisScope::Seeds { keys: vec!["bob".into()], depth: 3 };
    let err = analytics.snapshot(CASE, &too_deep).await.unwrap_err();
    assert!(matches!(err, CaseGraphError::InvalidArgument(_)));
}

#[tokio::test]
async fn empty_and_single_node_graphs_return_empty_results() {
    let store = Arc::new(InMemoryGraphStore::new());
    store.create_node("solo", Node::new("only", "Person", "Only")).await.unwrap();
    let analytics = GraphAnalytics::new(store);

    for case in ["nobody", "solo"] {
        let ranks = analytics
            .pagerank(case, &AnalysisScope::Full, &PageRankParams::default())
            .await
            .unwrap();
        assert!(ranks.scores.is_empty());
        let communities = analytics
            .communities(case, &AnalysisScope::Full, &LouvainParams::default())
            .await
            .unwrap();
        assert_eq!(communities.community_count, 0);
    }

    let bad = PageRankParams { damping: -0.1, ..Default::default() };
    assert!(analytics.pagerank("solo", &AnalysisScope::Full, &bad).await.is_err());
}

#[tokio::test]
async fn shortest_paths_union_dedupes_edges() {
    let store = seeded_store().await;
    let analytics = GraphAnalytics::new(store);
    let seeds = vec!["bob".to_string(), "erin".to_string(), "acme".to_string()];
    let result = analytics.shortest_paths(CASE, &seeds, 5).await.unwrap();

    assert_eq!(result.pairs_total, 3);
    assert_eq!(result.pairs_connected, 3);
    let ids: Vec<_> = result.subgraph.relationships.iter().map(|r| r.identity()).collect();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(ids.len(), unique.len());
    assert!(result.subgraph.keys().contains("acme"));
}
