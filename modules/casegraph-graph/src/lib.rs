pub mod analytics;
pub mod client;
pub mod memory;
pub mod migrate;
pub mod neo4j;
pub mod resolution;
pub mod store;
pub mod vector;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use analytics::{
    AnalysisScope, BetweennessParams, CommunityResult, GraphAnalytics, LouvainParams,
    PageRankParams, PathsResult, RankingResult, ScoredNode,
};
pub use client::GraphClient;
pub use memory::InMemoryGraphStore;
pub use migrate::migrate;
pub use neo4j::Neo4jGraphStore;
pub use resolution::{
    EntityResolver, MergeFields, MergeOutcome, MergePlan, ScanEvent, ScanRequest,
    SimilarityMetric,
};
pub use store::{GraphStore, QueryRow};
pub use vector::Neo4jVectorIndex;
