use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casegraph_common::{
    normalize_pair, CaseGraphError, Node, RejectedPair, Result, SimilarityPair,
};

use super::similarity::{normalize_name, normalized_similarity, SimilarityMetric};
use crate::store::GraphStore;

/// Comparisons between progress checkpoints. Cancellation is observed at each one.
pub const PROGRESS_INTERVAL: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Restrict the scan to these types. `None` scans every non-document type.
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
    pub threshold: f64,
    pub max_results: usize,
    #[serde(default)]
    pub metric: SimilarityMetric,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            entity_types: None,
            threshold: 0.7,
            max_results: 100,
            metric: SimilarityMetric::Gestalt,
        }
    }
}

impl ScanRequest {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CaseGraphError::invalid(format!(
                "similarity threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Ordered events of a streaming scan. Serialized with an `event` tag that carries the
/// event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Start {
        total_entities: usize,
        entity_types: usize,
        total_comparisons: u64,
    },
    TypeStart {
        entity_type: String,
        entity_count: usize,
        comparisons: u64,
    },
    Progress {
        entity_type: String,
        compared: u64,
        type_comparisons: u64,
        overall_compared: u64,
        total_comparisons: u64,
        matches: usize,
    },
    TypeComplete {
        entity_type: String,
        matches: usize,
    },
    Complete {
        pairs: Vec<SimilarityPair>,
        total_matches: usize,
    },
    Cancelled {
        compared: u64,
    },
    Error {
        message: String,
    },
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::TypeStart { .. } => "type_start",
            Self::Progress { .. } => "progress",
            Self::TypeComplete { .. } => "type_complete",
            Self::Complete { .. } => "complete",
            Self::Cancelled { .. } => "cancelled",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Cancelled { .. } | Self::Error { .. }
        )
    }
}

/// Rejected pairs keyed in normalized order, so lookups ignore argument order.
#[derive(Debug, Clone, Default)]
pub struct RejectedSet {
    pairs: HashSet<(String, String)>,
}

impl RejectedSet {
    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.pairs.contains(&normalize_pair(a, b))
    }

    pub fn insert(&mut self, a: &str, b: &str) {
        self.pairs.insert(normalize_pair(a, b));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<RejectedPair> for RejectedSet {
    fn from_iter<I: IntoIterator<Item = RejectedPair>>(iter: I) -> Self {
        let mut set = Self::default();
        for pair in iter {
            set.insert(&pair.key1, &pair.key2);
        }
        set
    }
}

/// Split candidate nodes into same-type groups. Documents are never candidates.
/// Groups come out sorted by type name and members by key.
pub fn group_by_type(nodes: Vec<Node>, entity_types: Option<&[String]>) -> Vec<(String, Vec<Node>)> {
    let mut groups: BTreeMap<String, Vec<Node>> = BTreeMap::new();
    for node in nodes {
        if node.is_document() {
            continue;
        }
        if let Some(types) = entity_types {
            if !types.iter().any(|t| t.eq_ignore_ascii_case(&node.node_type)) {
                continue;
            }
        }
        groups.entry(node.node_type.clone()).or_default().push(node);
    }
    groups
        .into_iter()
        .map(|(t, mut members)| {
            members.sort_by(|a, b| a.key.cmp(&b.key));
            (t, members)
        })
        .collect()
}

fn pair_count(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}

/// Resumable pairwise comparison over one type group. `step` performs a bounded
/// number of comparisons so callers can report progress between steps.
pub struct GroupScanner {
    members: Vec<Node>,
    names: Vec<String>,
    threshold: f64,
    metric: SimilarityMetric,
    i: usize,
    j: usize,
    compared: u64,
    matches: Vec<SimilarityPair>,
}

impl GroupScanner {
    pub fn new(members: Vec<Node>, threshold: f64, metric: SimilarityMetric) -> Self {
        let names = members.iter().map(|n| normalize_name(&n.name)).collect();
        Self {
            members,
            names,
            threshold,
            metric,
            i: 0,
            j: 1,
            compared: 0,
            matches: Vec::new(),
        }
    }

    pub fn total(&self) -> u64 {
        pair_count(self.members.len())
    }

    pub fn compared(&self) -> u64 {
        self.compared
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn is_done(&self) -> bool {
        self.i + 1 >= self.members.len()
    }

    /// Compare up to `budget` pairs. Returns how many comparisons ran.
    pub fn step(&mut self, budget: u64, rejected: &RejectedSet) -> u64 {
        let mut done = 0;
        while done < budget && !self.is_done() {
            let (a, b) = (&self.members[self.i], &self.members[self.j]);
            if !rejected.contains(&a.key, &b.key) {
                let score = normalized_similarity(&self.names[self.i], &self.names[self.j], self.metric);
                if score >= self.threshold {
                    self.matches.push(SimilarityPair {
                        entity1: a.clone(),
                        entity2: b.clone(),
                        similarity: score,
                    });
                }
            }
            done += 1;
            self.compared += 1;
            self.j += 1;
            if self.j >= self.members.len() {
                self.i += 1;
                self.j = self.i + 1;
            }
        }
        done
    }

    pub fn into_matches(self) -> Vec<SimilarityPair> {
        self.matches
    }
}

/// Highest similarity first, ties broken by key pair for a stable order.
pub fn rank_pairs(pairs: &mut Vec<SimilarityPair>, max_results: usize) {
    pairs.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.entity1.key.cmp(&b.entity1.key))
            .then_with(|| a.entity2.key.cmp(&b.entity2.key))
    });
    pairs.truncate(max_results);
}

/// Synchronous scan over an already loaded node set.
pub fn find_similar_pairs(
    nodes: Vec<Node>,
    request: &ScanRequest,
    rejected: &RejectedSet,
) -> Result<Vec<SimilarityPair>> {
    request.validate()?;
    let mut pairs = Vec::new();
    for (_, members) in group_by_type(nodes, request.entity_types.as_deref()) {
        let mut scanner = GroupScanner::new(members, request.threshold, request.metric);
        scanner.step(u64::MAX, rejected);
        pairs.extend(scanner.into_matches());
    }
    rank_pairs(&mut pairs, request.max_results);
    Ok(pairs)
}

pub(crate) async fn load_scan_inputs(
    store: &dyn GraphStore,
    case_id: &str,
) -> Result<(Vec<Node>, RejectedSet)> {
    let graph = store.get_full_graph(case_id, None).await?;
    let rejected: RejectedSet = store.rejected_pairs(case_id).await?.into_iter().collect();
    Ok((graph.nodes, rejected))
}

/// Streaming scan. The stream always ends with exactly one terminal event
/// (`complete`, `cancelled` or `error`). Dropping the stream stops the scan at its
/// next checkpoint.
pub fn scan_events(
    store: Arc<dyn GraphStore>,
    case_id: String,
    request: ScanRequest,
    cancel: CancellationToken,
) -> impl Stream<Item = ScanEvent> + Send + 'static {
    stream! {
        if let Err(e) = request.validate() {
            yield ScanEvent::Error { message: e.to_string() };
            return;
        }

        let (nodes, rejected) = match load_scan_inputs(store.as_ref(), &case_id).await {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(case_id = case_id.as_str(), error = %e, "Similarity scan failed to load nodes");
                yield ScanEvent::Error { message: e.to_string() };
                return;
            }
        };

        let groups = group_by_type(nodes, request.entity_types.as_deref());
        let total_entities: usize = groups.iter().map(|(_, m)| m.len()).sum();
        let total_comparisons: u64 = groups.iter().map(|(_, m)| pair_count(m.len())).sum();
        info!(
            case_id = case_id.as_str(),
            total_entities,
            total_comparisons,
            rejected = rejected.len(),
            "Similarity scan started"
        );
        yield ScanEvent::Start {
            total_entities,
            entity_types: groups.len(),
            total_comparisons,
        };

        let mut overall_compared = 0u64;
        let mut pairs = Vec::new();

        for (entity_type, members) in groups {
            if cancel.is_cancelled() {
                info!(case_id = case_id.as_str(), overall_compared, "Similarity scan cancelled");
                yield ScanEvent::Cancelled { compared: overall_compared };
                return;
            }

            let mut scanner = GroupScanner::new(members, request.threshold, request.metric);
            let type_comparisons = scanner.total();
            yield ScanEvent::TypeStart {
                entity_type: entity_type.clone(),
                entity_count: scanner.members.len(),
                comparisons: type_comparisons,
            };

            while !scanner.is_done() {
                overall_compared += scanner.step(PROGRESS_INTERVAL, &rejected);
                yield ScanEvent::Progress {
                    entity_type: entity_type.clone(),
                    compared: scanner.compared(),
                    type_comparisons,
                    overall_compared,
                    total_comparisons,
                    matches: pairs.len() + scanner.match_count(),
                };
                if cancel.is_cancelled() {
                    info!(case_id = case_id.as_str(), overall_compared, "Similarity scan cancelled");
                    yield ScanEvent::Cancelled { compared: overall_compared };
                    return;
                }
                tokio::task::yield_now().await;
            }

            let matches = scanner.match_count();
            debug!(entity_type = entity_type.as_str(), matches, "Type group scanned");
            yield ScanEvent::TypeComplete { entity_type, matches };
            pairs.extend(scanner.into_matches());
        }

        let total_matches = pairs.len();
        rank_pairs(&mut pairs, request.max_results);
        info!(
            case_id = case_id.as_str(),
            total_matches,
            returned = pairs.len(),
            "Similarity scan complete"
        );
        yield ScanEvent::Complete { pairs, total_matches };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(key: &str, name: &str) -> Node {
        Node::new(key, "Person", name)
    }

    #[test]
    fn scanner_steps_respect_budget() {
        let members: Vec<Node> = (0..20).map(|i| person(&format!("p{i:02}"), "Same")).collect();
        let mut scanner = GroupScanner::new(members, 0.5, SimilarityMetric::Gestalt);
        assert_eq!(scanner.total(), 190);
        let rejected = RejectedSet::default();
        assert_eq!(scanner.step(100, &rejected), 100);
        assert!(!scanner.is_done());
        assert_eq!(scanner.step(100, &rejected), 90);
        assert!(scanner.is_done());
        assert_eq!(scanner.match_count(), 190);
    }

    #[test]
    fn single_member_group_has_nothing_to_compare() {
        let mut scanner = GroupScanner::new(vec![person("a", "A")], 0.0, SimilarityMetric::Gestalt);
        assert!(scanner.is_done());
        assert_eq!(scanner.step(10, &RejectedSet::default()), 0);
    }

    #[test]
    fn documents_are_excluded_from_groups() {
        let nodes = vec![
            person("a", "A"),
            Node::new("d", "Document", "A"),
            Node::new("c", "Company", "A"),
        ];
        let groups = group_by_type(nodes, None);
        let types: Vec<&str> = groups.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(types, vec!["Company", "Person"]);
    }

    #[test]
    fn rejected_lookup_ignores_order() {
        let mut set = RejectedSet::default();
        set.insert("p2", "p1");
        assert!(set.contains("p1", "p2"));
        assert!(set.contains("p2", "p1"));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let request = ScanRequest { threshold: 1.5, ..Default::default() };
        let err = find_similar_pairs(vec![], &request, &RejectedSet::default()).unwrap_err();
        assert!(matches!(err, CaseGraphError::InvalidArgument(_)));
    }

    #[test]
    fn event_names_match_protocol() {
        let ev = ScanEvent::TypeComplete { entity_type: "Person".into(), matches: 2 };
        assert_eq!(ev.name(), "type_complete");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "type_complete");
        assert!(!ev.is_terminal());
        assert!(ScanEvent::Cancelled { compared: 0 }.is_terminal());
    }
}
