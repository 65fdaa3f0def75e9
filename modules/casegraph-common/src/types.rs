use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CaseGraphError, Result};

/// Label of source-document nodes. Documents take part in the graph but are never
/// candidates for entity resolution.
pub const DOCUMENT_TYPE: &str = "Document";

/// Property names owned by the typed fields of [`Node`]. Anything else on a stored
/// node is an extension property.
pub const RESERVED_PROPERTIES: &[&str] = &[
    "key",
    "case_id",
    "name",
    "summary",
    "notes",
    "verified_facts",
    "ai_insights",
    "embedding",
];

// --- Node ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VerifiedFact {
    pub text: String,
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub source_doc: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub importance: Option<u8>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub verified_by: Option<String>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AiInsight {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl AiInsight {
    /// Promote an insight into a verified fact attributed to `verifier`.
    pub fn into_verified(self, verifier: &str, at: DateTime<Utc>) -> VerifiedFact {
        VerifiedFact {
            text: self.text,
            quote: None,
            source_doc: None,
            page: None,
            importance: None,
            pinned: false,
            verified_by: Some(verifier.to_string()),
            verified_at: Some(at),
        }
    }
}

/// An entity in a case graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Node {
    pub key: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub verified_facts: Vec<VerifiedFact>,
    #[serde(default)]
    pub ai_insights: Vec<AiInsight>,
    #[serde(default)]
    pub case_id: String,
}

impl Node {
    pub fn new(key: impl Into<String>, node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            node_type: node_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_document(&self) -> bool {
        self.node_type.eq_ignore_ascii_case(DOCUMENT_TYPE)
    }

    /// Case-insensitive substring match over name, key, summary and notes.
    pub fn matches_text(&self, needle_lower: &str) -> bool {
        [&self.name, &self.key, &self.summary, &self.notes]
            .iter()
            .any(|field| field.to_lowercase().contains(needle_lower))
    }

    /// Flatten into the property map written to the graph database. Structured lists
    /// are JSON-encoded because graph properties cannot hold nested maps.
    pub fn to_property_map(&self) -> Result<BTreeMap<String, Value>> {
        let mut props: BTreeMap<String, Value> = self
            .properties
            .iter()
            .filter(|(k, _)| !RESERVED_PROPERTIES.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        props.insert("key".into(), Value::String(self.key.clone()));
        props.insert("case_id".into(), Value::String(self.case_id.clone()));
        props.insert("name".into(), Value::String(self.name.clone()));
        props.insert("summary".into(), Value::String(self.summary.clone()));
        props.insert("notes".into(), Value::String(self.notes.clone()));
        props.insert(
            "verified_facts".into(),
            Value::String(serde_json::to_string(&self.verified_facts)?),
        );
        props.insert(
            "ai_insights".into(),
            Value::String(serde_json::to_string(&self.ai_insights)?),
        );
        Ok(props)
    }

    /// Rebuild a node from a stored label and property map. Malformed fact or insight
    /// payloads are treated as empty lists.
    pub fn from_property_map(label: &str, mut props: HashMap<String, Value>) -> Self {
        let mut take_string = |name: &str| match props.remove(name) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let key = take_string("key");
        let case_id = take_string("case_id");
        let name = take_string("name");
        let summary = take_string("summary");
        let notes = take_string("notes");
        let verified_facts = decode_list(props.remove("verified_facts"));
        let ai_insights = decode_list(props.remove("ai_insights"));
        props.remove("embedding");

        Self {
            key,
            node_type: label.to_string(),
            name,
            summary,
            notes,
            properties: props.into_iter().collect(),
            verified_facts,
            ai_insights,
            case_id,
        }
    }

    /// Date used by date-range filtering, read from the `date` extension property.
    pub fn date(&self) -> Option<NaiveDate> {
        let raw = self.properties.get("date")?.as_str()?;
        let day = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }
}

fn decode_list<T: for<'de> Deserialize<'de>>(value: Option<Value>) -> Vec<T> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => serde_json::from_str(&s).unwrap_or_default(),
        Some(v @ Value::Array(_)) => serde_json::from_value(v).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Partial update applied by `update_node`. A `Null` property value removes the property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl NodeUpdate {
    pub fn apply_to(&self, node: &mut Node) {
        if let Some(name) = &self.name {
            node.name = name.clone();
        }
        if let Some(summary) = &self.summary {
            node.summary = summary.clone();
        }
        if let Some(notes) = &self.notes {
            node.notes = notes.clone();
        }
        for (k, v) in &self.properties {
            if RESERVED_PROPERTIES.contains(&k.as_str()) {
                continue;
            }
            if v.is_null() {
                node.properties.remove(k);
            } else {
                node.properties.insert(k.clone(), v.clone());
            }
        }
    }
}

// --- Relationship ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Relationship {
    pub source_key: String,
    pub target_key: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub case_id: String,
}

impl Relationship {
    pub fn new(
        source_key: impl Into<String>,
        target_key: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            target_key: target_key.into(),
            rel_type: rel_type.into(),
            ..Default::default()
        }
    }

    /// Identity used for edge de-duplication.
    pub fn identity(&self) -> (String, String, String) {
        (
            self.source_key.clone(),
            self.target_key.clone(),
            self.rel_type.clone(),
        )
    }

    pub fn touches(&self, key: &str) -> bool {
        self.source_key == key || self.target_key == key
    }
}

/// Nodes plus the relationships among them, returned by every read that selects a
/// region of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.key.clone()).collect()
    }

    /// Restrict to `keys`, keeping only relationships whose endpoints both survive.
    pub fn restricted_to(&self, keys: &BTreeSet<String>) -> Subgraph {
        Subgraph {
            nodes: self
                .nodes
                .iter()
                .filter(|n| keys.contains(&n.key))
                .cloned()
                .collect(),
            relationships: self
                .relationships
                .iter()
                .filter(|r| keys.contains(&r.source_key) && keys.contains(&r.target_key))
                .cloned()
                .collect(),
        }
    }

    /// Union with another subgraph, de-duplicating nodes by key and edges by
    /// `(source, target, type)`.
    pub fn absorb(&mut self, other: Subgraph) {
        let mut seen_nodes = self.keys();
        let mut seen_edges: BTreeSet<(String, String, String)> =
            self.relationships.iter().map(Relationship::identity).collect();
        for node in other.nodes {
            if seen_nodes.insert(node.key.clone()) {
                self.nodes.push(node);
            }
        }
        for rel in other.relationships {
            if seen_edges.insert(rel.identity()) {
                self.relationships.push(rel);
            }
        }
    }
}

/// Inclusive date window for `get_full_graph`. Nodes without a parseable `date`
/// property always pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn admits(&self, node: &Node) -> bool {
        let Some(date) = node.date() else {
            return true;
        };
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// Apply to a whole graph: drop out-of-range nodes and their relationships.
    pub fn filter(&self, graph: Subgraph) -> Subgraph {
        let keys: BTreeSet<String> = graph
            .nodes
            .iter()
            .filter(|n| self.admits(n))
            .map(|n| n.key.clone())
            .collect();
        graph.restricted_to(&keys)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCounts {
    pub nodes_deleted: u64,
    pub relationships_deleted: u64,
}

/// Label counts and relationship types of one case, handed to query generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub labels: Vec<(String, u64)>,
    pub relationship_types: Vec<String>,
}

impl fmt::Display for SchemaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node labels (count):")?;
        for (label, count) in &self.labels {
            writeln!(f, "- {label} ({count})")?;
        }
        writeln!(f, "Relationship types:")?;
        for rel in &self.relationship_types {
            writeln!(f, "- {rel}")?;
        }
        writeln!(
            f,
            "Every node has properties: key, name, summary, notes, case_id."
        )
    }
}

// --- Entity resolution ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub entity1: Node,
    pub entity2: Node,
    pub similarity: f64,
}

/// A pair an investigator marked as "not a duplicate". Keys are stored in sorted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedPair {
    pub case_id: String,
    pub key1: String,
    pub key2: String,
    pub rejected_by: String,
    pub rejected_at: DateTime<Utc>,
}

impl RejectedPair {
    pub fn new(case_id: &str, a: &str, b: &str, rejected_by: &str) -> Result<Self> {
        if a == b {
            return Err(CaseGraphError::invalid("cannot reject a pair of identical keys"));
        }
        let (key1, key2) = normalize_pair(a, b);
        Ok(Self {
            case_id: case_id.to_string(),
            key1,
            key2,
            rejected_by: rejected_by.to_string(),
            rejected_at: Utc::now(),
        })
    }
}

pub fn normalize_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

// --- Retrieval ---

/// A passage of an ingested document, as returned by the vector service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub doc_name: String,
    #[serde(default)]
    pub page_start: Option<u32>,
    #[serde(default)]
    pub page_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Build from a vector hit's metadata (`text`, `doc_name`, `page_start`, `page_end`).
    pub fn from_hit(hit: &VectorHit) -> Self {
        let text_of = |k: &str| {
            hit.metadata
                .get(k)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let page_of = |k: &str| hit.metadata.get(k).and_then(Value::as_u64).map(|p| p as u32);
        Self {
            id: hit.id.clone(),
            text: text_of("text"),
            doc_name: text_of("doc_name"),
            page_start: page_of("page_start"),
            page_end: page_of("page_end"),
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    /// Lower is closer.
    pub distance: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Semantic,
    Structural,
    Hybrid,
}

impl QuestionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "semantic" => Some(Self::Semantic),
            "structural" => Some(Self::Structural),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic"),
            Self::Structural => write!(f, "structural"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Chunk,
    Entity,
}

/// A retrieval candidate handed to an LLM scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub kind: CandidateKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub id: String,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_map_round_trip_keeps_typed_fields_apart() {
        let mut node = Node::new("p1", "Person", "Marco")
            .with_summary("Director of Acme")
            .with_property("nationality", "IT");
        node.case_id = "case-1".into();
        node.verified_facts.push(VerifiedFact {
            text: "Signed the lease".into(),
            pinned: true,
            ..Default::default()
        });

        let props: HashMap<String, Value> = node.to_property_map().unwrap().into_iter().collect();
        assert!(props["verified_facts"].is_string());

        let back = Node::from_property_map("Person", props);
        assert_eq!(back, node);
    }

    #[test]
    fn reserved_properties_never_leak_into_extensions() {
        let mut props = HashMap::new();
        props.insert("key".to_string(), json!("k"));
        props.insert("embedding".to_string(), json!([0.1, 0.2]));
        props.insert("amount".to_string(), json!(1200));
        let node = Node::from_property_map("Transaction", props);
        assert_eq!(node.properties.len(), 1);
        assert_eq!(node.properties["amount"], json!(1200));
    }

    #[test]
    fn malformed_fact_payload_decodes_as_empty() {
        let mut props = HashMap::new();
        props.insert("verified_facts".to_string(), json!("not json"));
        let node = Node::from_property_map("Person", props);
        assert!(node.verified_facts.is_empty());
    }

    #[test]
    fn date_range_keeps_undated_nodes() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1),
            end: NaiveDate::from_ymd_opt(2024, 12, 31),
        };
        let undated = Node::new("a", "Person", "A");
        let inside = Node::new("b", "Transaction", "B").with_property("date", "2024-06-01");
        let outside = Node::new("c", "Transaction", "C").with_property("date", "2023-06-01T10:00:00");
        assert!(range.admits(&undated));
        assert!(range.admits(&inside));
        assert!(!range.admits(&outside));
    }

    #[test]
    fn node_update_removes_null_properties() {
        let mut node = Node::new("a", "Person", "A").with_property("alias", "Al");
        let update = NodeUpdate {
            name: Some("Alan".into()),
            properties: BTreeMap::from([
                ("alias".to_string(), Value::Null),
                ("key".to_string(), json!("hijack")),
            ]),
            ..Default::default()
        };
        update.apply_to(&mut node);
        assert_eq!(node.name, "Alan");
        assert_eq!(node.key, "a");
        assert!(node.properties.is_empty());
    }

    #[test]
    fn rejected_pair_is_normalized() {
        let pair = RejectedPair::new("c", "zeta", "alpha", "analyst").unwrap();
        assert_eq!((pair.key1.as_str(), pair.key2.as_str()), ("alpha", "zeta"));
        assert!(RejectedPair::new("c", "a", "a", "analyst").is_err());
    }

    #[test]
    fn absorb_deduplicates_edges_by_identity() {
        let mut g = Subgraph {
            nodes: vec![Node::new("a", "X", "A"), Node::new("b", "X", "B")],
            relationships: vec![Relationship::new("a", "b", "KNOWS")],
        };
        g.absorb(Subgraph {
            nodes: vec![Node::new("b", "X", "B"), Node::new("c", "X", "C")],
            relationships: vec![
                Relationship::new("a", "b", "KNOWS"),
                Relationship::new("b", "c", "KNOWS"),
            ],
        });
        assert_eq!(g.nodes.len(), 3);
        assert_eq!(g.relationships.len(), 2);
    }

    #[test]
    fn question_kind_parses_loosely() {
        assert_eq!(QuestionKind::parse(" Structural\n"), Some(QuestionKind::Structural));
        assert_eq!(QuestionKind::parse("maybe"), None);
    }
}
