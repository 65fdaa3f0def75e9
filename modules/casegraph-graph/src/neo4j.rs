use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType, Query, Row};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use casegraph_common::{
    CaseGraphError, DateRange, DeletionCounts, Node, NodeUpdate, RejectedPair, Relationship,
    Result, SchemaSummary, Subgraph,
};

use crate::client::{db_error, GraphClient};
use crate::resolution::MergePlan;
use crate::store::{
    validate_depth, validate_identifier, GraphStore, QueryRow, MAX_EXPAND_DEPTH,
    MAX_NEIGHBOUR_DEPTH,
};

/// Columns every node-returning query projects. The embedding is nulled out so vectors
/// never travel back over the wire.
const NODE_COLUMNS: &str =
    "[l IN labels(n) WHERE l <> 'Entity'][0] AS label, n {.*, embedding: null} AS props";

const REL_COLUMNS: &str =
    "a.key AS source, b.key AS target, type(r) AS rel_type, properties(r) AS props";

/// Graph store backed by Neo4j. Entity nodes carry the `Entity` label plus their type
/// label; every node and relationship carries `case_id`.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    client: GraphClient,
}

impl Neo4jGraphStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn rows(&self, q: Query) -> Result<Vec<Row>> {
        let mut stream = self.client.graph.execute(q).await.map_err(db_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(db_error)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn run(&self, q: Query) -> Result<()> {
        self.client.graph.run(q).await.map_err(db_error)
    }

    async fn fetch_nodes(&self, q: Query) -> Result<Vec<Node>> {
        self.rows(q).await?.iter().map(node_from_row).collect()
    }

    async fn fetch_relationships(&self, q: Query) -> Result<Vec<Relationship>> {
        self.rows(q).await?.iter().map(relationship_from_row).collect()
    }

    async fn existing_keys(&self, case_id: &str, keys: &[String]) -> Result<BTreeSet<String>> {
        let q = query(
            "MATCH (n:Entity {case_id: $case_id})
             WHERE n.key IN $keys
             RETURN collect(n.key) AS found",
        )
        .param("case_id", case_id)
        .param("keys", keys.to_vec());
        let rows = self.rows(q).await?;
        let found: Vec<String> = match rows.first() {
            Some(row) => field(row, "found")?,
            None => Vec::new(),
        };
        Ok(found.into_iter().collect())
    }

    /// Keys reached from each seed within `depth` hops through same-case entities.
    async fn reachable_keys(&self, case_id: &str, seeds: &[String], depth: u32) -> Result<BTreeSet<String>> {
        let cypher = format!(
            "MATCH (s:Entity {{case_id: $case_id}})
             WHERE s.key IN $keys
             OPTIONAL MATCH p = (s)-[*1..{depth}]-(m:Entity)
             WHERE all(x IN nodes(p) WHERE x:Entity AND x.case_id = $case_id)
             RETURN s.key AS seed, collect(DISTINCT m.key) AS reached"
        );
        let q = query(&cypher)
            .param("case_id", case_id)
            .param("keys", seeds.to_vec());

        let mut keys = BTreeSet::new();
        for row in self.rows(q).await? {
            keys.insert(field::<String>(&row, "seed")?);
            let reached: Vec<String> = field(&row, "reached")?;
            keys.extend(reached);
        }
        Ok(keys)
    }

    async fn write_facts(&self, case_id: &str, node: &Node) -> Result<()> {
        let q = query(
            "MATCH (n:Entity {case_id: $case_id, key: $key})
             SET n.verified_facts = $facts, n.ai_insights = $insights",
        )
        .param("case_id", case_id)
        .param("key", node.key.as_str())
        .param("facts", serde_json::to_string(&node.verified_facts)?)
        .param("insights", serde_json::to_string(&node.ai_insights)?);
        self.run(q).await
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn get_full_graph(&self, case_id: &str, date_range: Option<DateRange>) -> Result<Subgraph> {
        let nodes = self
            .fetch_nodes(
                query(&format!(
                    "MATCH (n:Entity {{case_id: $case_id}}) RETURN {NODE_COLUMNS}"
                ))
                .param("case_id", case_id),
            )
            .await?;
        let relationships = self
            .fetch_relationships(
                query(&format!(
                    "MATCH (a:Entity {{case_id: $case_id}})-[r]->(b:Entity {{case_id: $case_id}})
                     RETURN {REL_COLUMNS}"
                ))
                .param("case_id", case_id),
            )
            .await?;

        let graph = Subgraph { nodes, relationships };
        debug!(
            case_id,
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Loaded case graph"
        );
        Ok(match date_range {
            Some(range) => range.filter(graph),
            None => graph,
        })
    }

    async fn get_node(&self, case_id: &str, key: &str) -> Result<Node> {
        let q = query(&format!(
            "MATCH (n:Entity {{case_id: $case_id, key: $key}}) RETURN {NODE_COLUMNS}"
        ))
        .param("case_id", case_id)
        .param("key", key);
        self.fetch_nodes(q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CaseGraphError::node_not_found(key))
    }

    async fn get_neighbours(&self, case_id: &str, key: &str, depth: u32) -> Result<Subgraph> {
        validate_depth(depth, MAX_NEIGHBOUR_DEPTH)?;
        let keys = self.reachable_keys(case_id, &[key.to_string()], depth).await?;
        if !keys.contains(key) {
            return Err(CaseGraphError::node_not_found(key));
        }
        let keys: Vec<String> = keys.into_iter().collect();
        self.induced_subgraph(case_id, &keys).await
    }

    async fn expand(&self, case_id: &str, keys: &[String], depth: u32) -> Result<Subgraph> {
        validate_depth(depth, MAX_EXPAND_DEPTH)?;
        if keys.is_empty() {
            return Ok(Subgraph::default());
        }
        let reached: Vec<String> = self
            .reachable_keys(case_id, keys, depth)
            .await?
            .into_iter()
            .collect();
        self.induced_subgraph(case_id, &reached).await
    }

    async fn induced_subgraph(&self, case_id: &str, keys: &[String]) -> Result<Subgraph> {
        if keys.is_empty() {
            return Ok(Subgraph::default());
        }
        let nodes = self
            .fetch_nodes(
                query(&format!(
                    "MATCH (n:Entity {{case_id: $case_id}})
                     WHERE n.key IN $keys
                     RETURN {NODE_COLUMNS}"
                ))
                .param("case_id", case_id)
                .param("keys", keys.to_vec()),
            )
            .await?;
        let relationships = self
            .fetch_relationships(
                query(&format!(
                    "MATCH (a:Entity {{case_id: $case_id}})-[r]->(b:Entity {{case_id: $case_id}})
                     WHERE a.key IN $keys AND b.key IN $keys
                     RETURN {REL_COLUMNS}"
                ))
                .param("case_id", case_id)
                .param("keys", keys.to_vec()),
            )
            .await?;
        Ok(Subgraph { nodes, relationships })
    }

    async fn search(&self, case_id: &str, text: &str, limit: usize) -> Result<Vec<Node>> {
        let q = query(&format!(
            "MATCH (n:Entity {{case_id: $case_id}})
             WHERE toLower(coalesce(n.name, '')) CONTAINS $needle
                OR toLower(n.key) CONTAINS $needle
                OR toLower(coalesce(n.summary, '')) CONTAINS $needle
                OR toLower(coalesce(n.notes, '')) CONTAINS $needle
             RETURN {NODE_COLUMNS}
             ORDER BY n.key
             LIMIT $limit"
        ))
        .param("case_id", case_id)
        .param("needle", text.trim().to_lowercase())
        .param("limit", limit as i64);
        self.fetch_nodes(q).await
    }

    async fn create_node(&self, case_id: &str, mut node: Node) -> Result<Node> {
        validate_identifier("node type", &node.node_type)?;
        if node.key.trim().is_empty() {
            return Err(CaseGraphError::invalid("node key must not be empty"));
        }
        if !self.existing_keys(case_id, &[node.key.clone()]).await?.is_empty() {
            return Err(CaseGraphError::invalid(format!(
                "node '{}' already exists",
                node.key
            )));
        }

        node.case_id = case_id.to_string();
        let cypher = format!("CREATE (n:Entity:{}) SET n = $props", node.node_type);
        let q = query(&cypher).param("props", property_map(&node.to_property_map()?));
        self.run(q).await?;
        info!(case_id, key = node.key.as_str(), node_type = node.node_type.as_str(), "Node created");
        Ok(node)
    }

    async fn update_node(&self, case_id: &str, key: &str, update: &NodeUpdate) -> Result<Node> {
        let before = self.get_node(case_id, key).await?;
        let mut after = before.clone();
        update.apply_to(&mut after);

        let q = query(
            "MATCH (n:Entity {case_id: $case_id, key: $key})
             SET n += $props",
        )
        .param("case_id", case_id)
        .param("key", key)
        .param("props", update_map(&before, &after)?);
        self.run(q).await?;
        Ok(after)
    }

    async fn create_relationships(&self, case_id: &str, rels: Vec<Relationship>) -> Result<usize> {
        for rel in &rels {
            validate_identifier("relationship type", &rel.rel_type)?;
        }
        let endpoints: Vec<String> = rels
            .iter()
            .flat_map(|r| [r.source_key.clone(), r.target_key.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let found = self.existing_keys(case_id, &endpoints).await?;
        if let Some(missing) = endpoints.iter().find(|k| !found.contains(*k)) {
            return Err(CaseGraphError::node_not_found(missing));
        }

        let mut txn = self.client.graph.start_txn().await.map_err(db_error)?;
        let queries: Vec<Query> = rels
            .iter()
            .map(|rel| {
                let mut props = rel.properties.clone();
                props.insert("case_id".into(), Value::String(case_id.to_string()));
                query(&format!(
                    "MATCH (a:Entity {{case_id: $case_id, key: $source}}),
                           (b:Entity {{case_id: $case_id, key: $target}})
                     CREATE (a)-[r:{}]->(b)
                     SET r = $props",
                    rel.rel_type
                ))
                .param("case_id", case_id)
                .param("source", rel.source_key.as_str())
                .param("target", rel.target_key.as_str())
                .param("props", property_map(&props))
            })
            .collect();
        if let Err(e) = txn.run_queries(queries).await {
            let _ = txn.rollback().await;
            return Err(db_error(e));
        }
        txn.commit().await.map_err(db_error)?;
        Ok(rels.len())
    }

    async fn delete_node(&self, case_id: &str, key: &str) -> Result<DeletionCounts> {
        let q = query(
            "MATCH (n:Entity {case_id: $case_id, key: $key})
             OPTIONAL MATCH (n)-[r]-()
             WITH n, count(DISTINCT r) AS rels
             DETACH DELETE n
             RETURN rels",
        )
        .param("case_id", case_id)
        .param("key", key);
        let rows = self.rows(q).await?;
        let row = rows.first().ok_or_else(|| CaseGraphError::node_not_found(key))?;
        let rels: i64 = field(row, "rels")?;
        info!(case_id, key, relationships = rels, "Node deleted");
        Ok(DeletionCounts {
            nodes_deleted: 1,
            relationships_deleted: rels.max(0) as u64,
        })
    }

    async fn pin_fact(&self, case_id: &str, key: &str, fact_index: usize, pinned: bool) -> Result<Node> {
        let mut node = self.get_node(case_id, key).await?;
        let fact = node.verified_facts.get_mut(fact_index).ok_or_else(|| {
            CaseGraphError::not_found(format!("fact {fact_index} not found on node '{key}'"))
        })?;
        fact.pinned = pinned;
        self.write_facts(case_id, &node).await?;
        Ok(node)
    }

    async fn verify_insight(
        &self,
        case_id: &str,
        key: &str,
        insight_index: usize,
        verifier: &str,
    ) -> Result<Node> {
        let mut node = self.get_node(case_id, key).await?;
        if insight_index >= node.ai_insights.len() {
            return Err(CaseGraphError::not_found(format!(
                "insight {insight_index} not found on node '{key}'"
            )));
        }
        let insight = node.ai_insights.remove(insight_index);
        node.verified_facts.push(insight.into_verified(verifier, Utc::now()));
        self.write_facts(case_id, &node).await?;
        info!(case_id, key, verifier, "Insight verified");
        Ok(node)
    }

    async fn shortest_path(
        &self,
        case_id: &str,
        from: &str,
        to: &str,
        max_depth: u32,
    ) -> Result<Option<Subgraph>> {
        if from == to {
            let graph = self.induced_subgraph(case_id, &[from.to_string()]).await?;
            return Ok((!graph.is_empty()).then_some(graph));
        }

        let cypher = format!(
            "MATCH (a:Entity {{case_id: $case_id, key: $from}}),
                   (b:Entity {{case_id: $case_id, key: $to}})
             MATCH p = shortestPath((a)-[*..{max_depth}]-(b))
             WHERE all(x IN nodes(p) WHERE x:Entity AND x.case_id = $case_id)
             RETURN [x IN nodes(p) | x.key] AS keys,
                    [r IN relationships(p) | {{source: startNode(r).key, target: endNode(r).key,
                                               rel_type: type(r), props: properties(r)}}] AS rels"
        );
        let q = query(&cypher)
            .param("case_id", case_id)
            .param("from", from)
            .param("to", to);
        let rows = self.rows(q).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let keys: Vec<String> = field(row, "keys")?;
        let steps: Vec<PathStep> = field(row, "rels")?;
        let mut path = self.induced_subgraph(case_id, &keys).await?;
        path.relationships = steps
            .into_iter()
            .map(|s| relationship(s.source, s.target, s.rel_type, s.props))
            .collect();
        Ok(Some(path))
    }

    async fn schema_summary(&self, case_id: &str) -> Result<SchemaSummary> {
        let label_rows = self
            .rows(
                query(
                    "MATCH (n:Entity {case_id: $case_id})
                     UNWIND [l IN labels(n) WHERE l <> 'Entity'] AS label
                     RETURN label, count(*) AS count
                     ORDER BY count DESC, label",
                )
                .param("case_id", case_id),
            )
            .await?;
        let mut labels = Vec::with_capacity(label_rows.len());
        for row in &label_rows {
            let label: String = field(row, "label")?;
            let count: i64 = field(row, "count")?;
            labels.push((label, count.max(0) as u64));
        }

        let type_rows = self
            .rows(
                query(
                    "MATCH (:Entity {case_id: $case_id})-[r]->(:Entity {case_id: $case_id})
                     RETURN DISTINCT type(r) AS rel_type
                     ORDER BY rel_type",
                )
                .param("case_id", case_id),
            )
            .await?;
        let relationship_types = type_rows
            .iter()
            .map(|row| field::<String>(row, "rel_type"))
            .collect::<Result<Vec<_>>>()?;

        Ok(SchemaSummary {
            labels,
            relationship_types,
        })
    }

    async fn run_query(&self, text: &str, params: &BTreeMap<String, Value>) -> Result<Vec<QueryRow>> {
        let mut q = query(text);
        for (name, value) in params {
            q = q.param(name, json_to_bolt(value));
        }
        self.rows(q)
            .await?
            .iter()
            .map(|row| {
                row.to::<QueryRow>()
                    .map_err(|e| CaseGraphError::Internal(format!("unreadable query row: {e}")))
            })
            .collect()
    }

    async fn apply_merge(&self, case_id: &str, plan: &MergePlan) -> Result<Node> {
        let mut queries = Vec::new();

        for rel in &plan.property_merges {
            validate_identifier("relationship type", &rel.rel_type)?;
            queries.push(
                query(&format!(
                    "MATCH (a:Entity {{case_id: $case_id, key: $source}})-[r:{}]->(b:Entity {{case_id: $case_id, key: $target}})
                     SET r += $props",
                    rel.rel_type
                ))
                .param("case_id", case_id)
                .param("source", rel.source_key.as_str())
                .param("target", rel.target_key.as_str())
                .param("props", property_map(&rel.properties)),
            );
        }

        for rel in &plan.new_relationships {
            validate_identifier("relationship type", &rel.rel_type)?;
            let mut props = rel.properties.clone();
            props.insert("case_id".into(), Value::String(case_id.to_string()));
            queries.push(
                query(&format!(
                    "MATCH (a:Entity {{case_id: $case_id, key: $source}}),
                           (b:Entity {{case_id: $case_id, key: $target}})
                     CREATE (a)-[r:{}]->(b)
                     SET r = $props",
                    rel.rel_type
                ))
                .param("case_id", case_id)
                .param("source", rel.source_key.as_str())
                .param("target", rel.target_key.as_str())
                .param("props", property_map(&props)),
            );
        }

        let mut target = plan.target.clone();
        target.case_id = case_id.to_string();
        let before = self.get_node(case_id, &plan.target_key).await?;
        queries.push(
            query(
                "MATCH (n:Entity {case_id: $case_id, key: $key})
                 SET n += $props",
            )
            .param("case_id", case_id)
            .param("key", plan.target_key.as_str())
            .param("props", update_map(&before, &target)?),
        );

        if let Some(old_label) = &plan.relabel_from {
            validate_identifier("node type", old_label)?;
            validate_identifier("node type", &target.node_type)?;
            queries.push(
                query(&format!(
                    "MATCH (n:Entity {{case_id: $case_id, key: $key}})
                     REMOVE n:{old_label}
                     SET n:{}",
                    target.node_type
                ))
                .param("case_id", case_id)
                .param("key", plan.target_key.as_str()),
            );
        }

        queries.push(
            query("MATCH (n:Entity {case_id: $case_id, key: $key}) DETACH DELETE n")
                .param("case_id", case_id)
                .param("key", plan.source_key.as_str()),
        );

        let mut txn = self.client.graph.start_txn().await.map_err(db_error)?;
        if let Err(e) = txn.run_queries(queries).await {
            warn!(case_id, source = plan.source_key.as_str(), error = %e, "Merge transaction failed, rolling back");
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            return Err(db_error(e));
        }
        txn.commit().await.map_err(db_error)?;
        Ok(target)
    }

    async fn rejected_pairs(&self, case_id: &str) -> Result<Vec<RejectedPair>> {
        let q = query(
            "MATCH (p:RejectedPair {case_id: $case_id})
             RETURN p.key1 AS key1, p.key2 AS key2,
                    coalesce(p.rejected_by, '') AS rejected_by,
                    coalesce(p.rejected_at, '') AS rejected_at
             ORDER BY key1, key2",
        )
        .param("case_id", case_id);

        let mut pairs = Vec::new();
        for row in self.rows(q).await? {
            let rejected_at: String = field(&row, "rejected_at")?;
            pairs.push(RejectedPair {
                case_id: case_id.to_string(),
                key1: field(&row, "key1")?,
                key2: field(&row, "key2")?,
                rejected_by: field(&row, "rejected_by")?,
                rejected_at: DateTime::parse_from_rfc3339(&rejected_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
            });
        }
        Ok(pairs)
    }

    async fn reject_pair(&self, pair: RejectedPair) -> Result<()> {
        let q = query(
            "MERGE (p:RejectedPair {case_id: $case_id, key1: $key1, key2: $key2})
             SET p.rejected_by = $rejected_by, p.rejected_at = $rejected_at",
        )
        .param("case_id", pair.case_id.as_str())
        .param("key1", pair.key1.as_str())
        .param("key2", pair.key2.as_str())
        .param("rejected_by", pair.rejected_by.as_str())
        .param("rejected_at", pair.rejected_at.to_rfc3339());
        self.run(q).await
    }

    async fn undo_rejection(&self, case_id: &str, key1: &str, key2: &str) -> Result<bool> {
        let q = query(
            "MATCH (p:RejectedPair {case_id: $case_id, key1: $key1, key2: $key2})
             DELETE p
             RETURN count(*) AS removed",
        )
        .param("case_id", case_id)
        .param("key1", key1)
        .param("key2", key2);
        let rows = self.rows(q).await?;
        let removed: i64 = match rows.first() {
            Some(row) => field(row, "removed")?,
            None => 0,
        };
        Ok(removed > 0)
    }
}

#[derive(Deserialize)]
struct PathStep {
    source: String,
    target: String,
    rel_type: String,
    #[serde(default)]
    props: HashMap<String, Value>,
}

fn field<T: DeserializeOwned>(row: &Row, name: &str) -> Result<T> {
    row.get::<T>(name)
        .map_err(|e| CaseGraphError::Internal(format!("unreadable column '{name}': {e}")))
}

fn node_from_row(row: &Row) -> Result<Node> {
    let label: Option<String> = field(row, "label")?;
    let props: HashMap<String, Value> = field(row, "props")?;
    Ok(Node::from_property_map(label.as_deref().unwrap_or_default(), props))
}

fn relationship_from_row(row: &Row) -> Result<Relationship> {
    Ok(relationship(
        field(row, "source")?,
        field(row, "target")?,
        field(row, "rel_type")?,
        field(row, "props")?,
    ))
}

fn relationship(
    source_key: String,
    target_key: String,
    rel_type: String,
    mut props: HashMap<String, Value>,
) -> Relationship {
    let case_id = match props.remove("case_id") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    Relationship {
        source_key,
        target_key,
        rel_type,
        properties: props.into_iter().collect(),
        case_id,
    }
}

/// `SET n += $props` payload turning `before` into `after`. Extension properties that
/// disappeared are written as null, which removes them.
fn update_map(before: &Node, after: &Node) -> Result<BoltType> {
    let mut props = after.to_property_map()?;
    props.remove("key");
    props.remove("case_id");
    for removed in before.properties.keys() {
        if !after.properties.contains_key(removed) {
            props.insert(removed.clone(), Value::Null);
        }
    }
    Ok(property_map(&props))
}

fn property_map(props: &BTreeMap<String, Value>) -> BoltType {
    BoltType::Map(BoltMap::from_iter(
        props
            .iter()
            .map(|(k, v)| (BoltString::from(k.as_str()), json_to_bolt(v))),
    ))
}

/// Convert a JSON value into a Bolt parameter. Nested objects become Bolt maps, which
/// Neo4j accepts as query parameters but not as stored property values.
pub(crate) fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => BoltType::String(BoltString::from(s.as_str())),
        Value::Array(items) => {
            BoltType::List(BoltList::from(items.iter().map(json_to_bolt).collect::<Vec<_>>()))
        }
        Value::Object(map) => BoltType::Map(BoltMap::from_iter(
            map.iter()
                .map(|(k, v)| (BoltString::from(k.as_str()), json_to_bolt(v))),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_onto_bolt_types() {
        assert!(matches!(json_to_bolt(&json!(null)), BoltType::Null(_)));
        assert!(matches!(json_to_bolt(&json!(3)), BoltType::Integer(_)));
        assert!(matches!(json_to_bolt(&json!(2.5)), BoltType::Float(_)));
        assert!(matches!(json_to_bolt(&json!("x")), BoltType::String(_)));
        assert!(matches!(json_to_bolt(&json!([1, "a"])), BoltType::List(_)));
        assert!(matches!(json_to_bolt(&json!({"a": 1})), BoltType::Map(_)));
    }

    #[test]
    fn update_map_nulls_removed_properties() {
        let before = Node::new("k", "Person", "A").with_property("alias", "Al");
        let after = Node::new("k", "Person", "A");
        let BoltType::Map(map) = update_map(&before, &after).unwrap() else {
            panic!("expected a map");
        };
        let alias = map.value.get(&BoltString::from("alias")).unwrap();
        assert!(matches!(alias, BoltType::Null(_)));
        assert!(map.value.get(&BoltString::from("key")).is_none());
    }

    #[test]
    fn relationship_rows_split_out_case_id() {
        let props = HashMap::from([
            ("case_id".to_string(), json!("c1")),
            ("amount".to_string(), json!(10)),
        ]);
        let rel = relationship("a".into(), "b".into(), "PAID".into(), props);
        assert_eq!(rel.case_id, "c1");
        assert_eq!(rel.properties.len(), 1);
    }
}
