use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use casegraph_common::{CaseGraphError, Node, Relationship, Result, RESERVED_PROPERTIES};

use crate::store::validate_identifier;

/// Field overrides applied to the surviving node of a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeFields {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    /// Custom properties; `Null` removes the property from the target.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl MergeFields {
    /// Parse an untyped payload. Known fields are read by name, a nested `properties`
    /// object is merged in, and every other top-level key becomes a custom property.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(CaseGraphError::invalid("merged fields must be a JSON object"));
        };

        let mut fields = MergeFields::default();
        for (key, value) in map {
            match key.as_str() {
                "name" => fields.name = Some(expect_string(&key, value)?),
                "summary" => fields.summary = Some(expect_string(&key, value)?),
                "notes" => fields.notes = Some(expect_string(&key, value)?),
                "type" => fields.node_type = Some(expect_string(&key, value)?),
                "properties" => match value {
                    Value::Object(props) => fields.properties.extend(props),
                    Value::Null => {}
                    _ => {
                        return Err(CaseGraphError::invalid(
                            "merged field 'properties' must be an object",
                        ))
                    }
                },
                k if RESERVED_PROPERTIES.contains(&k) => {}
                _ => {
                    fields.properties.insert(key, value);
                }
            }
        }
        Ok(fields)
    }
}

fn expect_string(field: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(CaseGraphError::invalid(format!(
            "merged field '{field}' must be a string"
        ))),
    }
}

/// Everything a store needs to carry out one merge in a single atomic write.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub source_key: String,
    pub target_key: String,
    /// Source relationships re-pointed at the target that have no counterpart there.
    pub new_relationships: Vec<Relationship>,
    /// Existing target relationships (by identity) with their merged property maps.
    pub property_merges: Vec<Relationship>,
    /// Final state of the target node.
    pub target: Node,
    /// Previous label when the merge changes the target's type.
    pub relabel_from: Option<String>,
    /// Source relationships carried over, whether created or folded into an existing one.
    pub relationships_migrated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub relationships_migrated: usize,
    pub target: Node,
}

/// Build the merge plan for `source` into `target`.
///
/// `source_rels` and `target_rels` must hold every relationship touching the respective
/// node; relationships that touch neither are ignored. Relationships re-pointed onto the
/// target are de-duplicated by `(other endpoint, type)`: when the target already has such
/// a relationship, the source's properties are folded into it (existing values win).
pub fn plan_merge(
    source: &Node,
    target: &Node,
    source_rels: &[Relationship],
    target_rels: &[Relationship],
    fields: &MergeFields,
) -> Result<MergePlan> {
    if source.key == target.key {
        return Err(CaseGraphError::invalid("cannot merge a node into itself"));
    }

    // (other key, type) -> index into either `existing` or `created`
    enum Slot {
        Existing(usize),
        Created(usize),
    }
    let mut slots: HashMap<(String, String), Slot> = HashMap::new();
    let mut existing: Vec<Relationship> = Vec::new();
    let mut touched_existing: Vec<bool> = Vec::new();

    for rel in target_rels.iter().filter(|r| r.touches(&target.key)) {
        let other = other_endpoint(rel, &target.key);
        if other == source.key {
            continue;
        }
        let slot_key = (other.to_string(), rel.rel_type.clone());
        if slots.contains_key(&slot_key) {
            continue;
        }
        slots.insert(slot_key, Slot::Existing(existing.len()));
        existing.push(rel.clone());
        touched_existing.push(false);
    }

    let mut created: Vec<Relationship> = Vec::new();
    let mut migrated = 0;

    for rel in source_rels.iter().filter(|r| r.touches(&source.key)) {
        let repoint = |k: &str| {
            if k == source.key {
                target.key.clone()
            } else {
                k.to_string()
            }
        };
        let new_source = repoint(&rel.source_key);
        let new_target = repoint(&rel.target_key);
        if new_source == new_target {
            continue;
        }

        let other = if new_source == target.key { &new_target } else { &new_source };
        let slot_key = (other.clone(), rel.rel_type.clone());
        migrated += 1;

        match slots.get(&slot_key) {
            Some(Slot::Existing(i)) => {
                fill_missing(&mut existing[*i].properties, &rel.properties);
                touched_existing[*i] = true;
            }
            Some(Slot::Created(i)) => {
                fill_missing(&mut created[*i].properties, &rel.properties);
            }
            None => {
                slots.insert(slot_key, Slot::Created(created.len()));
                created.push(Relationship {
                    source_key: new_source,
                    target_key: new_target,
                    rel_type: rel.rel_type.clone(),
                    properties: rel.properties.clone(),
                    case_id: target.case_id.clone(),
                });
            }
        }
    }

    let property_merges = existing
        .into_iter()
        .zip(touched_existing)
        .filter_map(|(rel, touched)| touched.then_some(rel))
        .collect();

    let (merged_target, relabel_from) = apply_fields(source, target, fields)?;

    Ok(MergePlan {
        source_key: source.key.clone(),
        target_key: target.key.clone(),
        new_relationships: created,
        property_merges,
        target: merged_target,
        relabel_from,
        relationships_migrated: migrated,
    })
}

fn other_endpoint<'a>(rel: &'a Relationship, key: &str) -> &'a str {
    if rel.source_key == key {
        &rel.target_key
    } else {
        &rel.source_key
    }
}

fn fill_missing(into: &mut BTreeMap<String, Value>, from: &BTreeMap<String, Value>) {
    for (k, v) in from {
        into.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

fn apply_fields(source: &Node, target: &Node, fields: &MergeFields) -> Result<(Node, Option<String>)> {
    let mut merged = target.clone();

    if let Some(name) = &fields.name {
        merged.name = name.clone();
    }
    if let Some(summary) = &fields.summary {
        merged.summary = summary.clone();
    }
    if let Some(notes) = &fields.notes {
        merged.notes = notes.clone();
    }
    for (k, v) in &fields.properties {
        if RESERVED_PROPERTIES.contains(&k.as_str()) {
            continue;
        }
        if v.is_null() {
            merged.properties.remove(k);
        } else {
            merged.properties.insert(k.clone(), v.clone());
        }
    }

    for fact in &source.verified_facts {
        if !merged.verified_facts.iter().any(|f| f.text == fact.text) {
            merged.verified_facts.push(fact.clone());
        }
    }
    for insight in &source.ai_insights {
        if !merged.ai_insights.iter().any(|i| i.text == insight.text) {
            merged.ai_insights.push(insight.clone());
        }
    }

    let mut relabel_from = None;
    if let Some(new_type) = fields.node_type.as_deref().map(str::trim) {
        if !new_type.is_empty() && new_type != target.node_type {
            validate_identifier("node type", new_type)?;
            relabel_from = Some(target.node_type.clone());
            merged.node_type = new_type.to_string();
        }
    }

    Ok((merged, relabel_from))
}
