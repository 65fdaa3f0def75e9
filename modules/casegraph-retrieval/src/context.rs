use std::fmt::Write;

use casegraph_common::{Chunk, Node};
use casegraph_graph::QueryRow;

/// Assembles the text handed to the answering model. Sections with nothing in them
/// are left out entirely.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    passages: Vec<String>,
    entities: Vec<String>,
    connections: Vec<String>,
    structured: Vec<String>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passage(&mut self, chunk: &Chunk) -> &mut Self {
        let pages = match (chunk.page_start, chunk.page_end) {
            (Some(s), Some(e)) if s != e => format!(", pp. {s}-{e}"),
            (Some(s), _) => format!(", p. {s}"),
            _ => String::new(),
        };
        self.passages
            .push(format!("[{}{}]\n{}", chunk.doc_name, pages, chunk.text.trim()));
        self
    }

    pub fn entity(&mut self, node: &Node) -> &mut Self {
        self.entities.push(entity_text(node));
        self
    }

    pub fn connections(&mut self, lines: impl IntoIterator<Item = String>) -> &mut Self {
        self.connections.extend(lines);
        self
    }

    pub fn structured_rows(&mut self, rows: &[QueryRow]) -> &mut Self {
        self.structured.extend(
            rows.iter()
                .map(|row| serde_json::Value::Object(row.clone()).to_string()),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
            && self.entities.is_empty()
            && self.connections.is_empty()
            && self.structured.is_empty()
    }

    pub fn build(&self) -> String {
        let mut out = String::new();
        section(&mut out, "Relevant Passages", &self.passages, "\n\n");
        section(&mut out, "Entities", &self.entities, "\n\n");
        section(&mut out, "Graph Connections", &self.connections, "\n");
        section(&mut out, "Structured Query Results", &self.structured, "\n");
        out.trim_end().to_string()
    }
}

fn section(out: &mut String, title: &str, items: &[String], separator: &str) {
    if items.is_empty() {
        return;
    }
    let _ = write!(out, "## {title}\n\n{}\n\n", items.join(separator));
}

/// One entity rendered with its summary, verified facts and insights. Also used as the
/// candidate text for LLM re-ranking.
pub fn entity_text(node: &Node) -> String {
    let mut text = format!("{} ({}, key: {})", node.name, node.node_type, node.key);
    if !node.summary.is_empty() {
        let _ = write!(text, "\n{}", node.summary.trim());
    }
    for fact in &node.verified_facts {
        let _ = write!(text, "\n- Verified: {}", fact.text);
        if let Some(doc) = &fact.source_doc {
            let _ = write!(text, " [{doc}");
            if let Some(page) = fact.page {
                let _ = write!(text, ", p. {page}");
            }
            text.push(']');
        }
    }
    for insight in &node.ai_insights {
        let _ = write!(text, "\n- Insight (unverified): {}", insight.text);
        if let Some(confidence) = &insight.confidence {
            let _ = write!(text, " (confidence: {confidence})");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_common::{AiInsight, VerifiedFact};
    use serde_json::json;

    #[test]
    fn empty_sections_are_omitted() {
        let mut builder = ContextBuilder::new();
        assert!(builder.is_empty());
        builder.entity(&Node::new("p1", "Person", "Marco"));
        let text = builder.build();
        assert!(text.starts_with("## Entities"));
        assert!(!text.contains("Relevant Passages"));
        assert!(!text.contains("Graph Connections"));
        assert!(!text.contains("Structured Query Results"));
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let mut builder = ContextBuilder::new();
        let mut row = QueryRow::new();
        row.insert("n".into(), json!(3));
        builder
            .structured_rows(&[row])
            .connections(["Marco -[DIRECTOR_OF]-> Acme".to_string()])
            .passage(&Chunk {
                id: "c1".into(),
                text: "Marco signed.".into(),
                doc_name: "lease.pdf".into(),
                page_start: Some(2),
                page_end: Some(3),
                embedding: None,
            });
        let text = builder.build();
        let passages = text.find("## Relevant Passages").unwrap();
        let connections = text.find("## Graph Connections").unwrap();
        let structured = text.find("## Structured Query Results").unwrap();
        assert!(passages < connections && connections < structured);
        assert!(text.contains("[lease.pdf, pp. 2-3]"));
        assert!(text.contains(r#"{"n":3}"#));
    }

    #[test]
    fn entity_text_carries_facts_and_insights() {
        let mut node = Node::new("p1", "Person", "Marco").with_summary("Director of Acme");
        node.verified_facts.push(VerifiedFact {
            text: "Signed the lease".into(),
            source_doc: Some("lease.pdf".into()),
            page: Some(4),
            ..Default::default()
        });
        node.ai_insights.push(AiInsight {
            text: "May control Beta Ltd".into(),
            confidence: Some("low".into()),
            reasoning: None,
        });
        let text = entity_text(&node);
        assert!(text.contains("Verified: Signed the lease [lease.pdf, p. 4]"));
        assert!(text.contains("Insight (unverified): May control Beta Ltd (confidence: low)"));
    }
}
