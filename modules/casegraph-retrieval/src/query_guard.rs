//! Screening for generated Cypher before it reaches the database.

use std::sync::LazyLock;

use regex::Regex;

use casegraph_common::{CaseGraphError, Result};

static MUTATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DELETE|DETACH|REMOVE|SET|CREATE|MERGE|DROP|LOAD\s+CSV|FOREACH)\b")
        .expect("valid mutation pattern")
});

static CASE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$case_id\b").expect("valid case parameter pattern"));

/// Accept only a single read statement that is scoped to `$case_id`. Returns the
/// statement with surrounding whitespace, code fences and a trailing semicolon removed.
pub fn screen_query(raw: &str) -> Result<String> {
    let text = strip_fences(raw);
    let text = text.trim().trim_end_matches(';').trim();

    if text.is_empty() {
        return Err(CaseGraphError::UnsafeQuery("empty query".into()));
    }
    if let Some(m) = MUTATING.find(text) {
        return Err(CaseGraphError::UnsafeQuery(format!(
            "mutating keyword '{}'",
            m.as_str().to_uppercase()
        )));
    }
    if text.contains(';') {
        return Err(CaseGraphError::UnsafeQuery("multiple statements".into()));
    }
    if !CASE_PARAM.is_match(text) {
        return Err(CaseGraphError::UnsafeQuery(
            "query is not scoped to $case_id".into(),
        ));
    }
    Ok(text.to_string())
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body
        .strip_prefix("cypher")
        .or_else(|| body.strip_prefix("Cypher"))
        .unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_scoped_read_query() {
        let q = "MATCH (p:Person {case_id: $case_id})-[:DIRECTOR_OF]->(c:Company {case_id: $case_id})
                 RETURN p.name AS person, c.name AS company LIMIT 25;";
        let screened = screen_query(q).unwrap();
        assert!(screened.ends_with("LIMIT 25"));
    }

    #[test]
    fn rejects_mutations_in_any_case() {
        for q in [
            "MATCH (n {case_id: $case_id}) DETACH DELETE n",
            "MATCH (n {case_id: $case_id}) delete n",
            "MATCH (n {case_id: $case_id}) SET n.name = 'x' RETURN n",
            "MATCH (n {case_id: $case_id}) REMOVE n.name RETURN n",
            "CREATE (n:Person {case_id: $case_id})",
            "MERGE (n:Person {case_id: $case_id}) RETURN n",
            "DROP INDEX entity_case",
        ] {
            assert!(
                matches!(screen_query(q), Err(CaseGraphError::UnsafeQuery(_))),
                "{q}"
            );
        }
    }

    #[test]
    fn keywords_inside_identifiers_are_fine() {
        let q = "MATCH (n:Dataset {case_id: $case_id}) RETURN n.created_at AS createdAt, n.offset AS offset";
        assert!(screen_query(q).is_ok());
    }

    #[test]
    fn rejects_multiple_statements_and_unscoped_queries() {
        assert!(screen_query("MATCH (n {case_id: $case_id}) RETURN n; MATCH (m) RETURN m").is_err());
        assert!(screen_query("MATCH (n:Person) RETURN n.name").is_err());
        assert!(screen_query("   ").is_err());
    }

    #[test]
    fn strips_code_fences() {
        let q = "```cypher\nMATCH (n {case_id: $case_id}) RETURN count(n) AS total\n```";
        assert_eq!(
            screen_query(q).unwrap(),
            "MATCH (n {case_id: $case_id}) RETURN count(n) AS total"
        );
    }
}
