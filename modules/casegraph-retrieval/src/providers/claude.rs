use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use casegraph_common::{
    Candidate, CandidateKind, CandidateScore, LanguageModel, QuestionKind, SchemaSummary,
};

use super::schema::tool_schema;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const TOOL_NAME: &str = "structured_response";

const CLASSIFY_PROMPT: &str = "You route questions about an investigation case. \
Classify the question as one of:\n\
- structural: answerable from graph structure alone (counts, who is connected to whom, lists of entities of a type)\n\
- semantic: needs the text of source documents (what was said, described or alleged)\n\
- hybrid: needs both";

const QUERY_PROMPT: &str = "You write Neo4j Cypher for an investigation graph. \
Write exactly one read-only statement. Never use CREATE, MERGE, SET, DELETE, REMOVE or DROP. \
Every node pattern must be filtered with `case_id = $case_id`. \
Return short scalar columns (names, keys, counts) and add LIMIT 50.";

const SCORE_PROMPT: &str = "You judge retrieval results for an investigator's question. \
Score every candidate from 0 (irrelevant) to 10 (directly answers the question). \
Return one score per candidate id.";

const ANSWER_PROMPT: &str = "You are an analyst assisting an investigation. \
Answer the question using only the case material provided. Name the documents and entities \
you rely on. If the material does not answer the question, say so plainly.";

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

// --- Structured outputs ---

#[derive(Debug, Deserialize, JsonSchema)]
struct Classification {
    /// One of: semantic, structural, hybrid.
    kind: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GeneratedQuery {
    /// A single read-only Cypher statement.
    cypher: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CandidateScores {
    scores: Vec<ScoredId>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ScoredId {
    id: String,
    /// 0 to 10.
    score: f64,
}

/// [`LanguageModel`] over the Anthropic Messages API. Structured answers use a forced
/// tool call whose input schema is derived from the output type.
#[derive(Clone)]
pub struct ClaudeModel {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl ClaudeModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn request(&self, system: &str, user: String, max_tokens: u32) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            max_tokens,
            system: system.to_string(),
            messages: vec![WireMessage {
                role: "user",
                content: user,
            }],
            temperature: 0.0,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);
        debug!(model = %request.model, "Claude chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Claude API error ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }

    async fn extract<T: JsonSchema + DeserializeOwned>(&self, system: &str, user: String) -> Result<T> {
        let mut request = self.request(system, user, 2048);
        request.tools.push(ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: "Return the structured result.".to_string(),
            input_schema: tool_schema::<T>(),
        });
        request.tool_choice = Some(serde_json::json!({"type": "tool", "name": TOOL_NAME}));

        let response = self.chat(&request).await?;
        structured_input(response)
    }
}

fn structured_input<T: DeserializeOwned>(response: ChatResponse) -> Result<T> {
    response
        .content
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { input } => Some(input),
            _ => None,
        })
        .ok_or_else(|| anyhow!("No structured output in Claude response"))
        .and_then(|input| {
            serde_json::from_value(input).map_err(|e| anyhow!("Failed to deserialize response: {e}"))
        })
}

fn candidates_prompt(question: &str, candidates: &[Candidate]) -> String {
    let mut prompt = format!("Question: {question}\n\nCandidates:\n");
    for c in candidates {
        let kind = match c.kind {
            CandidateKind::Chunk => "passage",
            CandidateKind::Entity => "entity",
        };
        prompt.push_str(&format!("\n[{}] ({kind})\n{}\n", c.id, c.text));
    }
    prompt
}

#[async_trait]
impl LanguageModel for ClaudeModel {
    async fn classify(&self, question: &str) -> Result<QuestionKind> {
        let out: Classification = self
            .extract(CLASSIFY_PROMPT, format!("Question: {question}"))
            .await?;
        QuestionKind::parse(&out.kind)
            .ok_or_else(|| anyhow!("Unknown question classification '{}'", out.kind))
    }

    async fn generate_query(&self, question: &str, schema: &SchemaSummary) -> Result<String> {
        let prompt = format!("Graph schema:\n{schema}\nQuestion: {question}");
        let out: GeneratedQuery = self.extract(QUERY_PROMPT, prompt).await?;
        Ok(out.cypher)
    }

    async fn score_candidates(
        &self,
        question: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<CandidateScore>> {
        let out: CandidateScores = self
            .extract(SCORE_PROMPT, candidates_prompt(question, candidates))
            .await?;
        Ok(out
            .scores
            .into_iter()
            .map(|s| CandidateScore {
                id: s.id,
                score: s.score,
            })
            .collect())
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String> {
        let prompt = if context.trim().is_empty() {
            format!("No case material matched this question.\n\nQuestion: {question}")
        } else {
            format!("{context}\n\nQuestion: {question}")
        };
        let response = self.chat(&self.request(ANSWER_PROMPT, prompt, 4096)).await?;
        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .ok_or_else(|| anyhow!("No response from Claude"))
    }
}
