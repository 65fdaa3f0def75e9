use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Pipeline stage names, in execution order.
pub mod stage {
    pub const CLASSIFY: &str = "classify";
    pub const STRUCTURED_QUERY: &str = "structured_query";
    pub const CHUNK_RETRIEVAL: &str = "chunk_retrieval";
    pub const ENTITY_RETRIEVAL: &str = "entity_retrieval";
    pub const PINNED_ENTITIES: &str = "pinned_entities";
    pub const GRAPH_TRAVERSAL: &str = "graph_traversal";
    pub const RERANK: &str = "rerank";
    pub const CONTEXT_ASSEMBLY: &str = "context_assembly";
    pub const SYNTHESIS: &str = "synthesis";
    pub const RESULT_GRAPH: &str = "result_graph";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub input: String,
    pub output: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered record of what each stage of one question did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineTrace {
    pub stages: Vec<StageRecord>,
}

impl PipelineTrace {
    pub fn push(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn failed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.stages.iter().map(|s| s.duration_ms).sum())
    }
}

/// Progress notifications for a running question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    Started {
        stage: String,
    },
    Finished {
        stage: String,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Optional progress channel. A closed or absent receiver is ignored.
#[derive(Clone, Default)]
pub(crate) struct Progress {
    tx: Option<mpsc::Sender<StageEvent>>,
}

impl Progress {
    pub fn new(tx: mpsc::Sender<StageEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub async fn emit(&self, event: StageEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

/// A stage in flight. Finishing it emits the `finished` event and yields the record.
pub(crate) struct StageRun {
    name: &'static str,
    started: Instant,
}

impl StageRun {
    pub async fn start(name: &'static str, progress: &Progress) -> Self {
        progress
            .emit(StageEvent::Started {
                stage: name.to_string(),
            })
            .await;
        Self {
            name,
            started: Instant::now(),
        }
    }

    pub async fn finish(
        self,
        progress: &Progress,
        input: impl Into<String>,
        output: impl Into<String>,
        error: Option<String>,
    ) -> StageRecord {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        progress
            .emit(StageEvent::Finished {
                stage: self.name.to_string(),
                duration_ms,
                error: error.clone(),
            })
            .await;
        StageRecord {
            name: self.name.to_string(),
            input: input.into(),
            output: output.into(),
            duration_ms,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_receiver_does_not_fail_a_stage() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let progress = Progress::new(tx);
        let run = StageRun::start(stage::CLASSIFY, &progress).await;
        let record = run.finish(&progress, "q", "hybrid", None).await;
        assert_eq!(record.name, "classify");
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(StageEvent::Started { stage: "rerank".into() }).unwrap();
        assert_eq!(json["event"], "started");
        assert_eq!(json["stage"], "rerank");
    }

    #[test]
    fn failed_stages_are_listed() {
        let mut trace = PipelineTrace::default();
        for (name, error) in [("a", None), ("b", Some("boom".to_string()))] {
            trace.push(StageRecord {
                name: name.into(),
                input: String::new(),
                output: String::new(),
                duration_ms: 2,
                error,
            });
        }
        assert_eq!(trace.failed_stages(), vec!["b"]);
        assert_eq!(trace.total_duration(), Duration::from_millis(4));
    }
}
