//! Duplicate detection and merging of case entities.

mod merge;
mod scan;
mod similarity;

pub use merge::{plan_merge, MergeFields, MergeOutcome, MergePlan};
pub use scan::{
    find_similar_pairs, group_by_type, rank_pairs, scan_events, GroupScanner, RejectedSet,
    ScanEvent, ScanRequest, PROGRESS_INTERVAL,
};
pub use similarity::{gestalt_ratio, name_similarity, normalize_name, SimilarityMetric};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casegraph_common::{CaseGraphError, RejectedPair, Result, SimilarityPair};

use crate::store::GraphStore;

/// Similarity scans, merges and rejection bookkeeping over one graph store.
///
/// Merges are serialized per case: two merges in the same case never interleave their
/// reads and writes, while merges in different cases run concurrently.
pub struct EntityResolver {
    store: Arc<dyn GraphStore>,
    merge_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run a full scan and return the ranked, capped pair list.
    pub async fn scan(&self, case_id: &str, request: &ScanRequest) -> Result<Vec<SimilarityPair>> {
        request.validate()?;
        let (nodes, rejected) = scan::load_scan_inputs(self.store.as_ref(), case_id).await?;
        let pairs = find_similar_pairs(nodes, request, &rejected)?;
        info!(case_id, pairs = pairs.len(), "Similarity scan complete");
        Ok(pairs)
    }

    /// Streaming scan; see [`scan_events`].
    pub fn scan_stream(
        &self,
        case_id: &str,
        request: ScanRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ScanEvent> + Send + 'static {
        scan_events(self.store.clone(), case_id.to_string(), request, cancel)
    }

    /// Drive a streaming scan on a background task, delivering events through a bounded
    /// channel. When the receiver is dropped (a disconnected client) the task cancels
    /// the token and stops at the next checkpoint.
    pub fn spawn_scan(
        &self,
        case_id: &str,
        request: ScanRequest,
        cancel: CancellationToken,
        capacity: usize,
    ) -> mpsc::Receiver<ScanEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let events = self.scan_stream(case_id, request, cancel.clone());
        let case_id = case_id.to_string();

        tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if tx.send(event).await.is_err() {
                    debug!(case_id = case_id.as_str(), "Scan consumer disconnected");
                    cancel.cancel();
                    break;
                }
            }
        });

        rx
    }

    /// Merge `source_key` into `target_key`: relationships move to the target, merged
    /// fields are applied, and the source node is deleted.
    pub async fn merge(
        &self,
        case_id: &str,
        source_key: &str,
        target_key: &str,
        fields: &MergeFields,
    ) -> Result<MergeOutcome> {
        if source_key == target_key {
            return Err(CaseGraphError::invalid("cannot merge a node into itself"));
        }

        let lock = self.case_lock(case_id);
        let _guard = lock.lock().await;

        let source = self.store.get_node(case_id, source_key).await?;
        let target = self.store.get_node(case_id, target_key).await?;
        let source_rels = self.store.get_neighbours(case_id, source_key, 1).await?.relationships;
        let target_rels = self.store.get_neighbours(case_id, target_key, 1).await?.relationships;

        let plan = plan_merge(&source, &target, &source_rels, &target_rels, fields)?;
        let migrated = plan.relationships_migrated;
        let target = self.store.apply_merge(case_id, &plan).await.map_err(|e| {
            warn!(case_id, source_key, target_key, error = %e, "Merge failed");
            e
        })?;

        info!(
            case_id,
            source_key,
            target_key,
            relationships_migrated = migrated,
            relabelled = plan.relabel_from.is_some(),
            "Entities merged"
        );
        Ok(MergeOutcome {
            relationships_migrated: migrated,
            target,
        })
    }

    /// Merge with an untyped payload; a non-object payload is `InvalidArgument`.
    pub async fn merge_value(
        &self,
        case_id: &str,
        source_key: &str,
        target_key: &str,
        fields: Value,
    ) -> Result<MergeOutcome> {
        let fields = MergeFields::from_value(fields)?;
        self.merge(case_id, source_key, target_key, &fields).await
    }

    /// Record that two entities are not duplicates. Both must belong to the case.
    pub async fn reject_pair(
        &self,
        case_id: &str,
        key_a: &str,
        key_b: &str,
        rejected_by: &str,
    ) -> Result<RejectedPair> {
        let pair = RejectedPair::new(case_id, key_a, key_b, rejected_by)?;
        self.store.get_node(case_id, key_a).await?;
        self.store.get_node(case_id, key_b).await?;
        self.store.reject_pair(pair.clone()).await?;
        info!(case_id, key1 = pair.key1.as_str(), key2 = pair.key2.as_str(), "Pair rejected");
        Ok(pair)
    }

    pub async fn undo_rejection(&self, case_id: &str, key_a: &str, key_b: &str) -> Result<()> {
        let (key1, key2) = casegraph_common::normalize_pair(key_a, key_b);
        if !self.store.undo_rejection(case_id, &key1, &key2).await? {
            return Err(CaseGraphError::not_found(format!(
                "no rejection recorded for ({key1}, {key2})"
            )));
        }
        Ok(())
    }

    pub async fn list_rejections(&self, case_id: &str) -> Result<Vec<RejectedPair>> {
        self.store.rejected_pairs(case_id).await
    }

    fn case_lock(&self, case_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .merge_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(case_id.to_string()).or_default().clone()
    }
}
