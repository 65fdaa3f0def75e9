use serde::{Deserialize, Serialize};
use tracing::debug;

use casegraph_common::{Result, Subgraph};

use crate::store::{validate_depth, GraphStore};

pub const MAX_PATH_DEPTH: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsResult {
    pub subgraph: Subgraph,
    pub pairs_connected: usize,
    pub pairs_total: usize,
}

/// Union of one shortest path per unordered pair of seeds. Pairs with no path within
/// `max_depth` hops contribute nothing.
pub async fn shortest_paths_subgraph(
    store: &dyn GraphStore,
    case_id: &str,
    seed_keys: &[String],
    max_depth: u32,
) -> Result<PathsResult> {
    validate_depth(max_depth, MAX_PATH_DEPTH)?;

    let mut seeds: Vec<&String> = seed_keys.iter().collect();
    seeds.sort();
    seeds.dedup();

    let mut result = PathsResult::default();
    for (i, from) in seeds.iter().enumerate() {
        for to in &seeds[i + 1..] {
            result.pairs_total += 1;
            if let Some(path) = store.shortest_path(case_id, from, to, max_depth).await? {
                result.pairs_connected += 1;
                result.subgraph.absorb(path);
            } else {
                debug!(case_id, from = from.as_str(), to = to.as_str(), "No path between seeds");
            }
        }
    }
    Ok(result)
}
