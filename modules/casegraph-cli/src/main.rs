use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use casegraph_common::Config;
use casegraph_graph::{
    migrate, AnalysisScope, BetweennessParams, EntityResolver, GraphAnalytics, GraphClient,
    GraphStore, LouvainParams, Neo4jGraphStore, Neo4jVectorIndex, PageRankParams, ScanRequest,
    SimilarityMetric,
};
use casegraph_retrieval::{ClaudeModel, RetrievalOrchestrator, StageEvent, VoyageEmbedder};

#[derive(Parser)]
#[command(name = "casegraph", about = "Graph analytics and question answering over investigation cases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ScopeArgs {
    /// Case to operate on
    #[arg(long)]
    case: String,

    /// Restrict the analysis to these keys and their neighbourhood
    #[arg(long, value_delimiter = ',')]
    seeds: Vec<String>,

    /// Hops to expand around the seeds (0 keeps only the seeds)
    #[arg(long, default_value_t = 1)]
    depth: u32,
}

impl ScopeArgs {
    fn scope(&self) -> AnalysisScope {
        if self.seeds.is_empty() {
            AnalysisScope::Full
        } else {
            AnalysisScope::Seeds {
                keys: self.seeds.clone(),
                depth: self.depth,
            }
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Gestalt,
    JaroWinkler,
}

impl From<MetricArg> for SimilarityMetric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::Gestalt => SimilarityMetric::Gestalt,
            MetricArg::JaroWinkler => SimilarityMetric::JaroWinkler,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Rank entities by PageRank
    Pagerank {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 20)]
        top: usize,
        #[arg(long, default_value_t = 0.85)]
        damping: f64,
        #[arg(long, default_value_t = 20)]
        iterations: u32,
    },

    /// Detect communities with Louvain
    Communities {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 1.0)]
        resolution: f64,
        /// Fix the random seed for reproducible partitions
        #[arg(long)]
        random_seed: Option<u64>,
    },

    /// Rank entities by betweenness centrality
    Centrality {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 20)]
        top: usize,
        /// Report raw pair counts instead of normalized scores
        #[arg(long)]
        raw: bool,
    },

    /// Union of shortest paths between every pair of keys
    Paths {
        #[arg(long)]
        case: String,
        #[arg(long, value_delimiter = ',', required = true)]
        keys: Vec<String>,
        #[arg(long, default_value_t = 5)]
        max_depth: u32,
    },

    /// Stream a duplicate-entity scan as JSON lines. Ctrl-C cancels.
    Scan {
        #[arg(long)]
        case: String,
        #[arg(long, default_value_t = 0.7)]
        threshold: f64,
        #[arg(long, default_value_t = 100)]
        max_results: usize,
        /// Entity types to scan (default: every non-document type)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        #[arg(long, value_enum, default_value = "gestalt")]
        metric: MetricArg,
    },

    /// Mark a pair as not duplicates, or undo that decision
    Reject {
        #[arg(long)]
        case: String,
        key_a: String,
        key_b: String,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        undo: bool,
    },

    /// Merge SOURCE into TARGET, then delete SOURCE
    Merge {
        #[arg(long)]
        case: String,
        source: String,
        target: String,
        /// JSON object of fields to set on the merged node
        #[arg(long, default_value = "{}")]
        fields: String,
    },

    /// Answer a question about a case
    Ask {
        #[arg(long)]
        case: String,
        question: String,
        /// Keys that must be included in the context
        #[arg(long = "pin", value_delimiter = ',')]
        pinned: Vec<String>,
        /// Print stage progress to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Create constraints and indexes
    Migrate {
        /// Dimensions of the embedding model's vectors
        #[arg(long, default_value_t = 1024)]
        dimensions: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("casegraph=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = if matches!(cli.command, Command::Ask { .. }) {
        Config::from_env()
    } else {
        Config::graph_from_env()
    };
    config.log_redacted();

    let client = GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
        .await?;
    let store: Arc<dyn GraphStore> = Arc::new(Neo4jGraphStore::new(client.clone()));

    match cli.command {
        Command::Pagerank {
            scope,
            top,
            damping,
            iterations,
        } => {
            let params = PageRankParams {
                damping,
                iterations,
                top_n: top,
            };
            let result = GraphAnalytics::new(store)
                .pagerank(&scope.case, &scope.scope(), &params)
                .await?;
            print_json(&result)?;
        }
        Command::Communities {
            scope,
            resolution,
            random_seed,
        } => {
            let params = LouvainParams {
                resolution,
                seed: random_seed,
                ..Default::default()
            };
            let result = GraphAnalytics::new(store)
                .communities(&scope.case, &scope.scope(), &params)
                .await?;
            print_json(&result)?;
        }
        Command::Centrality { scope, top, raw } => {
            let params = BetweennessParams {
                top_n: top,
                normalized: !raw,
            };
            let result = GraphAnalytics::new(store)
                .betweenness(&scope.case, &scope.scope(), &params)
                .await?;
            print_json(&result)?;
        }
        Command::Paths {
            case,
            keys,
            max_depth,
        } => {
            let result = GraphAnalytics::new(store)
                .shortest_paths(&case, &keys, max_depth)
                .await?;
            print_json(&result)?;
        }
        Command::Scan {
            case,
            threshold,
            max_results,
            types,
            metric,
        } => {
            let request = ScanRequest {
                entity_types: (!types.is_empty()).then_some(types),
                threshold,
                max_results,
                metric: metric.into(),
            };
            scan(EntityResolver::new(store), &case, request).await?;
        }
        Command::Reject {
            case,
            key_a,
            key_b,
            by,
            undo,
        } => {
            let resolver = EntityResolver::new(store);
            if undo {
                resolver.undo_rejection(&case, &key_a, &key_b).await?;
                info!(
                    case_id = case.as_str(),
                    key_a = key_a.as_str(),
                    key_b = key_b.as_str(),
                    "Rejection undone"
                );
            } else {
                let pair = resolver.reject_pair(&case, &key_a, &key_b, &by).await?;
                print_json(&pair)?;
            }
        }
        Command::Merge {
            case,
            source,
            target,
            fields,
        } => {
            let fields: serde_json::Value =
                serde_json::from_str(&fields).context("--fields must be a JSON object")?;
            let outcome = EntityResolver::new(store)
                .merge_value(&case, &source, &target, fields)
                .await?;
            print_json(&outcome)?;
        }
        Command::Ask {
            case,
            question,
            pinned,
            progress,
        } => {
            let model = Arc::new(ClaudeModel::new(&config.anthropic_api_key, &config.anthropic_model));
            let mut orchestrator =
                RetrievalOrchestrator::new(store, model, config.retrieval.clone());
            if let Some(key) = &config.voyage_api_key {
                orchestrator = orchestrator.with_vector_search(
                    Arc::new(VoyageEmbedder::new(key, &config.embedding_model)),
                    Arc::new(Neo4jVectorIndex::new(client.clone())),
                );
            }

            let answer = if progress {
                let (tx, mut rx) = mpsc::channel::<StageEvent>(32);
                let printer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                });
                let answer = orchestrator
                    .answer_question_with_progress(&case, &question, &pinned, tx)
                    .await;
                let _ = printer.await;
                answer?
            } else {
                orchestrator.answer_question(&case, &question, &pinned).await?
            };
            print_json(&answer)?;
        }
        Command::Migrate { dimensions } => {
            migrate(&client, dimensions).await?;
        }
    }

    client.close();
    Ok(())
}

async fn scan(resolver: EntityResolver, case_id: &str, request: ScanRequest) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling scan");
                cancel.cancel();
            }
        })
    };

    let mut events = Box::pin(resolver.scan_stream(case_id, request, cancel));
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    interrupt.abort();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
