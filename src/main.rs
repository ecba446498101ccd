mod config;
mod error;
mod layers;

use crate::config::{ClientConfig, CrawlConfig};
use crate::layers::crawl::CrawlEngine;
use crate::layers::discovery::SemanticScholarClient;
use crate::layers::merge::merge_arxiv;
use crate::layers::resolution::{Resolver, SimilarityMetric};
use crate::layers::store::PaperStore;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "citation-crawler", about = "Build influence-filtered citation graphs from Semantic Scholar")]
struct Cli {
    /// Paper cache directory (overrides CRAWLER_STORE_DIR)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Title similarity threshold in [0, 1]
    #[arg(long, global = true)]
    threshold: Option<f64>,

    #[arg(long, global = true, value_enum)]
    metric: Option<SimilarityMetric>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the citation graph of a root paper
    Crawl {
        /// Semantic Scholar id of the root paper
        #[arg(long, conflicts_with = "title", required_unless_present = "title")]
        id: Option<String>,
        /// Resolve the root paper by title instead
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        min_influential_citations: Option<u64>,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        checkpoint_interval: Option<usize>,
        /// Where to write the GraphML checkpoint
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Start from the existing checkpoint instead of an empty graph
        #[arg(long)]
        resume_graph: bool,
        /// Refresh the store snapshot when the crawl finishes
        #[arg(long)]
        snapshot: bool,
    },
    /// Look a title up and print the matching paper id
    Resolve { title: String },
    /// Attach harvested arXiv metadata to cached papers
    MergeArxiv { arxiv_dir: PathBuf },
    /// Rebuild the store index and write a consolidated snapshot
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 0. Load Configuration
    dotenv().ok();

    // Auto-create .env if it doesn't exist (copy from .env.example)
    if !std::path::Path::new(".env").exists() && std::path::Path::new(".env.example").exists() {
        println!("Creating .env from .env.example...");
        std::fs::copy(".env.example", ".env")?;
        dotenvy::from_filename(".env").ok();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut crawl_config = CrawlConfig::from_env()?;
    if let Some(dir) = cli.store_dir {
        crawl_config.store_dir = dir;
    }
    if let Some(threshold) = cli.threshold {
        crawl_config.similarity_threshold = threshold;
    }
    if let Some(metric) = cli.metric {
        crawl_config.similarity_metric = metric;
    }

    let resolver = Resolver::new(crawl_config.similarity_threshold, crawl_config.similarity_metric);
    let client = SemanticScholarClient::new(ClientConfig::from_env()?, resolver)?;

    match cli.command {
        Command::Crawl {
            id,
            title,
            min_influential_citations,
            max_depth,
            checkpoint_interval,
            graph,
            resume_graph,
            snapshot,
        } => {
            crawl_config.root_id = match (id, title) {
                (Some(id), _) => id,
                (None, Some(title)) => client
                    .resolve(&title)
                    .await
                    .ok_or_else(|| anyhow!("No paper matches {:?}", title))?,
                (None, None) => return Err(anyhow!("Either --id or --title is required")),
            };
            if let Some(n) = min_influential_citations {
                crawl_config.min_influential_citation_count = n;
            }
            if let Some(depth) = max_depth {
                crawl_config.max_depth = depth;
            }
            if let Some(interval) = checkpoint_interval {
                crawl_config.checkpoint_interval = interval;
            }
            crawl_config.graph_path = graph;
            crawl_config.resume_graph = resume_graph;
            crawl_config.write_snapshot = snapshot;

            let store = PaperStore::resume(&crawl_config.store_dir)
                .await
                .context("Failed to open paper store")?;
            let checkpoint = crawl_config.checkpoint_path();
            let mut engine = CrawlEngine::new(crawl_config, client, store);
            let stats = match engine.run().await {
                Ok(stats) => stats,
                Err(e) => {
                    if e.is_persistence() {
                        tracing::error!(
                            "Disk failure; rerun to resume from the cache and {}",
                            checkpoint.display()
                        );
                    }
                    return Err(e).context("Crawl aborted");
                }
            };
            println!(
                "Crawled {} citations: {} nodes, {} edges ({} papers in store, {} fetched)",
                stats.done,
                engine.graph().node_count(),
                engine.graph().edge_count(),
                engine.store().len(),
                stats.fetched
            );
        }
        Command::Resolve { title } => match client.resolve(&title).await {
            Some(id) => println!("{}", id),
            None => println!("No close matches found."),
        },
        Command::MergeArxiv { arxiv_dir } => {
            let mut store = PaperStore::resume(&crawl_config.store_dir)
                .await
                .context("Failed to open paper store")?;
            let stats = merge_arxiv(&client, &mut store, &arxiv_dir).await?;
            println!(
                "Merged {} of {} arXiv entries ({} unresolved, {} failed)",
                stats.merged, stats.entries, stats.unresolved, stats.failed
            );
        }
        Command::Snapshot => {
            let mut store = PaperStore::open(&crawl_config.store_dir).await?;
            let root = store.root().to_path_buf();
            store.bulk_load(&root).await?;
            let path = store.write_snapshot().await?;
            println!("Wrote {} papers to {}", store.len(), path.display());
        }
    }

    Ok(())
}
