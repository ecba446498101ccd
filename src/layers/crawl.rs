use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use crate::layers::discovery::SemanticScholarClient;
use crate::layers::graph::CitationGraph;
use crate::layers::store::PaperStore;
use crate::layers::PaperRecord;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub paper: PaperRecord,
    pub depth: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    /// Citations discovered so far. Grows as papers are enqueued.
    pub total: usize,
    pub done: usize,
    pub fetched: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped_unresolved: usize,
    pub edges: usize,
    pub checkpoints: usize,
}

impl CrawlStats {
    pub fn percent(&self) -> f64 {
        self.done as f64 / self.total.max(1) as f64 * 100.0
    }
}

pub(crate) enum Lookup {
    Cached(PaperRecord),
    Fetched(PaperRecord),
    /// Remote lookup gave up. Not fatal to the caller.
    Failed(Error),
}

/// Reads `paper_id` from the store, or fetches and persists it.
///
/// Store errors come back as `Err`; remote errors come back as `Lookup::Failed`.
pub(crate) async fn load_or_fetch(
    client: &SemanticScholarClient,
    store: &mut PaperStore,
    paper_id: &str,
) -> Result<Lookup> {
    if store.contains(paper_id) {
        return Ok(Lookup::Cached(store.get(paper_id).await?));
    }
    match client.fetch(paper_id).await {
        Ok(paper) => {
            store.put(&paper).await?;
            if paper.paper_id != paper_id {
                store.alias(paper_id, &paper.paper_id).await?;
            }
            Ok(Lookup::Fetched(paper))
        }
        Err(e) => Ok(Lookup::Failed(e)),
    }
}

pub struct CrawlEngine {
    config: CrawlConfig,
    client: SemanticScholarClient,
    store: PaperStore,
    graph: CitationGraph,
    visited: HashSet<String>,
    frontier: VecDeque<FrontierEntry>,
    stats: CrawlStats,
    new_papers: usize,
    started: Instant,
}

impl CrawlEngine {
    pub fn new(config: CrawlConfig, client: SemanticScholarClient, store: PaperStore) -> Self {
        Self {
            config,
            client,
            store,
            graph: CitationGraph::new(),
            visited: HashSet::new(),
            frontier: VecDeque::new(),
            stats: CrawlStats::default(),
            new_papers: 0,
            started: Instant::now(),
        }
    }

    pub fn graph(&self) -> &CitationGraph {
        &self.graph
    }

    pub fn store(&self) -> &PaperStore {
        &self.store
    }

    /// Breadth-first crawl from the configured root until the frontier is empty.
    pub async fn run(&mut self) -> Result<CrawlStats> {
        self.config.validate()?;
        self.started = Instant::now();

        let checkpoint = self.config.checkpoint_path();
        if self.config.resume_graph && tokio::fs::try_exists(&checkpoint).await.unwrap_or(false) {
            self.graph = CitationGraph::load_graphml(&checkpoint).await?;
            tracing::info!(
                "Resumed graph from {} ({} nodes, {} edges)",
                checkpoint.display(),
                self.graph.node_count(),
                self.graph.edge_count()
            );
        }

        let root_id = self.config.root_id.clone();
        let root = match load_or_fetch(&self.client, &mut self.store, &root_id).await? {
            Lookup::Cached(paper) => {
                self.stats.cached += 1;
                paper
            }
            Lookup::Fetched(paper) => {
                self.stats.fetched += 1;
                self.new_papers += 1;
                paper
            }
            Lookup::Failed(e) => return Err(e),
        };
        tracing::info!("Root paper {}: {:?} ({} citations)", root.paper_id, root.title, root.citations.len());

        self.visited.insert(root_id);
        self.visited.insert(root.paper_id.clone());
        self.stats.total += root.citations.len();
        self.frontier.push_back(FrontierEntry { paper: root, depth: 0 });

        while let Some(entry) = self.frontier.pop_front() {
            if entry.depth > self.config.max_depth {
                tracing::debug!(
                    "Not expanding {} at depth {} (max {})",
                    entry.paper.paper_id,
                    entry.depth,
                    self.config.max_depth
                );
                continue;
            }
            self.expand(entry).await?;
        }

        let path = self.checkpoint().await?;
        if self.config.write_snapshot {
            self.store.write_snapshot().await?;
        }
        tracing::info!(
            "Done. {} nodes, {} edges, {} papers fetched, {} from cache, {} failed | etime: {} | graph: {}",
            self.graph.node_count(),
            self.graph.edge_count(),
            self.stats.fetched,
            self.stats.cached,
            self.stats.failed,
            format_elapsed(self.started.elapsed()),
            path.display()
        );
        Ok(self.stats.clone())
    }

    async fn expand(&mut self, entry: FrontierEntry) -> Result<()> {
        let FrontierEntry { paper, depth } = entry;

        for citation in &paper.citations {
            let Some(citing_id) = citation.resolved_id() else {
                self.stats.done += 1;
                self.stats.skipped_unresolved += 1;
                continue;
            };

            let citing = match load_or_fetch(&self.client, &mut self.store, citing_id).await? {
                Lookup::Cached(found) => {
                    self.stats.cached += 1;
                    found
                }
                Lookup::Fetched(found) => {
                    self.stats.fetched += 1;
                    self.new_papers += 1;
                    found
                }
                Lookup::Failed(e) => {
                    tracing::warn!("Skipping citation {} of {}: {}", citing_id, paper.paper_id, e);
                    self.stats.done += 1;
                    self.stats.failed += 1;
                    continue;
                }
            };
            self.stats.done += 1;

            if citing.influential_citation_count >= self.config.min_influential_citation_count {
                if self.graph.add_citation_edge(&citing, &paper) {
                    self.stats.edges += 1;
                }
                self.report_edge(&paper, &citing, depth);

                if self.visited.insert(citing.paper_id.clone()) {
                    self.stats.total += citing.citations.len();
                    self.frontier.push_back(FrontierEntry {
                        paper: citing,
                        depth: depth + 1,
                    });
                }
            } else {
                tracing::debug!(
                    "{} -> {} below influence threshold (icc {})",
                    paper.paper_id,
                    citing.paper_id,
                    citing.influential_citation_count
                );
            }

            let interval = self.config.checkpoint_interval;
            if interval > 0 && self.new_papers >= interval {
                self.checkpoint().await?;
            }
        }
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<PathBuf> {
        let path = self.config.checkpoint_path();
        self.graph.save_graphml(&path).await?;
        self.new_papers = 0;
        self.stats.checkpoints += 1;
        tracing::info!(
            "-> {:5}/{:5} ({:5.1}%) | etime: {} | exported -> {}",
            self.stats.done,
            self.stats.total,
            self.stats.percent(),
            format_elapsed(self.started.elapsed()),
            path.display()
        );
        Ok(path)
    }

    fn report_edge(&self, paper: &PaperRecord, citing: &PaperRecord, depth: u32) {
        tracing::info!(
            "-> {:5}/{:5} ({:5.1}%) | etime: {} | papers: {:5} | {} -> {} @icc: {:4} | depth: {}",
            self.stats.done,
            self.stats.total,
            self.stats.percent(),
            format_elapsed(self.started.elapsed()),
            self.store.len(),
            short_id(&paper.paper_id),
            short_id(&citing.paper_id),
            citing.influential_citation_count,
            depth
        );
    }
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map(|(i, _)| &id[..i]).unwrap_or(id)
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:3}h {:2}m {:2}s", secs / 3600, secs % 3600 / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::discovery::tests::test_client;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn paper_json(id: &str, icc: u64, citations: &[Option<&str>]) -> Value {
        json!({
            "paperId": id,
            "title": format!("Paper {id}"),
            "year": 2020,
            "venue": "NeurIPS",
            "citationCount": 10 * icc,
            "influentialCitationCount": icc,
            "citations": citations
                .iter()
                .map(|c| json!({ "paperId": c, "title": format!("cites {c:?}") }))
                .collect::<Vec<_>>(),
        })
    }

    async fn mock_paper(
        server: &mut ServerGuard,
        id: &str,
        icc: u64,
        citations: &[Option<&str>],
        hits: usize,
    ) -> Mock {
        server
            .mock("GET", format!("/paper/{id}").as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(paper_json(id, icc, citations).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    fn config(dir: &TempDir) -> CrawlConfig {
        CrawlConfig {
            root_id: "R".to_string(),
            min_influential_citation_count: 1,
            max_depth: 3,
            checkpoint_interval: 1000,
            store_dir: dir.path().to_path_buf(),
            ..CrawlConfig::default()
        }
    }

    async fn engine(server: &Server, config: CrawlConfig) -> CrawlEngine {
        let store = PaperStore::open(&config.store_dir).await.unwrap();
        CrawlEngine::new(config, test_client(server), store)
    }

    #[tokio::test]
    async fn test_direct_citations_in_provider_order() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let mocks = vec![
            mock_paper(&mut server, "R", 0, &[Some("A"), Some("B"), Some("C")], 1).await,
            mock_paper(&mut server, "A", 2, &[], 1).await,
            mock_paper(&mut server, "B", 2, &[], 1).await,
            mock_paper(&mut server, "C", 2, &[], 1).await,
        ];

        let mut crawler = engine(&server, config(&dir)).await;
        let stats = crawler.run().await.unwrap();

        assert_eq!(crawler.graph().edges(), vec![("R", "A"), ("R", "B"), ("R", "C")]);
        assert_eq!(crawler.graph().node_count(), 4);
        assert_eq!(stats.fetched, 4);
        assert_eq!(stats.done, 3);
        assert_eq!(stats.total, 3);
        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_breadth_first_across_levels() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[Some("A"), Some("B")], 1).await;
        mock_paper(&mut server, "A", 1, &[Some("C")], 1).await;
        mock_paper(&mut server, "B", 1, &[Some("D")], 1).await;
        mock_paper(&mut server, "C", 1, &[Some("E")], 1).await;
        mock_paper(&mut server, "D", 1, &[], 1).await;
        mock_paper(&mut server, "E", 1, &[], 1).await;

        let mut crawler = engine(&server, config(&dir)).await;
        crawler.run().await.unwrap();

        assert_eq!(
            crawler.graph().edges(),
            vec![("R", "A"), ("R", "B"), ("A", "C"), ("B", "D"), ("C", "E")]
        );
    }

    #[tokio::test]
    async fn test_depth_limit_skips_children_but_drains_frontier() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[Some("A"), Some("C")], 1).await;
        mock_paper(&mut server, "A", 3, &[Some("B")], 1).await;
        let c = mock_paper(&mut server, "C", 3, &[Some("D")], 1).await;
        let b = mock_paper(&mut server, "B", 3, &[], 0).await;
        let d = mock_paper(&mut server, "D", 3, &[], 0).await;

        let mut crawler = engine(&server, CrawlConfig { max_depth: 0, ..config(&dir) }).await;
        let stats = crawler.run().await.unwrap();

        assert_eq!(crawler.graph().edges(), vec![("R", "A"), ("R", "C")]);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.done, 2);
        c.assert_async().await;
        b.assert_async().await;
        d.assert_async().await;
    }

    #[tokio::test]
    async fn test_influence_filter_caches_without_edge() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[Some("A"), Some("B")], 1).await;
        mock_paper(&mut server, "A", 0, &[Some("X")], 1).await;
        mock_paper(&mut server, "B", 3, &[], 1).await;
        let x = mock_paper(&mut server, "X", 9, &[], 0).await;

        let mut crawler = engine(&server, config(&dir)).await;
        let stats = crawler.run().await.unwrap();

        assert_eq!(crawler.graph().edges(), vec![("R", "B")]);
        assert!(!crawler.graph().contains_node("A"));
        assert!(crawler.store().contains("A"));
        assert_eq!(stats.done, 2);
        x.assert_async().await;
    }

    #[tokio::test]
    async fn test_resume_from_store_makes_no_remote_calls() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        {
            let mut store = PaperStore::open(dir.path()).await.unwrap();
            for (id, icc, cites) in [("R", 0, vec!["A", "B"]), ("A", 4, vec!["B"]), ("B", 4, vec![])] {
                let value = paper_json(id, icc, &cites.into_iter().map(Some).collect::<Vec<_>>());
                let wire: crate::layers::SSPaper = serde_json::from_value(value).unwrap();
                store.put(&PaperRecord::from(wire)).await.unwrap();
            }
        }
        let remote = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let store = PaperStore::resume(dir.path()).await.unwrap();
        let mut crawler = CrawlEngine::new(config(&dir), test_client(&server), store);
        let stats = crawler.run().await.unwrap();

        assert_eq!(stats.fetched, 0);
        assert_eq!(stats.cached, 4);
        assert_eq!(crawler.graph().edges(), vec![("R", "A"), ("R", "B"), ("A", "B")]);
        remote.assert_async().await;
    }

    #[tokio::test]
    async fn test_single_influential_citation_scenario() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        server
            .mock("GET", "/paper/R")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({ "paperId": "R", "title": "Root", "citations": [{ "paperId": "A", "title": "..." }] })
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/paper/A")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "paperId": "A",
                    "title": "Child",
                    "year": 2021,
                    "venue": "EMNLP",
                    "referenceCount": 30,
                    "citationCount": 40,
                    "influentialCitationCount": 5,
                    "authors": [{ "authorId": "9", "name": "Lin" }],
                    "fieldsOfStudy": ["Computer Science"]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut crawler = engine(&server, config(&dir)).await;
        crawler.run().await.unwrap();

        let graph = crawler.graph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edges(), vec![("R", "A")]);
        let a = graph.node("A").unwrap();
        assert_eq!(a.year, 2021);
        assert_eq!(a.venue, "EMNLP");
        assert_eq!(a.reference_count, 30);
        assert_eq!(a.citation_count, 40);
        assert_eq!(a.influential_citation_count, 5);
        assert_eq!(a.first_author_name, "Lin");
        assert_eq!(a.first_field_of_study, "Computer Science");
    }

    #[tokio::test]
    async fn test_failed_and_unresolved_citations_are_skipped() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[None, Some("A"), Some("B")], 1).await;
        let a = server
            .mock("GET", "/paper/A")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(5)
            .create_async()
            .await;
        mock_paper(&mut server, "B", 1, &[], 1).await;

        let mut crawler = engine(&server, config(&dir)).await;
        let stats = crawler.run().await.unwrap();

        assert_eq!(crawler.graph().edges(), vec![("R", "B")]);
        assert_eq!(stats.done, 3);
        assert_eq!(stats.skipped_unresolved, 1);
        assert_eq!(stats.failed, 1);
        assert!(!crawler.store().contains("A"));
        a.assert_async().await;
    }

    #[tokio::test]
    async fn test_cycles_do_not_reexpand() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 2, &[Some("A")], 1).await;
        mock_paper(&mut server, "A", 2, &[Some("R"), Some("B")], 1).await;
        mock_paper(&mut server, "B", 2, &[Some("A")], 1).await;

        let mut crawler = engine(&server, config(&dir)).await;
        crawler.run().await.unwrap();

        assert_eq!(
            crawler.graph().edges(),
            vec![("R", "A"), ("A", "R"), ("A", "B"), ("B", "A")]
        );
    }

    #[tokio::test]
    async fn test_renamed_paper_is_fetched_once() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[Some("old"), Some("A")], 1).await;
        mock_paper(&mut server, "A", 2, &[Some("old")], 1).await;
        let renamed = server
            .mock("GET", "/paper/old")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(paper_json("new", 2, &[]).to_string())
            .expect(1)
            .create_async()
            .await;

        let mut crawler = engine(&server, config(&dir)).await;
        let stats = crawler.run().await.unwrap();

        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.cached, 1);
        assert_eq!(
            crawler.graph().edges(),
            vec![("R", "new"), ("R", "A"), ("A", "new")]
        );
        assert!(crawler.store().contains("old"));
        renamed.assert_async().await;

        let store = PaperStore::resume(dir.path()).await.unwrap();
        assert!(store.contains("old"));
    }

    #[tokio::test]
    async fn test_resume_after_snapshot_uses_later_records() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        {
            let mut store = PaperStore::open(dir.path()).await.unwrap();
            for (id, icc, cites) in [("R", 0, vec!["A"]), ("A", 3, vec![])] {
                let value = paper_json(id, icc, &cites.into_iter().map(Some).collect::<Vec<_>>());
                let wire: crate::layers::SSPaper = serde_json::from_value(value).unwrap();
                store.put(&PaperRecord::from(wire)).await.unwrap();
                if id == "R" {
                    store.write_snapshot().await.unwrap();
                }
            }
        }
        let remote = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let store = PaperStore::resume(dir.path()).await.unwrap();
        let mut crawler = CrawlEngine::new(config(&dir), test_client(&server), store);
        let stats = crawler.run().await.unwrap();

        assert_eq!(stats.fetched, 0);
        assert_eq!(stats.cached, 2);
        assert_eq!(crawler.graph().edges(), vec![("R", "A")]);
        remote.assert_async().await;
    }

    #[tokio::test]
    async fn test_checkpoints_are_written_and_reloadable() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[Some("A"), Some("B")], 1).await;
        mock_paper(&mut server, "A", 1, &[], 1).await;
        mock_paper(&mut server, "B", 1, &[], 1).await;

        let config = CrawlConfig {
            checkpoint_interval: 1,
            write_snapshot: true,
            ..config(&dir)
        };
        let path = config.checkpoint_path();
        let mut crawler = engine(&server, config).await;
        let stats = crawler.run().await.unwrap();

        // one per new citation plus the final one
        assert_eq!(stats.checkpoints, 3);
        let reloaded = CitationGraph::load_graphml(&path).await.unwrap();
        assert_eq!(reloaded.edges(), vec![("R", "A"), ("R", "B")]);
        assert!(dir.path().join(crate::layers::store::SNAPSHOT_FILE).exists());
    }

    #[tokio::test]
    async fn test_resume_graph_keeps_checkpointed_edges() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let config = CrawlConfig {
            resume_graph: true,
            ..config(&dir)
        };

        let mut previous = CitationGraph::new();
        let mut x = PaperRecord::new("X");
        x.year = 1990;
        previous.add_citation_edge(&PaperRecord::new("Y"), &x);
        previous.save_graphml(&config.checkpoint_path()).await.unwrap();

        mock_paper(&mut server, "R", 0, &[Some("A")], 1).await;
        mock_paper(&mut server, "A", 1, &[], 1).await;

        let mut crawler = engine(&server, config).await;
        crawler.run().await.unwrap();

        assert_eq!(crawler.graph().edges(), vec![("X", "Y"), ("R", "A")]);
        assert_eq!(crawler.graph().node("X").unwrap().year, 1990);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_crawl() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_paper(&mut server, "R", 0, &[Some("A")], 1).await;
        mock_paper(&mut server, "A", 1, &[], 1).await;

        let mut crawler = engine(&server, config(&dir)).await;
        // A plain file where the shard directory for "A" should go.
        std::fs::write(dir.path().join("A"), b"").unwrap();

        let err = crawler.run().await.unwrap_err();
        assert!(err.is_persistence());
    }

    #[tokio::test]
    async fn test_root_fetch_failure_is_fatal() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        server
            .mock("GET", "/paper/R")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(5)
            .create_async()
            .await;

        let mut crawler = engine(&server, config(&dir)).await;
        assert!(matches!(crawler.run().await, Err(Error::RetriesExhausted { .. })));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "  1h  2m  3s");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("649def34f8be52c8"), "649def34");
        assert_eq!(short_id("R"), "R");
    }
}
