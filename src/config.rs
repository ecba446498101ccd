use crate::error::{Error, Result};
use crate::layers::resolution::SimilarityMetric;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Wait after an ordinary transport or HTTP failure.
    pub retry_delay: Duration,
    /// Wait after the provider was unreachable or reset the connection.
    pub reset_delay: Duration,
    /// Minimum spacing between consecutive calls. Zero disables rate limiting.
    pub call_delay: Duration,
    pub call_jitter: Duration,
    /// Size of the search window used by title resolution.
    pub search_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
            reset_delay: Duration::from_secs(300),
            call_delay: Duration::from_secs(3),
            call_jitter: Duration::from_millis(500),
            search_limit: 100,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env::var("SEMANTIC_SCHOLAR_BASE_URL").unwrap_or(defaults.base_url),
            api_key: env::var("SEMANTIC_SCHOLAR_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: env_secs("CRAWLER_TIMEOUT_SECS", defaults.timeout)?,
            call_delay: env_secs("CRAWLER_CALL_DELAY_SECS", defaults.call_delay)?,
            ..defaults
        })
    }
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub root_id: String,
    pub similarity_threshold: f64,
    pub similarity_metric: SimilarityMetric,
    /// Citations below this influential citation count get no edge and are not expanded.
    pub min_influential_citation_count: u64,
    /// Entries deeper than this are not expanded.
    pub max_depth: u32,
    /// Newly fetched papers between graph checkpoints. Zero checkpoints only at the end.
    pub checkpoint_interval: usize,
    pub store_dir: PathBuf,
    /// Defaults to `<store_dir>/<root_id>.graphml`.
    pub graph_path: Option<PathBuf>,
    pub resume_graph: bool,
    pub write_snapshot: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            root_id: String::new(),
            similarity_threshold: 0.95,
            similarity_metric: SimilarityMetric::default(),
            min_influential_citation_count: 1,
            max_depth: 3,
            checkpoint_interval: 1000,
            store_dir: PathBuf::from("__cache__/papers"),
            graph_path: None,
            resume_graph: false,
            write_snapshot: false,
        }
    }
}

impl CrawlConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            store_dir: env::var("CRAWLER_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            similarity_threshold: env_parse(
                "CRAWLER_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            min_influential_citation_count: env_parse(
                "CRAWLER_MIN_INFLUENTIAL_CITATIONS",
                defaults.min_influential_citation_count,
            )?,
            max_depth: env_parse("CRAWLER_MAX_DEPTH", defaults.max_depth)?,
            checkpoint_interval: env_parse(
                "CRAWLER_CHECKPOINT_INTERVAL",
                defaults.checkpoint_interval,
            )?,
            ..defaults
        })
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.graph_path
            .clone()
            .unwrap_or_else(|| self.store_dir.join(format!("{}.graphml", self.root_id)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_id.is_empty() {
            return Err(Error::Config("root paper id is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Config(format!(
                "similarity threshold {} is outside [0, 1]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}={raw:?} is not a valid value"))),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    env_parse(key, default.as_secs_f64()).map(Duration::from_secs_f64)
}
