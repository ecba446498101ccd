use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::layers::resolution::{Candidate, Resolver};
use crate::layers::{PaperRecord, SSPaper};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Jitter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::io::ErrorKind;
use std::sync::Arc;

/// Fields requested for every full paper lookup.
pub const PAPER_FIELDS: &[&str] = &[
    "paperId",
    "url",
    "title",
    "abstract",
    "venue",
    "year",
    "referenceCount",
    "citationCount",
    "influentialCitationCount",
    "isOpenAccess",
    "fieldsOfStudy",
    "authors",
    "citations",
    "references",
    "embedding",
];

#[derive(Deserialize)]
struct SSSearchResult {
    #[serde(default)]
    data: Vec<SSSearchHit>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SSSearchHit {
    paper_id: Option<String>,
    title: Option<String>,
}

pub struct SemanticScholarClient {
    client: Client,
    config: ClientConfig,
    resolver: Resolver,
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl SemanticScholarClient {
    pub fn new(config: ClientConfig, resolver: Resolver) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        // One call per `call_delay`, no bursts. A zero delay turns the limiter off.
        let limiter = Quota::with_period(config.call_delay)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(nonzero!(1u32)))));

        Ok(Self {
            client,
            config,
            resolver,
            limiter,
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Looks a title up and returns the id of the first hit that scores above the
    /// resolver threshold. Failures degrade to `None`.
    pub async fn resolve(&self, title: &str) -> Option<String> {
        let query = Resolver::normalize(title);
        if query.is_empty() {
            return None;
        }

        let url = match self.search_url(&query) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Cannot build search URL for {:?}: {}", title, e);
                return None;
            }
        };

        let result: SSSearchResult = match self.get_json(url).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Title lookup failed for {:?}: {}", title, e);
                return None;
            }
        };

        let candidates: Vec<Candidate> = result
            .data
            .into_iter()
            .filter_map(|hit| {
                Some(Candidate {
                    paper_id: hit.paper_id.filter(|id| !id.is_empty())?,
                    title: hit.title.unwrap_or_default(),
                })
            })
            .collect();

        match self.resolver.best_match(&query, &candidates) {
            Some(hit) => Some(hit.paper_id.clone()),
            None => {
                tracing::debug!("No candidate above {} for {:?}", self.resolver.threshold(), title);
                None
            }
        }
    }

    /// Fetches the full record for `paper_id`. Errors once retries are exhausted.
    pub async fn fetch(&self, paper_id: &str) -> Result<PaperRecord> {
        let url = self.paper_url(paper_id)?;
        let paper: SSPaper = self.get_json(url).await?;
        let record = PaperRecord::from(paper);
        if !record.is_resolved() {
            return Err(Error::MissingPaperId(paper_id.to_string()));
        }
        Ok(record)
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let limit = self.config.search_limit.to_string();
        let url = Url::parse_with_params(
            &format!("{}/paper/search", self.base_url()),
            &[
                ("query", query),
                ("fields", "title"),
                ("offset", "0"),
                ("limit", limit.as_str()),
            ],
        )?;
        Ok(url)
    }

    fn paper_url(&self, paper_id: &str) -> Result<Url> {
        let fields = PAPER_FIELDS.join(",");
        let url = Url::parse_with_params(
            &format!("{}/paper/{}", self.base_url(), urlencoding::encode(paper_id)),
            &[("fields", fields.as_str())],
        )?;
        Ok(url)
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.wait_for_slot().await;

            tracing::debug!("Querying Semantic Scholar: {} (attempt {})", url, attempt);
            let failure = match self.send(&url).await {
                Ok(resp) => match resp.json::<T>().await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_decode() => return Err(Error::Http(e)),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(Error::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    source: failure,
                });
            }

            let backoff = if is_unreachable(&failure) {
                self.config.reset_delay
            } else {
                self.config.retry_delay
            };
            tracing::warn!(
                "Semantic Scholar request failed ({}), retrying in {:?} [{}/{}]",
                failure,
                backoff,
                attempt,
                max_attempts
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn send(&self, url: &Url) -> reqwest::Result<Response> {
        let mut request = self.client.get(url.clone());
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key);
        }
        request.send().await?.error_for_status()
    }

    async fn wait_for_slot(&self) {
        if let Some(limiter) = &self.limiter {
            limiter
                .until_ready_with_jitter(Jitter::up_to(self.config.call_jitter))
                .await;
        }
    }
}

/// True when the provider could not be reached at all or dropped the connection.
fn is_unreachable(err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::ConnectionRefused
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}
