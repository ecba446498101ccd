use crate::error::{Error, Result};
use crate::layers::crawl::{load_or_fetch, Lookup};
use crate::layers::discovery::SemanticScholarClient;
use crate::layers::store::{json_files, write_atomic, PaperStore};
use crate::layers::ArxivProvenance;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

const ARXIV_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize, Deserialize)]
pub struct ArxivEntry {
    pub id: String,
    #[serde(default)]
    pub hash: String,
    pub title: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub primary_category: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub ss_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArxivEntry {
    fn provenance(&self) -> ArxivProvenance {
        ArxivProvenance {
            doi: self.doi.clone(),
            primary_category: self.primary_category.clone(),
            categories: self.categories.clone(),
            published: parse_arxiv_date(&self.published, &self.id),
            updated: parse_arxiv_date(&self.updated, &self.id),
            source_id: self.id.clone(),
            source_hash: self.hash.clone(),
            source_title: self.title.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub entries: usize,
    pub merged: usize,
    pub unresolved: usize,
    pub failed: usize,
}

pub async fn merge_arxiv(
    client: &SemanticScholarClient,
    store: &mut PaperStore,
    arxiv_dir: &Path,
) -> Result<MergeStats> {
    let mut stats = MergeStats::default();

    for path in json_files(arxiv_dir).await? {
        stats.entries += 1;

        let mut entry = match read_entry(&path).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                stats.failed += 1;
                continue;
            }
        };

        let paper_id = if entry.ss_id.is_empty() {
            client.resolve(&strip_inline_math(&entry.title)).await
        } else {
            Some(entry.ss_id.clone())
        };
        let Some(paper_id) = paper_id else {
            tracing::warn!("Cannot find paper id -> {}", entry.title);
            stats.unresolved += 1;
            continue;
        };

        let mut paper = match load_or_fetch(client, store, &paper_id).await? {
            Lookup::Cached(paper) | Lookup::Fetched(paper) => paper,
            Lookup::Failed(e) => {
                tracing::warn!("{} @{}", e, paper_id);
                stats.failed += 1;
                continue;
            }
        };

        paper.arxiv = Some(entry.provenance());
        store.put(&paper).await?;

        entry.ss_id = paper.paper_id.clone();
        let data = serde_json::to_vec_pretty(&entry).map_err(|e| Error::Record {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &data).await?;

        tracing::info!("{} -> {}", entry.id, paper.paper_id);
        stats.merged += 1;
    }

    tracing::info!(
        "Merged {}/{} arXiv entries ({} unresolved, {} failed)",
        stats.merged,
        stats.entries,
        stats.unresolved,
        stats.failed
    );
    Ok(stats)
}

async fn read_entry(path: &Path) -> Result<ArxivEntry> {
    let data = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| Error::Record {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Drops everything from the first `$` to the last one.
pub fn strip_inline_math(title: &str) -> String {
    match (title.find('$'), title.rfind('$')) {
        (Some(start), Some(end)) if start < end => {
            format!("{}{}", &title[..start], &title[end + 1..]).trim().to_string()
        }
        _ => title.trim().to_string(),
    }
}

fn parse_arxiv_date(raw: &str, entry_id: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(raw, ARXIV_DATE_FORMAT) {
        return Some(date);
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(date) => Some(date.naive_utc()),
        Err(e) => {
            tracing::warn!("Bad date {:?}: {} @{}", raw, e, entry_id);
            None
        }
    }
}
