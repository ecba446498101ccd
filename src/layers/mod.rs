use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod crawl;
pub mod discovery;
pub mod graph;
pub mod merge;
pub mod resolution;
pub mod store;

pub const UNKNOWN_YEAR: i32 = -1;

fn unknown_year() -> i32 {
    UNKNOWN_YEAR
}

/// A paper as cached on disk and used throughout a crawl.
///
/// `paper_id` is the Semantic Scholar id. An empty id marks a paper that could not
/// be resolved; such records are never stored or added to the graph.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaperRecord {
    pub paper_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default = "unknown_year")]
    pub year: i32,
    #[serde(default)]
    pub reference_count: u64,
    #[serde(default)]
    pub citation_count: u64,
    #[serde(default)]
    pub influential_citation_count: u64,
    #[serde(default)]
    pub is_open_access: bool,
    #[serde(default)]
    pub fields_of_study: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub citations: Vec<PaperRef>,
    #[serde(default)]
    pub references: Vec<PaperRef>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub arxiv: Option<ArxivProvenance>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub model: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Author {
    pub author_id: String,
    pub name: String,
}

/// Entry of a citation or reference list. The provider leaves `paper_id` null
/// for works it could not link to a record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PaperRef {
    pub paper_id: Option<String>,
    #[serde(default)]
    pub title: String,
}

impl PaperRef {
    /// The linked id, if the provider resolved one.
    pub fn resolved_id(&self) -> Option<&str> {
        self.paper_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ArxivProvenance {
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub primary_category: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub published: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub source_hash: String,
    #[serde(default)]
    pub source_title: String,
}

impl PaperRecord {
    pub fn new(paper_id: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            url: String::new(),
            title: String::new(),
            abstract_text: String::new(),
            venue: String::new(),
            year: UNKNOWN_YEAR,
            reference_count: 0,
            citation_count: 0,
            influential_citation_count: 0,
            is_open_access: false,
            fields_of_study: Vec::new(),
            embedding: None,
            authors: Vec::new(),
            citations: Vec::new(),
            references: Vec::new(),
            created_at: Utc::now(),
            arxiv: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.paper_id.is_empty()
    }

    pub fn first_author(&self) -> Option<&Author> {
        self.authors.first()
    }

    pub fn first_field_of_study(&self) -> Option<&str> {
        self.fields_of_study.first().map(String::as_str)
    }

    pub fn primary_category(&self) -> &str {
        self.arxiv
            .as_ref()
            .map(|a| a.primary_category.as_str())
            .unwrap_or("")
    }
}

// Semantic Scholar wire format. Every field may be missing or null.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SSPaper {
    paper_id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    venue: Option<String>,
    year: Option<i32>,
    reference_count: Option<u64>,
    citation_count: Option<u64>,
    influential_citation_count: Option<u64>,
    is_open_access: Option<bool>,
    fields_of_study: Option<Vec<String>>,
    authors: Option<Vec<SSAuthor>>,
    citations: Option<Vec<SSPaperRef>>,
    references: Option<Vec<SSPaperRef>>,
    embedding: Option<SSEmbedding>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SSAuthor {
    author_id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SSPaperRef {
    paper_id: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct SSEmbedding {
    model: Option<String>,
    vector: Option<Vec<f32>>,
}

impl From<SSPaper> for PaperRecord {
    fn from(p: SSPaper) -> Self {
        let refs = |list: Option<Vec<SSPaperRef>>| -> Vec<PaperRef> {
            list.unwrap_or_default()
                .into_iter()
                .map(|r| PaperRef {
                    paper_id: r.paper_id,
                    title: r.title.unwrap_or_default(),
                })
                .collect()
        };

        PaperRecord {
            paper_id: p.paper_id.unwrap_or_default(),
            url: p.url.unwrap_or_default(),
            title: p.title.unwrap_or_default(),
            abstract_text: p.abstract_text.unwrap_or_default(),
            venue: p.venue.unwrap_or_default(),
            year: p.year.unwrap_or(UNKNOWN_YEAR),
            reference_count: p.reference_count.unwrap_or(0),
            citation_count: p.citation_count.unwrap_or(0),
            influential_citation_count: p.influential_citation_count.unwrap_or(0),
            is_open_access: p.is_open_access.unwrap_or(false),
            fields_of_study: p.fields_of_study.unwrap_or_default(),
            embedding: p.embedding.and_then(|e| {
                e.vector.map(|vector| Embedding {
                    model: e.model.unwrap_or_default(),
                    vector,
                })
            }),
            authors: p
                .authors
                .unwrap_or_default()
                .into_iter()
                .map(|a| Author {
                    author_id: a.author_id.unwrap_or_default(),
                    name: a.name.unwrap_or_default(),
                })
                .collect(),
            citations: refs(p.citations),
            references: refs(p.references),
            created_at: Utc::now(),
            arxiv: None,
        }
    }
}
