use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("paper {0} is not in the store")]
    NotFound(String),

    #[error("invalid paper id {0:?}")]
    InvalidId(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("request to {url} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("Semantic Scholar API error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Semantic Scholar returned a record without a paper id for {0}")]
    MissingPaperId(String),

    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("GraphML encoding failed: {0}")]
    GraphMlWrite(#[from] quick_xml::SeError),

    #[error("GraphML decoding failed: {0}")]
    GraphMlRead(#[from] quick_xml::DeError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// Disk-side failures. These abort a crawl; everything else is per-paper.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Record { .. } | Error::GraphMlWrite(_) | Error::GraphMlRead(_)
        )
    }
}
