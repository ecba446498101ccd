use clap::ValueEnum;
use strsim::{jaro_winkler, normalized_levenshtein, sorensen_dice};

/// String similarity used to compare a query title with a provider title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SimilarityMetric {
    #[default]
    Levenshtein,
    JaroWinkler,
    SorensenDice,
}

impl SimilarityMetric {
    fn similarity(self, a: &str, b: &str) -> f64 {
        match self {
            SimilarityMetric::Levenshtein => normalized_levenshtein(a, b),
            SimilarityMetric::JaroWinkler => jaro_winkler(a, b),
            SimilarityMetric::SorensenDice => sorensen_dice(a, b),
        }
    }
}

impl std::str::FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// A search hit from the provider: just enough to pick an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub paper_id: String,
    pub title: String,
}

pub struct Resolver {
    threshold: f64,
    metric: SimilarityMetric,
}

impl Resolver {
    pub fn new(threshold: f64, metric: SimilarityMetric) -> Self {
        Self { threshold, metric }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Lower-cases, turns punctuation into spaces and collapses whitespace, so
    /// markup and hyphenation differences between sources do not count.
    pub fn normalize(text: &str) -> String {
        let spaced: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        spaced.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Similarity in [0, 1] between the normalized forms of both titles.
    pub fn score(&self, query: &str, candidate: &str) -> f64 {
        let query = Self::normalize(query);
        let candidate = Self::normalize(candidate);
        if query.is_empty() && candidate.is_empty() {
            return 0.0;
        }
        self.metric.similarity(&query, &candidate)
    }

    /// First candidate, in provider order, scoring strictly above the threshold.
    pub fn best_match<'a>(&self, query: &str, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        candidates.iter().find(|c| {
            let score = self.score(query, &c.title);
            tracing::debug!("Candidate: {} (score: {:.3})", c.title, score);
            score > self.threshold
        })
    }
}
