use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

use crate::error::JudgeError;

/// A raw article considered for the digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleCandidate {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

impl ArticleCandidate {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            url: None,
            snippet: None,
            full_text: None,
            published: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_full_text(mut self, text: impl Into<String>) -> Self {
        self.full_text = Some(text.into());
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    /// Identity used for deduplication: the normalized URL, or `title|source` without one.
    pub fn key(&self) -> CandidateKey {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => CandidateKey(normalize_url(url)),
            None => CandidateKey(format!(
                "{}|{}",
                normalize_text(&self.title),
                normalize_text(&self.source)
            )),
        }
    }

    /// Domain to show in attributions, preferring the URL host over the source label.
    pub fn source_domain(&self) -> String {
        self.url
            .as_deref()
            .and_then(extract_domain)
            .unwrap_or_else(|| self.source.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateKey(pub String);

impl std::fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases scheme and host, drops `www.`, the fragment and any trailing slash.
/// The query string is kept verbatim.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) => {
            let host = url
                .host_str()
                .map(|h| h.strip_prefix("www.").unwrap_or(h).to_string())
                .unwrap_or_default();
            let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            let path = url.path().trim_end_matches('/');
            let query = url.query().map(|q| format!("?{}", q)).unwrap_or_default();
            format!("{}://{}{}{}{}", url.scheme(), host, port, path, query)
        }
        Err(_) => {
            let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
            without_fragment.trim_end_matches('/').to_lowercase()
        }
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Host of a URL without the `www.` prefix.
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// What the reader wants in the digest. Fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceProfile {
    pub topics: BTreeSet<String>,
    /// Priority order is preserved.
    pub keywords: Vec<String>,
    pub include_opinion: bool,
    pub include_analysis: bool,
    pub geographic_focus: Option<String>,
    pub max_articles: i64,
    pub relevance_threshold: f64,
    #[serde(default)]
    pub preferred_sources: BTreeSet<String>,
    #[serde(default)]
    pub excluded_sources: BTreeSet<String>,
    #[serde(default)]
    pub max_age_hours: Option<i64>,
}

impl Default for PreferenceProfile {
    fn default() -> Self {
        Self {
            topics: ["world news", "technology", "science"]
                .into_iter()
                .map(String::from)
                .collect(),
            keywords: Vec::new(),
            include_opinion: true,
            include_analysis: true,
            geographic_focus: Some("global".to_string()),
            max_articles: 10,
            relevance_threshold: 0.7,
            preferred_sources: BTreeSet::new(),
            excluded_sources: BTreeSet::new(),
            max_age_hours: None,
        }
    }
}

impl PreferenceProfile {
    /// True when neither topics nor keywords give the judge anything to match against.
    pub fn is_general_interest(&self) -> bool {
        self.topics.iter().all(|t| t.trim().is_empty())
            && self.keywords.iter().all(|k| k.trim().is_empty())
    }

    pub fn is_preferred(&self, source: &str) -> bool {
        contains_source(&self.preferred_sources, source)
    }

    pub fn is_excluded(&self, source: &str) -> bool {
        contains_source(&self.excluded_sources, source)
    }
}

fn contains_source(set: &BTreeSet<String>, source: &str) -> bool {
    let source = source.trim().to_lowercase();
    let source = source.strip_prefix("www.").unwrap_or(&source);
    set.iter().any(|s| {
        let s = s.trim().to_lowercase();
        s.strip_prefix("www.").unwrap_or(&s) == source
    })
}

/// The judge's structured verdict on one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceEvaluation {
    pub topics_covered: BTreeSet<String>,
    pub relevance_score: f64,
    /// `None` means the judge could not tell.
    pub is_opinion: Option<bool>,
    pub is_analysis: Option<bool>,
    pub geographic_focus: Option<String>,
    pub keywords_matched: BTreeSet<String>,
    pub notes: String,
}

impl RelevanceEvaluation {
    /// Placeholder carried by candidates taken without asking the judge.
    pub fn unjudged() -> Self {
        Self {
            topics_covered: BTreeSet::new(),
            relevance_score: 0.0,
            is_opinion: None,
            is_analysis: None,
            geographic_focus: None,
            keywords_matched: BTreeSet::new(),
            notes: "[direct]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    Duplicate,
    PreviouslySeen,
    ExcludedSource,
    Stale,
    BelowThreshold,
    ExcludedType,
    OverBudget,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RejectReason::Duplicate => "duplicate",
            RejectReason::PreviouslySeen => "previously seen",
            RejectReason::ExcludedSource => "excluded source",
            RejectReason::Stale => "too old",
            RejectReason::BelowThreshold => "below threshold",
            RejectReason::ExcludedType => "excluded type",
            RejectReason::OverBudget => "over budget",
        };
        f.write_str(label)
    }
}

/// What happened to one candidate during selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelectionOutcome {
    Selected {
        evaluation: RelevanceEvaluation,
        /// 1-based position in the digest.
        rank: usize,
        /// Score used for ranking, after any preferred-source boost.
        score: f64,
    },
    Rejected {
        /// Absent for rejections decided before the judge ran.
        evaluation: Option<RelevanceEvaluation>,
        reason: RejectReason,
    },
    Failed {
        error: JudgeError,
    },
}

impl SelectionOutcome {
    pub fn is_selected(&self) -> bool {
        matches!(self, SelectionOutcome::Selected { .. })
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            SelectionOutcome::Selected { rank, .. } => Some(*rank),
            _ => None,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            SelectionOutcome::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn evaluation(&self) -> Option<&RelevanceEvaluation> {
        match self {
            SelectionOutcome::Selected { evaluation, .. } => Some(evaluation),
            SelectionOutcome::Rejected { evaluation, .. } => evaluation.as_ref(),
            SelectionOutcome::Failed { .. } => None,
        }
    }
}

/// Fixed-structure summary of one selected article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub text: String,
    pub source_domain: String,
    pub url: Option<String>,
    pub sentence_count: usize,
}
