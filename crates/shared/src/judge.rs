use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::JudgeError;
use crate::llm::{extract_json, LanguageModel};
use crate::models::{ArticleCandidate, PreferenceProfile, RelevanceEvaluation};
use crate::retry::RetryPolicy;

/// Marker prepended to notes when the profile gave nothing to match against.
pub const GENERAL_INTEREST_NOTE: &str = "[general-interest]";

/// Scores one candidate against a profile.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(
        &self,
        candidate: &ArticleCandidate,
        profile: &PreferenceProfile,
        cancel: &CancellationToken,
    ) -> Result<RelevanceEvaluation, JudgeError>;
}

pub struct RelevanceJudge {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl RelevanceJudge {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    fn build_prompt(candidate: &ArticleCandidate, profile: &PreferenceProfile) -> String {
        let snippet = candidate
            .snippet
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("[No preview for {}]", candidate.title));
        let geo = profile.geographic_focus.as_deref().unwrap_or("none");

        let preferences = if profile.is_general_interest() {
            format!(
                "The reader has not named any topics or keywords. Judge general newsworthiness \
                 (significance, breadth of impact, timeliness) and fit with the geographic focus.\n\
                 - Include opinion pieces: {}\n\
                 - Include analysis articles: {}\n\
                 - Geographic focus: {}",
                profile.include_opinion, profile.include_analysis, geo
            )
        } else {
            let topics = profile.topics.iter().cloned().collect::<Vec<_>>().join(", ");
            let keywords = if profile.keywords.is_empty() {
                "N/A".to_string()
            } else {
                profile.keywords.join(", ")
            };
            format!(
                "- Topics of interest: {}\n\
                 - Keywords to prioritize (highest priority first): {}\n\
                 - Include opinion pieces: {}\n\
                 - Include analysis articles: {}\n\
                 - Geographic focus: {}",
                topics, keywords, profile.include_opinion, profile.include_analysis, geo
            )
        };

        format!(
            r#"As a news curator, evaluate this article candidate based on the reader's preferences.

READER PREFERENCES:
{}

ARTICLE CANDIDATE:
- Title: {}
- Source: {}
- Snippet: {}

Decide whether the article is relevant, which keywords its title or snippet matches, whether it
is an opinion piece, an analysis article or straight news, and its geographic focus.

Respond with a single JSON object and nothing else:
{{
  "topics": ["likely topics covered"],
  "relevance_score": 0.0,
  "is_opinion": true | false | null,
  "is_analysis": true | false | null,
  "geographic_focus": "region" | null,
  "keywords_matched": ["matched keywords"],
  "evaluation_notes": "short reasoning"
}}

relevance_score must be a number between 0.0 and 1.0. Use null when you cannot tell."#,
            preferences,
            candidate.title.trim(),
            candidate.source,
            snippet
        )
    }

    async fn try_evaluate(
        &self,
        candidate: &ArticleCandidate,
        profile: &PreferenceProfile,
        prompt: &str,
    ) -> Result<RelevanceEvaluation, JudgeError> {
        let reply = self.model.invoke(prompt).await?;
        let evaluation = parse_evaluation(&reply, profile)?;
        debug!(
            title = %candidate.title,
            score = evaluation.relevance_score,
            "evaluated candidate"
        );
        Ok(evaluation)
    }
}

#[async_trait]
impl Judge for RelevanceJudge {
    async fn evaluate(
        &self,
        candidate: &ArticleCandidate,
        profile: &PreferenceProfile,
        cancel: &CancellationToken,
    ) -> Result<RelevanceEvaluation, JudgeError> {
        if candidate.title.trim().is_empty() {
            return Err(JudgeError::InvalidCandidate("empty title".to_string()));
        }

        let prompt = Self::build_prompt(candidate, profile);
        let label = format!("Judging \"{}\"", candidate.title.trim());
        self.retry
            .run(&label, cancel, |_| self.try_evaluate(candidate, profile, &prompt))
            .await
    }
}

#[derive(Deserialize)]
struct RawEvaluation {
    #[serde(default, alias = "topics_covered")]
    topics: Option<Vec<String>>,
    relevance_score: f64,
    #[serde(default)]
    is_opinion: Option<bool>,
    #[serde(default)]
    is_analysis: Option<bool>,
    #[serde(default)]
    geographic_focus: Option<String>,
    #[serde(default)]
    keywords_matched: Option<Vec<String>>,
    #[serde(default, alias = "notes")]
    evaluation_notes: Option<String>,
}

/// Validates the judge reply against the evaluation schema.
///
/// `relevance_score` is required and clamped into `[0, 1]`; any field of the wrong type is a
/// schema error. Matched keywords are kept only if they are among the profile's keywords.
pub fn parse_evaluation(
    reply: &str,
    profile: &PreferenceProfile,
) -> Result<RelevanceEvaluation, JudgeError> {
    let json = extract_json(reply)
        .ok_or_else(|| JudgeError::Schema("no JSON object in reply".to_string()))?;
    let raw: RawEvaluation =
        serde_json::from_str(json).map_err(|e| JudgeError::Schema(e.to_string()))?;

    if !raw.relevance_score.is_finite() {
        return Err(JudgeError::Schema("relevance_score is not finite".to_string()));
    }

    let topics_covered = raw
        .topics
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let keywords_matched: BTreeSet<String> = raw
        .keywords_matched
        .unwrap_or_default()
        .iter()
        .filter_map(|matched| {
            let matched = matched.trim().to_lowercase();
            profile
                .keywords
                .iter()
                .find(|k| k.trim().to_lowercase() == matched)
                .map(|k| k.trim().to_string())
        })
        .collect();

    let mut notes = raw.evaluation_notes.unwrap_or_default().trim().to_string();
    if profile.is_general_interest() {
        notes = format!("{} {}", GENERAL_INTEREST_NOTE, notes).trim().to_string();
    }

    Ok(RelevanceEvaluation {
        topics_covered,
        relevance_score: raw.relevance_score.clamp(0.0, 1.0),
        is_opinion: raw.is_opinion,
        is_analysis: raw.is_analysis,
        geographic_focus: raw
            .geographic_focus
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty()),
        keywords_matched,
        notes,
    })
}
