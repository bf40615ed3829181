use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ConfigurationError, JudgeError};
use crate::judge::Judge;
use crate::models::{
    ArticleCandidate, CandidateKey, PreferenceProfile, RejectReason, RelevanceEvaluation,
    SelectionOutcome,
};

pub const DEFAULT_CONCURRENCY: usize = 5;
const PREFERRED_SOURCE_BOOST: f64 = 1.2;
/// Ten years.
const MAX_AGE_HOURS_LIMIT: i64 = 24 * 365 * 10;

/// Turns a batch of candidates into one outcome per candidate, in input order.
pub struct SelectionEngine {
    judge: Arc<dyn Judge>,
    concurrency_limit: usize,
    seen: HashSet<CandidateKey>,
    reference_time: Option<DateTime<Utc>>,
}

impl SelectionEngine {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self {
            judge,
            concurrency_limit: DEFAULT_CONCURRENCY,
            seen: HashSet::new(),
            reference_time: None,
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Keys published in earlier runs; matching candidates are rejected without judging.
    pub fn with_seen(mut self, seen: HashSet<CandidateKey>) -> Self {
        self.seen = seen;
        self
    }

    /// Fixes "now" for the max-age check.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn validate(&self, profile: &PreferenceProfile) -> Result<(), ConfigurationError> {
        if profile.max_articles < 1 {
            return Err(ConfigurationError::InvalidBudget(profile.max_articles));
        }
        if !(0.0..=1.0).contains(&profile.relevance_threshold) {
            return Err(ConfigurationError::InvalidThreshold(
                profile.relevance_threshold,
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigurationError::InvalidConcurrency);
        }
        if let Some(hours) = profile.max_age_hours {
            if !(1..=MAX_AGE_HOURS_LIMIT).contains(&hours) {
                return Err(ConfigurationError::InvalidMaxAge(hours));
            }
        }
        Ok(())
    }

    /// Rejects duplicate, previously seen, excluded and stale candidates. Returns the partial
    /// outcomes and the indices still open, in input order.
    fn prefilter(
        &self,
        candidates: &[ArticleCandidate],
        profile: &PreferenceProfile,
    ) -> (Vec<Option<SelectionOutcome>>, Vec<usize>) {
        let mut outcomes: Vec<Option<SelectionOutcome>> = vec![None; candidates.len()];
        let mut keys = HashSet::new();
        let mut open = Vec::new();

        let now = self.reference_time.unwrap_or_else(Utc::now);
        let cutoff = profile
            .max_age_hours
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_sub_signed(window));

        for (index, candidate) in candidates.iter().enumerate() {
            let key = candidate.key();
            let reason = if !keys.insert(key.clone()) {
                Some(RejectReason::Duplicate)
            } else if self.seen.contains(&key) {
                Some(RejectReason::PreviouslySeen)
            } else if profile.is_excluded(&candidate.source)
                || profile.is_excluded(&candidate.source_domain())
            {
                Some(RejectReason::ExcludedSource)
            } else if matches!((cutoff, candidate.published), (Some(cut), Some(published)) if published < cut)
            {
                Some(RejectReason::Stale)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    outcomes[index] = Some(SelectionOutcome::Rejected {
                        evaluation: None,
                        reason,
                    })
                }
                None => open.push(index),
            }
        }

        (outcomes, open)
    }

    /// Takes the first `max_articles` candidates that pass the pre-judge checks, in input
    /// order, without calling the judge.
    pub fn select_direct(
        &self,
        candidates: &[ArticleCandidate],
        profile: &PreferenceProfile,
    ) -> Result<Vec<SelectionOutcome>, ConfigurationError> {
        self.validate(profile)?;

        let (mut outcomes, open) = self.prefilter(candidates, profile);
        let budget = profile.max_articles as usize;
        for (position, index) in open.into_iter().enumerate() {
            outcomes[index] = Some(if position < budget {
                SelectionOutcome::Selected {
                    evaluation: RelevanceEvaluation::unjudged(),
                    rank: position + 1,
                    score: 0.0,
                }
            } else {
                SelectionOutcome::Rejected {
                    evaluation: None,
                    reason: RejectReason::OverBudget,
                }
            });
        }

        let outcomes: Vec<SelectionOutcome> = outcomes
            .into_iter()
            .map(|o| o.unwrap_or(SelectionOutcome::Failed { error: JudgeError::Cancelled }))
            .collect();
        info!(
            "Took {} of {} candidates without judging",
            OutcomeCounts::from_outcomes(&outcomes).selected,
            candidates.len()
        );
        Ok(outcomes)
    }

    pub async fn select(
        &self,
        candidates: &[ArticleCandidate],
        profile: &PreferenceProfile,
        cancel: &CancellationToken,
    ) -> Result<Vec<SelectionOutcome>, ConfigurationError> {
        self.validate(profile)?;

        let (mut outcomes, to_judge) = self.prefilter(candidates, profile);

        info!(
            "Judging {} of {} candidates ({} rejected before judging)",
            to_judge.len(),
            candidates.len(),
            candidates.len() - to_judge.len()
        );

        let judged: Vec<(usize, Result<RelevanceEvaluation, JudgeError>)> = stream::iter(to_judge)
            .map(|index| async move {
                let candidate = &candidates[index];
                let result = if cancel.is_cancelled() {
                    Err(JudgeError::Cancelled)
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(JudgeError::Cancelled),
                        result = self.judge.evaluate(candidate, profile, cancel) => result,
                    }
                };
                (index, result)
            })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;

        let mut acceptable = Vec::new();
        for (index, result) in judged {
            let candidate = &candidates[index];
            let evaluation = match result {
                Ok(evaluation) => evaluation,
                Err(error) => {
                    warn!("Failed to judge \"{}\": {}", candidate.title, error);
                    outcomes[index] = Some(SelectionOutcome::Failed { error });
                    continue;
                }
            };

            if let Some(reason) = filter_reason(&evaluation, profile) {
                outcomes[index] = Some(SelectionOutcome::Rejected {
                    evaluation: Some(evaluation),
                    reason,
                });
                continue;
            }

            let score = ranking_score(candidate, &evaluation, profile);
            acceptable.push((index, evaluation, score));
        }

        acceptable.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| b.1.keywords_matched.len().cmp(&a.1.keywords_matched.len()))
                .then_with(|| a.0.cmp(&b.0))
        });

        let budget = profile.max_articles as usize;
        for (position, (index, evaluation, score)) in acceptable.into_iter().enumerate() {
            outcomes[index] = Some(if position < budget {
                SelectionOutcome::Selected {
                    evaluation,
                    rank: position + 1,
                    score,
                }
            } else {
                SelectionOutcome::Rejected {
                    evaluation: Some(evaluation),
                    reason: RejectReason::OverBudget,
                }
            });
        }

        let outcomes: Vec<SelectionOutcome> = outcomes
            .into_iter()
            // Every index is filled above; a gap can only mean the task never reported back.
            .map(|o| o.unwrap_or(SelectionOutcome::Failed { error: JudgeError::Cancelled }))
            .collect();

        let counts = OutcomeCounts::from_outcomes(&outcomes);
        info!(
            "Selected {} articles from {} candidates ({} rejected, {} failed)",
            counts.selected,
            candidates.len(),
            counts.rejected_total(),
            counts.failed
        );

        Ok(outcomes)
    }
}

/// Why an evaluated candidate may not enter ranking. Unknown opinion/analysis never excludes.
fn filter_reason(
    evaluation: &RelevanceEvaluation,
    profile: &PreferenceProfile,
) -> Option<RejectReason> {
    if evaluation.relevance_score < profile.relevance_threshold {
        return Some(RejectReason::BelowThreshold);
    }
    let excluded_opinion = evaluation.is_opinion == Some(true) && !profile.include_opinion;
    let excluded_analysis = evaluation.is_analysis == Some(true) && !profile.include_analysis;
    if excluded_opinion || excluded_analysis {
        return Some(RejectReason::ExcludedType);
    }
    None
}

fn ranking_score(
    candidate: &ArticleCandidate,
    evaluation: &RelevanceEvaluation,
    profile: &PreferenceProfile,
) -> f64 {
    if profile.is_preferred(&candidate.source) || profile.is_preferred(&candidate.source_domain())
    {
        (evaluation.relevance_score * PREFERRED_SOURCE_BOOST).min(1.0)
    } else {
        evaluation.relevance_score
    }
}

/// Selected candidates in digest order.
pub fn ranked_selection<'a>(
    candidates: &'a [ArticleCandidate],
    outcomes: &'a [SelectionOutcome],
) -> Vec<(&'a ArticleCandidate, &'a RelevanceEvaluation, usize)> {
    let mut selected: Vec<_> = candidates
        .iter()
        .zip(outcomes)
        .filter_map(|(candidate, outcome)| match outcome {
            SelectionOutcome::Selected {
                evaluation, rank, ..
            } => Some((candidate, evaluation, *rank)),
            _ => None,
        })
        .collect();
    selected.sort_by_key(|(_, _, rank)| *rank);
    selected
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeCounts {
    pub selected: usize,
    pub rejected: BTreeMap<String, usize>,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn from_outcomes(outcomes: &[SelectionOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome {
                SelectionOutcome::Selected { .. } => counts.selected += 1,
                SelectionOutcome::Rejected { reason, .. } => {
                    *counts.rejected.entry(reason.to_string()).or_insert(0) += 1
                }
                SelectionOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn eval(score: f64) -> RelevanceEvaluation {
        RelevanceEvaluation {
            topics_covered: ["tech".to_string()].into_iter().collect(),
            relevance_score: score,
            is_opinion: None,
            is_analysis: None,
            geographic_focus: None,
            keywords_matched: BTreeSet::new(),
            notes: String::new(),
        }
    }

    fn with_keywords(mut evaluation: RelevanceEvaluation, keywords: &[&str]) -> RelevanceEvaluation {
        evaluation.keywords_matched = keywords.iter().map(|k| k.to_string()).collect();
        evaluation
    }

    /// Answers by candidate title, optionally after a delay, and records concurrency.
    #[derive(Default)]
    struct StubJudge {
        answers: HashMap<String, Result<RelevanceEvaluation, JudgeError>>,
        delays_ms: HashMap<String, u64>,
        judged: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StubJudge {
        fn new(answers: Vec<(&str, Result<RelevanceEvaluation, JudgeError>)>) -> Self {
            Self {
                answers: answers
                    .into_iter()
                    .map(|(title, answer)| (title.to_string(), answer))
                    .collect(),
                ..Self::default()
            }
        }

        fn delay(mut self, title: &str, ms: u64) -> Self {
            self.delays_ms.insert(title.to_string(), ms);
            self
        }

        fn judged(&self) -> Vec<String> {
            self.judged.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Judge for StubJudge {
        async fn evaluate(
            &self,
            candidate: &ArticleCandidate,
            _profile: &PreferenceProfile,
            _cancel: &CancellationToken,
        ) -> Result<RelevanceEvaluation, JudgeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.judged.lock().unwrap().push(candidate.title.clone());

            if let Some(ms) = self.delays_ms.get(&candidate.title) {
                tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.answers
                .get(&candidate.title)
                .cloned()
                .unwrap_or_else(|| Err(JudgeError::Schema("no scripted answer".to_string())))
        }
    }

    fn tech_profile(max_articles: i64, threshold: f64) -> PreferenceProfile {
        PreferenceProfile {
            topics: ["tech".to_string()].into_iter().collect(),
            keywords: Vec::new(),
            max_articles,
            relevance_threshold: threshold,
            ..PreferenceProfile::default()
        }
    }

    fn article(title: &str) -> ArticleCandidate {
        ArticleCandidate::new(title, "example.com")
            .with_url(format!("https://example.com/{}", title.to_lowercase()))
    }

    async fn run(
        judge: Arc<StubJudge>,
        candidates: &[ArticleCandidate],
        profile: &PreferenceProfile,
    ) -> Vec<SelectionOutcome> {
        SelectionEngine::new(judge)
            .select(candidates, profile, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_selects_top_scores_within_budget() {
        let judge = Arc::new(StubJudge::new(vec![
            ("A", Ok(eval(0.9))),
            ("B", Ok(eval(0.6))),
            ("C", Ok(eval(0.3))),
        ]));
        let candidates = vec![article("A"), article("B"), article("C")];

        let outcomes = run(judge, &candidates, &tech_profile(2, 0.5)).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].rank(), Some(1));
        assert_eq!(outcomes[1].rank(), Some(2));
        assert_eq!(outcomes[2].reject_reason(), Some(RejectReason::BelowThreshold));

        let ranked = ranked_selection(&candidates, &outcomes);
        let scores: Vec<f64> = ranked.iter().map(|(_, e, _)| e.relevance_score).collect();
        assert_eq!(scores, vec![0.9, 0.6]);
    }

    #[tokio::test]
    async fn test_duplicate_url_is_not_judged() {
        let judge = Arc::new(StubJudge::new(vec![("First", Ok(eval(0.8)))]));
        let candidates = vec![
            ArticleCandidate::new("First", "example.com").with_url("https://example.com/story"),
            ArticleCandidate::new("Second", "example.com").with_url("https://example.com/story/"),
        ];

        let outcomes = run(judge.clone(), &candidates, &tech_profile(5, 0.5)).await;

        assert!(outcomes[0].is_selected());
        assert_eq!(outcomes[1].reject_reason(), Some(RejectReason::Duplicate));
        assert_eq!(judge.judged(), vec!["First".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_budget_is_configuration_error() {
        let judge = Arc::new(StubJudge::new(vec![("A", Ok(eval(0.9)))]));
        let result = SelectionEngine::new(judge.clone())
            .select(&[article("A")], &tech_profile(0, 0.5), &CancellationToken::new())
            .await;

        assert_eq!(result, Err(ConfigurationError::InvalidBudget(0)));
        assert!(judge.judged().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_threshold_and_concurrency() {
        let judge = Arc::new(StubJudge::default());
        let result = SelectionEngine::new(judge.clone())
            .select(&[], &tech_profile(3, 1.5), &CancellationToken::new())
            .await;
        assert_eq!(result, Err(ConfigurationError::InvalidThreshold(1.5)));

        let result = SelectionEngine::new(judge)
            .with_concurrency(0)
            .select(&[], &tech_profile(3, 0.5), &CancellationToken::new())
            .await;
        assert_eq!(result, Err(ConfigurationError::InvalidConcurrency));
    }

    #[tokio::test]
    async fn test_failure_is_localized() {
        let judge = Arc::new(StubJudge::new(vec![
            ("A", Err(JudgeError::Schema("garbage".to_string()))),
            ("B", Ok(eval(0.7))),
        ]));
        let candidates = vec![article("A"), article("B")];

        let outcomes = run(judge, &candidates, &tech_profile(5, 0.5)).await;

        assert_eq!(
            outcomes[0],
            SelectionOutcome::Failed {
                error: JudgeError::Schema("garbage".to_string())
            }
        );
        assert_eq!(outcomes[1].rank(), Some(1));
    }

    #[tokio::test]
    async fn test_over_budget_rejections() {
        let judge = Arc::new(StubJudge::new(vec![
            ("A", Ok(eval(0.7))),
            ("B", Ok(eval(0.9))),
            ("C", Ok(eval(0.8))),
        ]));
        let candidates = vec![article("A"), article("B"), article("C")];

        let outcomes = run(judge, &candidates, &tech_profile(2, 0.5)).await;

        assert_eq!(outcomes[0].reject_reason(), Some(RejectReason::OverBudget));
        assert!(outcomes[0].evaluation().is_some());
        assert_eq!(outcomes[1].rank(), Some(1));
        assert_eq!(outcomes[2].rank(), Some(2));
    }

    #[tokio::test]
    async fn test_ties_broken_by_keywords_then_input_order() {
        let judge = Arc::new(StubJudge::new(vec![
            ("A", Ok(eval(0.8))),
            ("B", Ok(with_keywords(eval(0.8), &["ai"]))),
            ("C", Ok(eval(0.8))),
            ("D", Ok(with_keywords(eval(0.8), &["ai", "chips"]))),
        ]));
        let candidates = vec![article("A"), article("B"), article("C"), article("D")];

        let outcomes = run(judge, &candidates, &tech_profile(10, 0.5)).await;

        let ranks: Vec<Option<usize>> = outcomes.iter().map(|o| o.rank()).collect();
        assert_eq!(ranks, vec![Some(3), Some(2), Some(4), Some(1)]);
    }

    #[tokio::test]
    async fn test_content_type_filter() {
        let mut opinion = eval(0.9);
        opinion.is_opinion = Some(true);
        let mut analysis = eval(0.9);
        analysis.is_analysis = Some(true);
        let mut news = eval(0.9);
        news.is_opinion = Some(false);

        let judge = Arc::new(StubJudge::new(vec![
            ("Opinion", Ok(opinion)),
            ("Analysis", Ok(analysis)),
            ("Unknown", Ok(eval(0.9))),
            ("News", Ok(news)),
        ]));
        let candidates = vec![
            article("Opinion"),
            article("Analysis"),
            article("Unknown"),
            article("News"),
        ];
        let profile = PreferenceProfile {
            include_opinion: false,
            include_analysis: true,
            ..tech_profile(10, 0.5)
        };

        let outcomes = run(judge, &candidates, &profile).await;

        assert_eq!(outcomes[0].reject_reason(), Some(RejectReason::ExcludedType));
        assert!(outcomes[1].is_selected());
        assert!(outcomes[2].is_selected());
        assert!(outcomes[3].is_selected());
    }

    #[tokio::test]
    async fn test_output_keeps_input_order_under_concurrency() {
        let judge = Arc::new(
            StubJudge::new(vec![
                ("Slow", Ok(eval(0.6))),
                ("Medium", Ok(eval(0.7))),
                ("Fast", Ok(eval(0.8))),
            ])
            .delay("Slow", 40)
            .delay("Medium", 20),
        );
        let candidates = vec![article("Slow"), article("Medium"), article("Fast")];

        let outcomes = run(judge, &candidates, &tech_profile(3, 0.5)).await;

        let scores: Vec<f64> = outcomes
            .iter()
            .map(|o| o.evaluation().unwrap().relevance_score)
            .collect();
        assert_eq!(scores, vec![0.6, 0.7, 0.8]);
        assert_eq!(outcomes[2].rank(), Some(1));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let titles: Vec<String> = (0..8).map(|i| format!("T{}", i)).collect();
        let mut stub = StubJudge::new(
            titles
                .iter()
                .map(|t| (t.as_str(), Ok(eval(0.9))))
                .collect(),
        );
        for t in &titles {
            stub = stub.delay(t, 10);
        }
        let judge = Arc::new(stub);
        let candidates: Vec<ArticleCandidate> = titles.iter().map(|t| article(t)).collect();

        let outcomes = SelectionEngine::new(judge.clone())
            .with_concurrency(3)
            .select(&candidates, &tech_profile(8, 0.5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcomes.iter().filter(|o| o.is_selected()).count(), 8);
        assert!(judge.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_selection_is_deterministic() {
        let judge = Arc::new(StubJudge::new(vec![
            ("A", Ok(eval(0.8))),
            ("B", Ok(eval(0.8))),
            ("C", Ok(with_keywords(eval(0.75), &["x"]))),
        ]));
        let candidates = vec![article("A"), article("B"), article("C"), article("A")];
        let profile = tech_profile(2, 0.5);

        let first = run(judge.clone(), &candidates, &profile).await;
        let second = run(judge, &candidates, &profile).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_every_candidate() {
        let judge = Arc::new(StubJudge::new(vec![("A", Ok(eval(0.9))), ("B", Ok(eval(0.9)))]));
        let candidates = vec![article("A"), article("B"), article("A")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = SelectionEngine::new(judge.clone())
            .select(&candidates, &tech_profile(5, 0.5), &cancel)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], SelectionOutcome::Failed { error: JudgeError::Cancelled });
        assert_eq!(outcomes[1], SelectionOutcome::Failed { error: JudgeError::Cancelled });
        assert_eq!(outcomes[2].reject_reason(), Some(RejectReason::Duplicate));
        assert!(judge.judged().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_flight() {
        let judge = Arc::new(
            StubJudge::new(vec![("Quick", Ok(eval(0.9))), ("Stuck", Ok(eval(0.9)))])
                .delay("Stuck", 60_000),
        );
        let candidates = vec![article("Quick"), article("Stuck")];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcomes = SelectionEngine::new(judge)
            .select(&candidates, &tech_profile(5, 0.5), &cancel)
            .await
            .unwrap();

        assert_eq!(outcomes[0].rank(), Some(1));
        assert_eq!(outcomes[1], SelectionOutcome::Failed { error: JudgeError::Cancelled });
    }

    #[tokio::test]
    async fn test_pre_judge_rejections() {
        let now = Utc::now();
        let judge = Arc::new(StubJudge::new(vec![("Fresh", Ok(eval(0.9)))]));
        let seen_candidate = article("Seen");
        let candidates = vec![
            article("Fresh").with_published(now - Duration::hours(2)),
            article("Old").with_published(now - Duration::hours(48)),
            ArticleCandidate::new("Blocked", "tabloid.com").with_url("https://www.tabloid.com/x"),
            seen_candidate.clone(),
        ];
        let profile = PreferenceProfile {
            max_age_hours: Some(24),
            excluded_sources: ["tabloid.com".to_string()].into_iter().collect(),
            ..tech_profile(5, 0.5)
        };

        let outcomes = SelectionEngine::new(judge.clone())
            .with_seen([seen_candidate.key()].into_iter().collect())
            .with_reference_time(now)
            .select(&candidates, &profile, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcomes[0].is_selected());
        assert_eq!(outcomes[1].reject_reason(), Some(RejectReason::Stale));
        assert_eq!(outcomes[2].reject_reason(), Some(RejectReason::ExcludedSource));
        assert_eq!(outcomes[3].reject_reason(), Some(RejectReason::PreviouslySeen));
        assert_eq!(judge.judged(), vec!["Fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_out_of_range_max_age_is_configuration_error() {
        let judge = Arc::new(StubJudge::new(vec![("A", Ok(eval(0.9)))]));
        let engine = SelectionEngine::new(judge.clone());

        for hours in [0, -1, i64::MAX, MAX_AGE_HOURS_LIMIT + 1] {
            let profile = PreferenceProfile {
                max_age_hours: Some(hours),
                ..tech_profile(5, 0.5)
            };
            let result = engine
                .select(&[article("A")], &profile, &CancellationToken::new())
                .await;
            assert_eq!(result, Err(ConfigurationError::InvalidMaxAge(hours)));
        }
        assert!(judge.judged().is_empty());
    }

    #[tokio::test]
    async fn test_longest_max_age_keeps_old_articles() {
        let now = Utc::now();
        let judge = Arc::new(StubJudge::new(vec![("Archive", Ok(eval(0.9)))]));
        let candidates = vec![article("Archive").with_published(now - Duration::days(365))];
        let profile = PreferenceProfile {
            max_age_hours: Some(MAX_AGE_HOURS_LIMIT),
            ..tech_profile(5, 0.5)
        };

        let outcomes = SelectionEngine::new(judge)
            .with_reference_time(now)
            .select(&candidates, &profile, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcomes[0].is_selected());
    }

    #[test]
    fn test_direct_selection_takes_first_candidates_without_judging() {
        let judge = Arc::new(StubJudge::default());
        let candidates = vec![
            article("A"),
            article("A"),
            ArticleCandidate::new("Blocked", "tabloid.com").with_url("https://tabloid.com/x"),
            article("B"),
            article("C"),
        ];
        let profile = PreferenceProfile {
            excluded_sources: ["tabloid.com".to_string()].into_iter().collect(),
            ..tech_profile(2, 0.9)
        };

        let outcomes = SelectionEngine::new(judge.clone())
            .select_direct(&candidates, &profile)
            .unwrap();

        assert_eq!(outcomes[0].rank(), Some(1));
        assert_eq!(outcomes[1].reject_reason(), Some(RejectReason::Duplicate));
        assert_eq!(outcomes[2].reject_reason(), Some(RejectReason::ExcludedSource));
        assert_eq!(outcomes[3].rank(), Some(2));
        assert_eq!(outcomes[4].reject_reason(), Some(RejectReason::OverBudget));
        assert_eq!(
            outcomes[0].evaluation().map(|e| e.notes.as_str()),
            Some("[direct]")
        );
        assert!(judge.judged().is_empty());

        let result = SelectionEngine::new(judge).select_direct(&candidates, &tech_profile(0, 0.5));
        assert_eq!(result, Err(ConfigurationError::InvalidBudget(0)));
    }

    #[tokio::test]
    async fn test_preferred_source_boost_affects_rank() {
        let judge = Arc::new(StubJudge::new(vec![("Regular", Ok(eval(0.8))), ("Wire", Ok(eval(0.75)))]));
        let candidates = vec![
            article("Regular"),
            ArticleCandidate::new("Wire", "apnews.com").with_url("https://apnews.com/wire"),
        ];
        let profile = PreferenceProfile {
            preferred_sources: ["apnews.com".to_string()].into_iter().collect(),
            ..tech_profile(5, 0.5)
        };

        let outcomes = run(judge, &candidates, &profile).await;

        assert_eq!(outcomes[1].rank(), Some(1));
        match &outcomes[1] {
            SelectionOutcome::Selected { score, evaluation, .. } => {
                assert!((score - 0.9).abs() < 1e-9);
                assert_eq!(evaluation.relevance_score, 0.75);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_outcome_counts() {
        let outcomes = vec![
            SelectionOutcome::Selected {
                evaluation: eval(0.9),
                rank: 1,
                score: 0.9,
            },
            SelectionOutcome::Rejected {
                evaluation: None,
                reason: RejectReason::Duplicate,
            },
            SelectionOutcome::Rejected {
                evaluation: None,
                reason: RejectReason::Duplicate,
            },
            SelectionOutcome::Failed {
                error: JudgeError::Cancelled,
            },
        ];
        let counts = OutcomeCounts::from_outcomes(&outcomes);
        assert_eq!(counts.selected, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.rejected.get("duplicate"), Some(&2));
        assert_eq!(counts.rejected_total(), 2);
    }
}
