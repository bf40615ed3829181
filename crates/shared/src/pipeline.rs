use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::digest::{digest_filename, DigestAssembler, MarkdownDigest};
use crate::error::SummarizerError;
use crate::models::{ArticleCandidate, CandidateKey, PreferenceProfile, SelectionOutcome};
use crate::publisher::Publisher;
use crate::selection::{ranked_selection, OutcomeCounts, SelectionEngine};
use crate::source::ArticleSource;
use crate::summarizer::Summarizer;

/// How many candidates to ask the source for, per article in the budget.
const CANDIDATE_POOL_FACTOR: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub title: String,
    pub source: String,
    pub key: CandidateKey,
    pub outcome: SelectionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryFailure {
    pub title: String,
    pub key: CandidateKey,
    pub error: SummarizerError,
}

/// How the digest's articles were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Judged,
    /// First fetched candidates, no judge calls.
    Direct,
    /// Judging selected nothing, so the first fetched candidates were taken instead.
    Fallback,
}

/// Everything a run decided, one entry per fetched candidate.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub mode: SelectionMode,
    pub candidates: Vec<CandidateReport>,
    pub counts: OutcomeCounts,
    pub summaries_written: usize,
    pub summary_failures: Vec<SummaryFailure>,
    /// Keys of the articles that made it into the published digest.
    pub published_keys: Vec<CandidateKey>,
    pub published: Option<PathBuf>,
}

impl RunReport {
    /// Selected candidates in rank order.
    pub fn selected(&self) -> Vec<&CandidateReport> {
        let mut selected: Vec<&CandidateReport> = self
            .candidates
            .iter()
            .filter(|c| c.outcome.is_selected())
            .collect();
        selected.sort_by_key(|c| c.outcome.rank());
        selected
    }
}

/// Fetch, select, summarize, assemble and publish one digest.
pub struct DigestPipeline {
    source: Arc<dyn ArticleSource>,
    engine: SelectionEngine,
    summarizer: Summarizer,
    publisher: Arc<dyn Publisher>,
    assembler: Option<Box<dyn DigestAssembler>>,
    date: DateTime<Utc>,
    candidate_limit: Option<usize>,
    run_timeout: Option<Duration>,
    dry_run: bool,
    direct_only: bool,
    fallback_to_direct: bool,
}

impl DigestPipeline {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        engine: SelectionEngine,
        summarizer: Summarizer,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            source,
            engine,
            summarizer,
            publisher,
            assembler: None,
            date: Utc::now(),
            candidate_limit: None,
            run_timeout: None,
            dry_run: false,
            direct_only: false,
            fallback_to_direct: false,
        }
    }

    pub fn with_assembler(mut self, assembler: Box<dyn DigestAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Day the digest is dated and named for.
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = Some(limit);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Stop after selection: nothing is summarized or published.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Skip the judge and take the first `max_articles` fetched candidates.
    pub fn direct_only(mut self, direct_only: bool) -> Self {
        self.direct_only = direct_only;
        self
    }

    /// When judging selects nothing, take the first `max_articles` fetched candidates instead
    /// of publishing an empty digest. Off by default.
    pub fn fallback_to_direct(mut self, fallback: bool) -> Self {
        self.fallback_to_direct = fallback;
        self
    }

    /// Runs the whole digest. Only an invalid profile or a failed write is an error; every
    /// other failure is recorded in the report.
    ///
    /// Cancelling `cancel` stops pending calls and skips publishing. Hitting the run timeout
    /// also stops pending calls, but whatever was summarized by then is still published.
    pub async fn run(
        &self,
        profile: &PreferenceProfile,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        self.engine
            .validate(profile)
            .context("Invalid preference profile")?;

        let run_cancel = cancel.child_token();
        // Cancels the child token (and the timer below) when the run ends.
        let _guard = run_cancel.clone().drop_guard();

        if let Some(timeout) = self.run_timeout {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!("Run timed out after {:?}, cancelling pending work", timeout);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        let limit = self.candidate_limit.unwrap_or_else(|| {
            (profile.max_articles.max(1) as usize).saturating_mul(CANDIDATE_POOL_FACTOR)
        });
        let candidates = self.fetch(limit, &run_cancel).await;

        let (mode, outcomes) = self.choose(&candidates, profile, &run_cancel).await?;
        let counts = OutcomeCounts::from_outcomes(&outcomes);

        let mut report = RunReport {
            started_at,
            finished_at: started_at,
            dry_run: self.dry_run,
            cancelled: false,
            mode,
            candidates: candidates
                .iter()
                .zip(&outcomes)
                .map(|(candidate, outcome)| CandidateReport {
                    title: candidate.title.clone(),
                    source: candidate.source.clone(),
                    key: candidate.key(),
                    outcome: outcome.clone(),
                })
                .collect(),
            counts,
            summaries_written: 0,
            summary_failures: Vec::new(),
            published_keys: Vec::new(),
            published: None,
        };

        if self.dry_run {
            info!("Dry run, skipping summaries and publishing");
            report.cancelled = run_cancel.is_cancelled();
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let selected: Vec<ArticleCandidate> = ranked_selection(&candidates, &outcomes)
            .into_iter()
            .map(|(candidate, _, _)| candidate.clone())
            .collect();

        let mut entries = Vec::new();
        for (article, result) in self.summarizer.summarize_all(selected, &run_cancel).await {
            match result {
                Ok(summary) => entries.push((article, summary)),
                Err(error) => report.summary_failures.push(SummaryFailure {
                    title: article.title.clone(),
                    key: article.key(),
                    error,
                }),
            }
        }
        report.summaries_written = entries.len();
        report.cancelled = run_cancel.is_cancelled();

        if cancel.is_cancelled() {
            warn!("Run cancelled, digest not published");
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let document = match &self.assembler {
            Some(assembler) => assembler.render(&entries),
            None => MarkdownDigest::new(self.date).render(&entries),
        };
        let path = self
            .publisher
            .write(&document, &digest_filename(self.date))
            .context("Failed to publish digest")?;
        info!("Published digest with {} articles to {}", entries.len(), path.display());

        report.published_keys = entries.iter().map(|(article, _)| article.key()).collect();
        report.published = Some(path);
        report.finished_at = Utc::now();
        Ok(report)
    }

    async fn choose(
        &self,
        candidates: &[ArticleCandidate],
        profile: &PreferenceProfile,
        cancel: &CancellationToken,
    ) -> Result<(SelectionMode, Vec<SelectionOutcome>)> {
        if self.direct_only {
            let outcomes = self.engine.select_direct(candidates, profile)?;
            return Ok((SelectionMode::Direct, outcomes));
        }

        let judged = self.engine.select(candidates, profile, cancel).await?;
        if !self.fallback_to_direct
            || cancel.is_cancelled()
            || judged.iter().any(SelectionOutcome::is_selected)
        {
            return Ok((SelectionMode::Judged, judged));
        }

        let direct = self.engine.select_direct(candidates, profile)?;
        if !direct.iter().any(SelectionOutcome::is_selected) {
            return Ok((SelectionMode::Judged, judged));
        }
        warn!("No candidate passed selection, falling back to the first fetched articles");

        // Candidates the fallback leaves out keep their judged outcome.
        let outcomes = direct
            .into_iter()
            .zip(judged)
            .map(|(direct, judged)| if direct.is_selected() { direct } else { judged })
            .collect();
        Ok((SelectionMode::Fallback, outcomes))
    }

    async fn fetch(&self, limit: usize, cancel: &CancellationToken) -> Vec<ArticleCandidate> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Run cancelled while fetching candidates");
                return Vec::new();
            }
            fetched = self.source.fetch(limit) => fetched,
        };

        match fetched {
            Ok(candidates) => {
                info!("Fetched {} candidates", candidates.len());
                candidates
            }
            Err(e) => {
                warn!("Failed to fetch candidates, continuing with none: {}", e);
                Vec::new()
            }
        }
    }
}
