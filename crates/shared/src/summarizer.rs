use futures::stream::{self, StreamExt};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SummarizerError;
use crate::llm::LanguageModel;
use crate::models::{ArticleCandidate, Summary};
use crate::retry::RetryPolicy;
use crate::selection::DEFAULT_CONCURRENCY;

const MAX_CONTENT_CHARS: usize = 10_000;
const EXPECTED_SENTENCES: RangeInclusive<usize> = 3..=7;

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    concurrency_limit: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self {
            model,
            retry,
            concurrency_limit: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub async fn summarize(
        &self,
        article: &ArticleCandidate,
        cancel: &CancellationToken,
    ) -> Result<Summary, SummarizerError> {
        let content = article
            .full_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(SummarizerError::MissingContent)?;

        let prompt = build_prompt(article, truncate(content, MAX_CONTENT_CHARS));
        let label = format!("Summarizing \"{}\"", article.title.trim());

        let first = self
            .retry
            .run(&label, cancel, |_| self.try_summarize(article, &prompt))
            .await?;
        if EXPECTED_SENTENCES.contains(&first.sentence_count) {
            return Ok(first);
        }

        warn!(
            "Summary of \"{}\" has {} sentences, asking once more",
            article.title, first.sentence_count
        );
        match self
            .retry
            .run(&label, cancel, |_| self.try_summarize(article, &prompt))
            .await
        {
            Ok(second) => {
                if !EXPECTED_SENTENCES.contains(&second.sentence_count) {
                    warn!(
                        "Keeping summary of \"{}\" with {} sentences",
                        article.title, second.sentence_count
                    );
                }
                Ok(second)
            }
            Err(SummarizerError::Cancelled) => Err(SummarizerError::Cancelled),
            Err(e) => {
                warn!("Second summary attempt failed ({}), keeping the first", e);
                Ok(first)
            }
        }
    }

    async fn try_summarize(
        &self,
        article: &ArticleCandidate,
        prompt: &str,
    ) -> Result<Summary, SummarizerError> {
        let reply = self.model.invoke(prompt).await?;
        parse_summary(&reply, article)
    }

    /// Summarizes every article with bounded concurrency. Results come back in input order.
    pub async fn summarize_all(
        &self,
        articles: Vec<ArticleCandidate>,
        cancel: &CancellationToken,
    ) -> Vec<(ArticleCandidate, Result<Summary, SummarizerError>)> {
        let total = articles.len();
        let results: Vec<(ArticleCandidate, Result<Summary, SummarizerError>)> =
            stream::iter(articles)
                .map(|article| async move {
                    let result = if cancel.is_cancelled() {
                        Err(SummarizerError::Cancelled)
                    } else {
                        self.summarize(&article, cancel).await
                    };
                    if let Err(e) = &result {
                        warn!("Failed to summarize \"{}\": {}", article.title, e);
                    }
                    (article, result)
                })
                .buffered(self.concurrency_limit)
                .collect()
                .await;

        let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!("Summarized {}/{} articles", succeeded, total);
        results
    }
}

fn truncate(content: &str, max: usize) -> &str {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

fn build_prompt(article: &ArticleCandidate, content: &str) -> String {
    let link = article.url.as_deref().unwrap_or("");
    format!(
        r#"You are a news editor writing a daily digest. Summarize the article below.

RULES:
1. Write exactly 5 sentences of plain prose, no bullet points
2. Use ONLY facts from the article - no external knowledge
3. Keep a neutral tone

Title: {title}
Source: {source}
URL: {link}

Article:
{content}

Format your response exactly as:
## {title}

<five sentences>

*Source: {source}*

[Read more ↗]({link})"#,
        title = article.title.trim(),
        source = article.source_domain(),
        link = link,
        content = content
    )
}

/// Splits a reply into heading, body, source attribution and link.
pub fn parse_summary(reply: &str, article: &ArticleCandidate) -> Result<Summary, SummarizerError> {
    let mut heading = None;
    let mut body = Vec::new();
    let mut source = None;
    let mut link = None;

    for line in reply.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '-') {
            continue;
        }

        if heading.is_none() && trimmed.starts_with('#') {
            let title = trimmed.trim_start_matches('#').trim();
            if !title.is_empty() {
                heading = Some(title.to_string());
            }
            continue;
        }

        let unstyled = trimmed.trim_matches(|c| c == '*' || c == '_').trim();
        if let Some(rest) = unstyled.strip_prefix("Source:") {
            source = Some(rest.trim().to_string());
            continue;
        }

        // A body sentence may itself open with a link; only the trailer counts.
        if let Some((label, url)) = markdown_link(trimmed) {
            if source.is_some() || label.to_lowercase().starts_with("read more") {
                link = Some(url.to_string());
                continue;
            }
        }

        if heading.is_some() && source.is_none() {
            body.push(trimmed);
        }
    }

    let heading = heading.ok_or_else(|| SummarizerError::Malformed("no title heading".to_string()))?;
    let text = body.join(" ");
    if text.is_empty() {
        return Err(SummarizerError::Malformed("empty summary body".to_string()));
    }
    if source.is_none() {
        return Err(SummarizerError::Malformed("no source attribution".to_string()));
    }
    if article.url.is_some() && link.is_none() {
        return Err(SummarizerError::Malformed("no article link".to_string()));
    }

    Ok(Summary {
        title: heading,
        sentence_count: count_sentences(&text),
        text,
        source_domain: article.source_domain(),
        url: article.url.clone(),
    })
}

/// Label and target of a line that opens with `[label](target)`.
fn markdown_link(line: &str) -> Option<(&str, &str)> {
    let label_end = line.find("](")?;
    let label = line.strip_prefix('[')?.get(..label_end - 1)?;
    let rest = &line[label_end + 2..];
    let close = rest.find(')')?;
    Some((label.trim(), &rest[..close]))
}

/// Rough sentence count: terminal punctuation followed by whitespace or the end of text.
pub fn count_sentences(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0;
    let mut pending = false;

    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars
                .get(i + 1)
                .map_or(true, |next| next.is_whitespace() || matches!(next, '"' | '\'' | ')'));
            if pending && at_boundary {
                count += 1;
                pending = false;
            }
        } else if c.is_alphanumeric() {
            pending = true;
        }
    }

    if pending {
        count += 1;
    }
    count
}
