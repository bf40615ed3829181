use chrono::{DateTime, Local, Utc};

use crate::models::{ArticleCandidate, Summary};

pub const EMPTY_DIGEST: &str = "No major news today.";

/// Turns summarized articles, in digest order, into the published document.
pub trait DigestAssembler: Send + Sync {
    fn render(&self, entries: &[(ArticleCandidate, Summary)]) -> String;
}

/// Markdown digest for a note vault.
pub struct MarkdownDigest {
    date: DateTime<Utc>,
}

impl MarkdownDigest {
    pub fn new(date: DateTime<Utc>) -> Self {
        Self { date }
    }

    fn clean_inline(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn escape_link_target(url: &str) -> String {
        url.trim()
            .replace(' ', "%20")
            .replace('(', "%28")
            .replace(')', "%29")
    }

    fn render_entry(article: &ArticleCandidate, summary: &Summary) -> String {
        let mut md = String::new();

        let title = if summary.title.trim().is_empty() {
            &article.title
        } else {
            &summary.title
        };
        md.push_str(&format!("## {}\n\n", Self::clean_inline(title)));
        md.push_str(&format!("{}\n\n", summary.text.trim()));
        md.push_str(&format!(
            "*Source: {}*\n\n",
            Self::clean_inline(&summary.source_domain)
        ));

        if let Some(url) = summary.url.as_deref().or(article.url.as_deref()) {
            md.push_str(&format!("[Read more ↗]({})\n\n", Self::escape_link_target(url)));
        }

        md.push_str("---\n");
        md
    }
}

impl DigestAssembler for MarkdownDigest {
    fn render(&self, entries: &[(ArticleCandidate, Summary)]) -> String {
        if entries.is_empty() {
            return EMPTY_DIGEST.to_string();
        }

        let mut md = String::new();
        md.push_str(&format!(
            "# Global News Digest – {}\n\n",
            self.date.with_timezone(&Local).format("%A, %-d %B %Y")
        ));

        for (article, summary) in entries {
            md.push_str(&Self::render_entry(article, summary));
            md.push('\n');
        }

        md.trim_end().to_string() + "\n"
    }
}

/// File name for the digest of the given day, e.g. `Global News Digest – 17 Oct 2026.md`.
pub fn digest_filename(date: DateTime<Utc>) -> String {
    format!(
        "Global News Digest – {}.md",
        date.with_timezone(&Local).format("%d %b %Y")
    )
}
