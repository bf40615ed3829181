use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use shared::{
    ArticleSource, ClaudeClient, Config, DigestPipeline, JsonFileSource, LanguageModel,
    RelevanceJudge, RunReport, SelectionEngine, SelectionMode, SelectionOutcome, Summarizer,
    VaultPublisher, WebSource,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "news-digest")]
#[command(about = "Select, summarize and publish a daily news digest to an Obsidian vault")]
struct Args {
    /// News front pages to scan (overrides NEWS_SOURCES)
    #[arg(long, num_args = 1..)]
    sources: Option<Vec<String>>,

    /// Maximum number of articles in the digest (overrides NEWS_MAX_ARTICLES)
    #[arg(short, long)]
    max_articles: Option<i64>,

    /// Read candidates from a JSON file instead of the web
    #[arg(long)]
    candidates: Option<PathBuf>,

    /// Select only: print the selection and save the run report, publish nothing
    #[arg(long)]
    dry_run: bool,

    /// Skip the relevance judge and take the first fetched articles
    #[arg(long, conflicts_with = "fallback_direct")]
    direct_only: bool,

    /// If no article passes selection, take the first fetched articles instead
    #[arg(long)]
    fallback_direct: bool,

    /// Ignore articles published by earlier runs, and don't remember this one
    #[arg(long)]
    no_seen: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,shared=info,news_digest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;

    if let Some(sources) = args.sources {
        config.news_sources = sources;
    }
    if let Some(max_articles) = args.max_articles {
        config.preferences.max_articles = max_articles;
    }

    let data_dir = shared::get_default_data_dir()?;
    let seen_path = shared::seen_file(&data_dir);
    let mut seen = if args.no_seen {
        HashSet::new()
    } else {
        shared::load_seen(&seen_path)?
    };

    let model: Arc<dyn LanguageModel> = Arc::new(ClaudeClient::new(
        config.anthropic_api_key.clone(),
        config.model_name.clone(),
    )?);

    let source: Arc<dyn ArticleSource> = match &args.candidates {
        Some(path) => {
            println!("📂 Loading candidates from {}", path.display());
            Arc::new(JsonFileSource::new(path))
        }
        None => {
            println!(
                "📰 Fetching news from {} sources...",
                config.news_sources.len()
            );
            Arc::new(WebSource::new(config.news_sources.clone())?)
        }
    };
    // A candidates file is used whole; web sources yield up to a budget's worth each.
    let candidate_limit = if args.candidates.is_some() {
        usize::MAX
    } else {
        (config.preferences.max_articles.max(1) as usize) * config.news_sources.len().max(1)
    };

    let settings = &config.settings;
    let judge = Arc::new(RelevanceJudge::new(model.clone(), settings.retry));
    let engine = SelectionEngine::new(judge)
        .with_concurrency(settings.concurrency_limit)
        .with_seen(seen.clone());
    let summarizer =
        Summarizer::new(model, settings.retry).with_concurrency(settings.concurrency_limit);
    let publisher = Arc::new(VaultPublisher::new(
        &config.vault_path,
        config.output_folder.clone(),
    ));

    let pipeline = DigestPipeline::new(source, engine, summarizer, publisher)
        .with_candidate_limit(candidate_limit)
        .with_run_timeout(settings.run_timeout)
        .dry_run(args.dry_run)
        .direct_only(args.direct_only)
        .fallback_to_direct(args.fallback_direct);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⚠ Interrupted, cancelling pending work...");
            ctrl_c.cancel();
        }
    });

    if args.direct_only {
        println!("📋 Taking the first fetched articles (direct mode)...");
    } else {
        println!("🧠 Selecting articles with Claude AI...");
        println!("  (This may take a minute...)");
    }
    let report = pipeline.run(&config.preferences, &cancel).await?;

    print_selection(&report);

    let report_path = shared::save_report(&data_dir, &report, Utc::now())
        .context("Failed to save run report")?;
    println!("\n🗒  Run report saved to: {}", report_path.display());

    if report.dry_run {
        println!("\n✅ Dry run complete, nothing published");
        return Ok(());
    }

    if !report.summary_failures.is_empty() {
        println!(
            "\n⚠ Failed to summarize {} articles:",
            report.summary_failures.len()
        );
        for failure in &report.summary_failures {
            println!("  ✗ \"{}\": {}", failure.title, failure.error);
        }
    }

    match &report.published {
        Some(path) => {
            if !args.no_seen {
                seen.extend(report.published_keys.iter().cloned());
                shared::save_seen(&seen_path, &seen)?;
            }
            println!(
                "\n✅ News digest with {} articles published to: {}",
                report.summaries_written,
                path.display()
            );
        }
        None => println!("\n⚠ Run cancelled, no digest published"),
    }

    Ok(())
}

fn print_selection(report: &RunReport) {
    let counts = &report.counts;
    println!(
        "✓ Considered {} candidates: {} selected, {} rejected, {} failed",
        report.candidates.len(),
        counts.selected,
        counts.rejected_total(),
        counts.failed
    );

    if report.mode == SelectionMode::Fallback {
        println!("  ⚠ Nothing passed selection, fell back to the first fetched articles");
    }

    for (reason, count) in &counts.rejected {
        println!("  - {}: {}", reason, count);
    }

    for candidate in report.selected() {
        if let SelectionOutcome::Selected { rank, score, .. } = &candidate.outcome {
            println!("  {:>2}. [{:.2}] {} ({})", rank, score, candidate.title, candidate.source);
        }
    }

    for candidate in &report.candidates {
        if let SelectionOutcome::Failed { error } = &candidate.outcome {
            println!("  ✗ \"{}\": {}", candidate.title, error);
        }
    }
}
