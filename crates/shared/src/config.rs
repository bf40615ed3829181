use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::llm::DEFAULT_MODEL;
use crate::models::PreferenceProfile;
use crate::retry::RetryPolicy;
use crate::selection::DEFAULT_CONCURRENCY;

/// Run-scoped knobs that are not part of the reader's preferences.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
    pub run_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            run_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub model_name: String,
    pub vault_path: String,
    pub output_folder: String,
    pub news_sources: Vec<String>,
    pub preferences: PreferenceProfile,
    pub settings: RunSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unparseable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let anthropic_api_key = get("ANTHROPIC_API_KEY").context(
            "ANTHROPIC_API_KEY not found.\n\n\
            To fix this, create ~/.config/news-digest/.env with:\n  \
            ANTHROPIC_API_KEY=your_key_here\n  \
            OBSIDIAN_VAULT_PATH=/path/to/vault\n\n\
            Get your Anthropic API key from: https://console.anthropic.com/settings/keys",
        )?;

        let defaults = PreferenceProfile::default();
        let preferences = PreferenceProfile {
            topics: get("NEWS_TOPICS")
                .map(|v| split_list(&v).into_iter().collect())
                .unwrap_or(defaults.topics),
            keywords: get("NEWS_KEYWORDS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.keywords),
            include_opinion: parse_opt(&get, "NEWS_INCLUDE_OPINION", parse_bool)?
                .unwrap_or(defaults.include_opinion),
            include_analysis: parse_opt(&get, "NEWS_INCLUDE_ANALYSIS", parse_bool)?
                .unwrap_or(defaults.include_analysis),
            geographic_focus: get("NEWS_GEOGRAPHIC_FOCUS")
                .map(|v| split_list(&v).join(", "))
                .or(defaults.geographic_focus),
            max_articles: parse_opt(&get, "NEWS_MAX_ARTICLES", parse_num::<i64>)?
                .unwrap_or(defaults.max_articles),
            relevance_threshold: parse_opt(&get, "NEWS_RELEVANCE_THRESHOLD", parse_num::<f64>)?
                .unwrap_or(defaults.relevance_threshold),
            preferred_sources: get("NEWS_PREFERRED_SOURCES")
                .map(|v| split_list(&v).into_iter().collect::<BTreeSet<_>>())
                .unwrap_or(defaults.preferred_sources),
            excluded_sources: get("NEWS_EXCLUDED_SOURCES")
                .map(|v| split_list(&v).into_iter().collect::<BTreeSet<_>>())
                .unwrap_or(defaults.excluded_sources),
            max_age_hours: parse_opt(&get, "NEWS_MAX_AGE_HOURS", parse_num::<i64>)?
                .or(defaults.max_age_hours),
        };

        let default_settings = RunSettings::default();
        let settings = RunSettings {
            concurrency_limit: parse_opt(&get, "NEWS_CONCURRENCY", parse_num::<usize>)?
                .unwrap_or(default_settings.concurrency_limit),
            retry: RetryPolicy::new(
                parse_opt(&get, "NEWS_RETRY_LIMIT", parse_num::<u32>)?
                    .unwrap_or(default_settings.retry.max_retries),
                parse_opt(&get, "NEWS_RETRY_BACKOFF_MS", parse_num::<u64>)?
                    .map(Duration::from_millis)
                    .unwrap_or(default_settings.retry.backoff),
            ),
            run_timeout: parse_opt(&get, "NEWS_RUN_TIMEOUT_SECS", parse_num::<u64>)?
                .map(Duration::from_secs),
        };

        Ok(Self {
            anthropic_api_key,
            model_name: get("NEWS_DIGEST_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            vault_path: get("OBSIDIAN_VAULT_PATH").unwrap_or_else(|| "./output".to_string()),
            output_folder: get("NEWS_OUTPUT_FOLDER").unwrap_or_else(|| "Daily_news".to_string()),
            news_sources: get("NEWS_SOURCES").map(|v| split_list(&v)).unwrap_or_else(|| {
                vec![
                    "https://www.apnews.com/".to_string(),
                    "https://www.c-span.org/".to_string(),
                ]
            }),
            preferences,
            settings,
        })
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/news-digest/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("news-digest").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => bail!("expected true/false, got {:?}", other),
    }
}

fn parse_num<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(value.trim().parse::<T>()?)
}

fn parse_opt<T, G, P>(get: &G, key: &str, parse: P) -> Result<Option<T>>
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T>,
{
    get(key)
        .map(|v| parse(&v).with_context(|| format!("Invalid value for {}: {:?}", key, v)))
        .transpose()
}
