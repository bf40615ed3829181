use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::CandidateKey;

/// Local data directory for run reports and the seen-URL set.
pub fn get_default_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join("news-digest");

    fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

    Ok(data_dir)
}

pub fn seen_file(data_dir: &Path) -> PathBuf {
    data_dir.join("seen.json")
}

/// Keys published by earlier runs. A missing file is an empty set.
pub fn load_seen(path: &Path) -> Result<HashSet<CandidateKey>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seen file: {}", path.display()))?;

    let keys: Vec<CandidateKey> = serde_json::from_str(&content).with_context(|| {
        format!(
            "Failed to parse seen file {}. Delete it to start fresh.",
            path.display()
        )
    })?;

    Ok(keys.into_iter().collect())
}

/// Writes the set sorted so the file diffs cleanly between runs.
pub fn save_seen(path: &Path, seen: &HashSet<CandidateKey>) -> Result<()> {
    let mut keys: Vec<&CandidateKey> = seen.iter().collect();
    keys.sort();

    let json = serde_json::to_string_pretty(&keys).context("Failed to serialize seen set")?;
    fs::write(path, json).context("Failed to write seen file")?;

    Ok(())
}

/// Saves a run report as `report-<timestamp>.json` and returns its path.
pub fn save_report<T: Serialize>(data_dir: &Path, report: &T, at: DateTime<Utc>) -> Result<PathBuf> {
    let filepath = data_dir.join(format!("report-{}.json", at.format("%Y-%m-%dT%H%M%S")));

    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    fs::write(&filepath, json).context("Failed to write run report")?;

    Ok(filepath)
}
