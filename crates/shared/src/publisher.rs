use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

pub trait Publisher: Send + Sync {
    /// Writes the document and returns where it landed.
    fn write(&self, document: &str, filename: &str) -> Result<PathBuf>;
}

/// Writes digests into `<vault>/<output_folder>/`, creating the folder as needed.
#[derive(Debug, Clone)]
pub struct VaultPublisher {
    vault_path: PathBuf,
    output_folder: String,
}

impl VaultPublisher {
    pub fn new(vault_path: impl Into<PathBuf>, output_folder: impl Into<String>) -> Self {
        Self {
            vault_path: vault_path.into(),
            output_folder: output_folder.into(),
        }
    }

    pub fn folder(&self) -> PathBuf {
        self.vault_path.join(&self.output_folder)
    }
}

impl Publisher for VaultPublisher {
    fn write(&self, document: &str, filename: &str) -> Result<PathBuf> {
        let folder = self.folder();
        fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create output folder {}", folder.display()))?;

        let filepath = folder.join(filename);
        fs::write(&filepath, document)
            .with_context(|| format!("Failed to write digest file {}", filepath.display()))?;

        Ok(filepath)
    }
}
