use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

/// A file inside a [`DocumentFolder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    pub name: String,
    pub size: u64,
}

/// Flat folder of named documents that backups are written to.
pub trait DocumentFolder: Send + Sync {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<DocumentEntry>;

    fn list(&self) -> Result<Vec<DocumentEntry>>;

    fn read(&self, name: &str) -> Result<Vec<u8>>;

    fn delete(&self, name: &str) -> Result<()>;
}

/// Documents in a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("invalid document name '{name}'");
        }
        Ok(self.root.join(name))
    }
}

impl DocumentFolder for LocalFolder {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<DocumentEntry> {
        let path = self.entry_path(name)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create folder {}", self.root.display()))?;
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(DocumentEntry {
            name: name.to_string(),
            size: bytes.len() as u64,
        })
    }

    fn list(&self) -> Result<Vec<DocumentEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to list {}", self.root.display()))?
        {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                entries.push(DocumentEntry {
                    name: name.to_string(),
                    size: metadata.len(),
                });
            }
        }
        Ok(entries)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(name)?;
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.entry_path(name)?;
        fs::remove_file(&path).with_context(|| format!("failed to delete {}", path.display()))
    }
}
