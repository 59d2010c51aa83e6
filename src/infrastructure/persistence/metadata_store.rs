//! Model metadata persistence.
//!
//! One JSON document per model name. Only hyperparameters, importance and
//! the validation summary are stored; trained structure never is.

use crate::domain::ml::model::ModelMetadata;
use crate::domain::repositories::MetadataRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// File-system safe stem for a model name. Percent-encodes every byte
/// outside `[A-Za-z0-9_-]`, `%` included, so distinct names never share a file.
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' => stem.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).as_bytes() {
                    stem.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    stem
}

pub struct JsonFileMetadataRepository {
    dir: PathBuf,
}

impl JsonFileMetadataRepository {
    /// Store under `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create metadata directory {:?}", dir))?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(name)))
    }
}

#[async_trait]
impl MetadataRepository for JsonFileMetadataRepository {
    async fn save(&self, metadata: &ModelMetadata) -> Result<()> {
        let content = serde_json::to_string_pretty(metadata)
            .context("Failed to serialize model metadata")?;

        // Atomic write: unique temp file then rename
        let path = self.path_for(&metadata.name);
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", file_stem(&metadata.name), Uuid::new_v4()));
        tokio::fs::write(&temp_path, content)
            .await
            .context("Failed to write temp metadata file")?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .context("Failed to rename temp metadata file")?;

        info!("MetadataStore: Saved metadata for {} to {:?}", metadata.name, path);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<ModelMetadata>> {
        let path = self.path_for(name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read metadata file {:?}", path))?;
        let metadata: ModelMetadata =
            serde_json::from_str(&content).context("Failed to parse model metadata JSON")?;
        debug!("MetadataStore: Loaded metadata for {}", name);
        Ok(Some(metadata))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to delete metadata file {:?}", path))?;
        }
        Ok(())
    }
}

/// Non-durable store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryMetadataRepository {
    records: RwLock<HashMap<String, ModelMetadata>>,
}

impl InMemoryMetadataRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataRepository for InMemoryMetadataRepository {
    async fn save(&self, metadata: &ModelMetadata) -> Result<()> {
        self.records
            .write()
            .await
            .insert(metadata.name.clone(), metadata.clone());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<ModelMetadata>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }
}
