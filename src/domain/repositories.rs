//! Repository Pattern Abstractions
//!
//! `MetadataRepository` persists the summary record of each trained model
//! (hyperparameters, importance, validation summary). Implementations live in
//! `infrastructure::persistence`: a JSON-file store for deployments and an
//! in-memory store for tests.

use crate::domain::ml::model::ModelMetadata;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn save(&self, metadata: &ModelMetadata) -> Result<()>;
    async fn load(&self, name: &str) -> Result<Option<ModelMetadata>>;
    async fn delete(&self, name: &str) -> Result<()>;
}
