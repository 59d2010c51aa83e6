use crate::domain::ml::dataset::Dataset;
use anyhow::Result;
use async_trait::async_trait;

/// Supplies time-ordered training data for a symbol.
///
/// Implemented by the feature-engineering side; the engine only consumes
/// it when a scheduled retrain fires.
#[async_trait]
pub trait TrainingDataProvider: Send + Sync {
    async fn training_data(&self, symbol: &str) -> Result<Option<Dataset>>;
}
