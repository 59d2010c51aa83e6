//! CSV-backed training data.
//!
//! Each file holds one time-ordered dataset: a header row, one column per
//! feature and a target column. Columns named in `ignored` (timestamps,
//! symbols) are skipped.

use crate::domain::ml::dataset::Dataset;
use crate::domain::ports::TrainingDataProvider;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_IGNORED_COLUMNS: [&str; 2] = ["timestamp", "symbol"];

/// Parse CSV from any reader into a dataset.
///
/// Empty cells become `NaN` so the learner's non-finite filter drops the row
/// instead of the loader rejecting the whole file.
pub fn read_dataset<R: Read>(reader: R, target_column: &str, ignored: &[&str]) -> Result<Dataset> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("Failed to read CSV header")?.clone();

    let target_idx = headers
        .iter()
        .position(|h| h.trim() == target_column)
        .with_context(|| format!("Target column '{}' not found in CSV header", target_column))?;

    let feature_idx: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != target_idx && !ignored.contains(&h.trim()))
        .map(|(i, _)| i)
        .collect();
    if feature_idx.is_empty() {
        bail!("CSV has no feature columns besides '{}'", target_column);
    }
    let feature_names: Vec<String> = feature_idx
        .iter()
        .map(|&i| headers[i].trim().to_string())
        .collect();

    let parse_cell = |raw: &str, row: usize, column: &str| -> Result<f64> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(f64::NAN);
        }
        raw.parse::<f64>()
            .with_context(|| format!("Row {}: column '{}' is not numeric: '{}'", row, column, raw))
    };

    let mut features = Vec::new();
    let mut targets = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV row {}", row))?;
        let target = parse_cell(record.get(target_idx).unwrap_or(""), row, target_column)?;
        let values = feature_idx
            .iter()
            .map(|&i| parse_cell(record.get(i).unwrap_or(""), row, &headers[i]))
            .collect::<Result<Vec<f64>>>()?;
        features.push(values);
        targets.push(target);
    }

    debug!(
        "CsvTrainingData: Read {} rows with {} features",
        targets.len(),
        feature_names.len()
    );
    Dataset::new(features, targets, feature_names).map_err(anyhow::Error::from)
}

/// Load a dataset from a CSV file.
pub fn load_dataset(path: &Path, target_column: &str) -> Result<Dataset> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    read_dataset(BufReader::new(file), target_column, &DEFAULT_IGNORED_COLUMNS)
        .with_context(|| format!("Failed to load training data from {:?}", path))
}

/// Serves `<dir>/<symbol>.csv` to the retrain loop.
pub struct CsvTrainingDataProvider {
    dir: PathBuf,
    target_column: String,
}

impl CsvTrainingDataProvider {
    pub fn new(dir: impl Into<PathBuf>, target_column: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            target_column: target_column.into(),
        }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }
}

#[async_trait]
impl TrainingDataProvider for CsvTrainingDataProvider {
    async fn training_data(&self, symbol: &str) -> Result<Option<Dataset>> {
        let path = self.path_for(symbol);
        if !path.exists() {
            warn!("CsvTrainingData: No training data for {} at {:?}", symbol, path);
            return Ok(None);
        }

        let target = self.target_column.clone();
        let dataset = tokio::task::spawn_blocking(move || load_dataset(&path, &target))
            .await
            .context("CSV loading task panicked")??;
        Ok(Some(dataset))
    }
}
