use crate::domain::errors::TrainingError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Range;
use tracing::warn;

/// Minimum number of usable rows any learner accepts.
pub const MIN_TRAINING_ROWS: usize = 2;

/// Row-major feature matrix plus aligned targets, in time order.
///
/// Rows are kept exactly as supplied; filtering non-finite values is the
/// learner's job (see [`clean_training_rows`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub feature_names: Vec<String>,
}

impl Dataset {
    /// Build a dataset, checking shapes. Empty `feature_names` are replaced
    /// by generated `f0..fN` names.
    pub fn new(
        features: Vec<Vec<f64>>,
        targets: Vec<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self, TrainingError> {
        if features.len() != targets.len() {
            return Err(TrainingError::invalid(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }

        let width = features.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = features.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(TrainingError::invalid(format!(
                "row {} has {} features, expected {}",
                i,
                row.len(),
                width
            )));
        }

        let feature_names = if feature_names.is_empty() {
            (0..width).map(|i| format!("f{}", i)).collect()
        } else if feature_names.len() != width {
            return Err(TrainingError::invalid(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                width
            )));
        } else {
            feature_names
        };

        Ok(Self {
            features,
            targets,
            feature_names,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Contiguous time range of rows. Out-of-range bounds are clamped.
    pub fn slice(&self, range: Range<usize>) -> Dataset {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        Dataset {
            features: self.features[start..end].to_vec(),
            targets: self.targets[start..end].to_vec(),
            feature_names: self.feature_names.clone(),
        }
    }

    /// Rows at `indices`, duplicates allowed (bootstrap samples).
    pub fn select(&self, indices: &[usize]) -> Dataset {
        let mut features = Vec::with_capacity(indices.len());
        let mut targets = Vec::with_capacity(indices.len());
        for &i in indices.iter().filter(|&&i| i < self.len()) {
            features.push(self.features[i].clone());
            targets.push(self.targets[i]);
        }
        Dataset {
            features,
            targets,
            feature_names: self.feature_names.clone(),
        }
    }

    /// SHA-256 over feature names, row values and targets, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for name in &self.feature_names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        for (row, target) in self.features.iter().zip(&self.targets) {
            for value in row {
                hasher.update(value.to_le_bytes());
            }
            hasher.update(target.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Validate raw training input and drop rows with non-finite values.
///
/// Empty or mismatched input is rejected outright. Each dropped row is logged.
/// Fails if fewer than [`MIN_TRAINING_ROWS`] rows survive.
pub fn clean_training_rows(
    features: &[Vec<f64>],
    targets: &[f64],
) -> Result<(Vec<Vec<f64>>, Vec<f64>), TrainingError> {
    if features.is_empty() || targets.is_empty() {
        return Err(TrainingError::invalid("empty training data"));
    }
    if features.len() != targets.len() {
        return Err(TrainingError::invalid(format!(
            "{} feature rows but {} targets",
            features.len(),
            targets.len()
        )));
    }

    let width = features[0].len();
    if width == 0 {
        return Err(TrainingError::invalid("feature rows have no columns"));
    }

    let mut clean_features = Vec::with_capacity(features.len());
    let mut clean_targets = Vec::with_capacity(targets.len());

    for (i, (row, &target)) in features.iter().zip(targets).enumerate() {
        if row.len() != width {
            return Err(TrainingError::invalid(format!(
                "row {} has {} features, expected {}",
                i,
                row.len(),
                width
            )));
        }
        if !target.is_finite() {
            warn!("Dataset: Dropping row {} (non-finite target {})", i, target);
            continue;
        }
        if let Some(j) = row.iter().position(|v| !v.is_finite()) {
            warn!(
                "Dataset: Dropping row {} (non-finite value {} in feature {})",
                i, row[j], j
            );
            continue;
        }
        clean_features.push(row.clone());
        clean_targets.push(target);
    }

    if clean_targets.len() < MIN_TRAINING_ROWS {
        return Err(TrainingError::InsufficientData {
            usable: clean_targets.len(),
            required: MIN_TRAINING_ROWS,
        });
    }

    Ok((clean_features, clean_targets))
}
