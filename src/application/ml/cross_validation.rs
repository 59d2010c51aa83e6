//! Walk-forward cross-validation with overfitting detection.
//!
//! Folds use an expanding training window that always ends before its
//! validation window starts (optionally separated by an embargo gap). Each
//! fold trains a fresh clone of the model, so nothing learned in one fold
//! leaks into the next. Regression outputs are scored as direction calls
//! against a decision threshold.

use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use crate::domain::ml::dataset::Dataset;
use crate::domain::ml::learner::BaseLearner;
use crate::domain::ml::model::ValidationSummary;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvSettings {
    pub min_train_size: usize,
    pub min_validation_size: usize,
    pub max_folds: usize,
    /// Rows dropped between the end of training and the start of validation.
    pub gap: usize,
    /// Predictions and targets above this count as the positive class.
    pub decision_threshold: f64,
}

impl Default for CvSettings {
    fn default() -> Self {
        Self {
            min_train_size: 30,
            min_validation_size: 10,
            max_folds: 5,
            gap: 0,
            decision_threshold: 0.5,
        }
    }
}

/// Empirical penalty breakpoints. Tunable, not derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfittingPolicy {
    /// `(min average gap, multiplier)`, checked from the top.
    pub bands: Vec<(f64, f64)>,
    pub extreme_fold_gap: f64,
    pub extreme_fold_multiplier: f64,
    /// Majority-class share above which accuracy is discounted.
    pub class_skew_threshold: f64,
    pub class_skew_multiplier: f64,
    /// Accuracy above this is treated as implausible and capped.
    pub accuracy_ceiling: f64,
}

impl Default for OverfittingPolicy {
    fn default() -> Self {
        Self {
            bands: vec![(0.4, 0.5), (0.25, 0.7), (0.15, 0.85), (0.1, 0.95)],
            extreme_fold_gap: 0.5,
            extreme_fold_multiplier: 0.9,
            class_skew_threshold: 0.8,
            class_skew_multiplier: 0.9,
            accuracy_ceiling: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverfittingSeverity {
    None,
    Light,
    Moderate,
    Large,
    Heavy,
}

impl fmt::Display for OverfittingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverfittingSeverity::None => write!(f, "none"),
            OverfittingSeverity::Light => write!(f, "light"),
            OverfittingSeverity::Moderate => write!(f, "moderate"),
            OverfittingSeverity::Large => write!(f, "large"),
            OverfittingSeverity::Heavy => write!(f, "heavy"),
        }
    }
}

/// One time-ordered split. Ranges index into the dataset rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvFold {
    pub index: usize,
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

impl CvFold {
    /// Training ends at or before validation starts and the two index sets
    /// share nothing.
    pub fn is_leak_free(&self) -> bool {
        if self.train.is_empty() || self.validation.is_empty() {
            return true;
        }
        if self.train.end > self.validation.start {
            return false;
        }
        let train: HashSet<usize> = self.train.clone().collect();
        !self.validation.clone().any(|i| train.contains(&i))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_size: usize,
    pub validation_size: usize,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub overfitting_gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfittingAssessment {
    pub avg_gap: f64,
    pub max_gap: f64,
    pub severity: OverfittingSeverity,
    pub extreme_fold: bool,
    /// Share of the most common class among validation targets.
    pub majority_class_share: f64,
    /// Combined multiplier applied to every metric (skew excluded).
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub folds: Vec<FoldReport>,
    pub skipped_folds: usize,
    pub raw_accuracy: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub assessment: OverfittingAssessment,
    /// Accuracy hit the ceiling and was capped.
    pub clamped: bool,
}

impl CvReport {
    pub fn is_acceptable(&self, min_accuracy: f64) -> bool {
        self.accuracy >= min_accuracy && self.assessment.severity < OverfittingSeverity::Heavy
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            folds_used: self.folds.len(),
            accuracy: self.accuracy,
            precision: self.precision,
            recall: self.recall,
            f1: self.f1,
            avg_overfitting_gap: self.assessment.avg_gap,
            overfitting_severity: self.assessment.severity.to_string(),
        }
    }
}

/// Penalized metrics for one validation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenalizedScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub clamped: bool,
}

#[derive(Debug, Clone, Default)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

impl Confusion {
    fn tally(predictions: &[f64], targets: &[f64], threshold: f64) -> Self {
        let mut c = Confusion::default();
        for (&p, &y) in predictions.iter().zip(targets) {
            match (p > threshold, y > threshold) {
                (true, true) => c.tp += 1,
                (true, false) => c.fp += 1,
                (false, false) => c.tn += 1,
                (false, true) => c.fn_ += 1,
            }
        }
        c
    }

    fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn mean(values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values).mean().unwrap_or(0.0)
}

#[derive(Debug, Clone, Default)]
pub struct CrossValidator {
    settings: CvSettings,
    policy: OverfittingPolicy,
}

impl CrossValidator {
    pub fn new(settings: CvSettings) -> Self {
        Self {
            settings,
            policy: OverfittingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OverfittingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &CvSettings {
        &self.settings
    }

    /// Expanding-window folds over `n_samples` time-ordered rows.
    ///
    /// The fold count shrinks until every validation block can hold at
    /// least `min_validation_size` rows after the first `min_train_size`
    /// rows and the gap. Returns no folds when even one does not fit.
    pub fn plan_folds(&self, n_samples: usize) -> Vec<CvFold> {
        let s = &self.settings;
        let usable = n_samples.saturating_sub(s.min_train_size + s.gap);
        let min_val = s.min_validation_size.max(1);
        let k = s.max_folds.min(usable / min_val);
        if k == 0 {
            return Vec::new();
        }

        let block = usable / k;
        (0..k)
            .map(|i| {
                let start = s.min_train_size + s.gap + i * block;
                let end = if i + 1 == k { n_samples } else { start + block };
                CvFold {
                    index: i,
                    train: 0..start - s.gap,
                    validation: start..end,
                }
            })
            .collect()
    }

    pub fn validate(
        &self,
        model: &dyn BaseLearner,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> Result<CvReport, TrainingError> {
        let folds = self.plan_folds(data.len());
        self.validate_folds(model, data, &folds, cancel)
    }

    /// Evaluate explicit folds. Folds that are too small or that leak are
    /// skipped and do not count toward the averages.
    pub fn validate_folds(
        &self,
        model: &dyn BaseLearner,
        data: &Dataset,
        folds: &[CvFold],
        cancel: &CancellationToken,
    ) -> Result<CvReport, TrainingError> {
        let threshold = self.settings.decision_threshold;
        let mut reports = Vec::with_capacity(folds.len());
        let mut skipped = 0;
        let mut validation_positive = 0usize;
        let mut validation_total = 0usize;

        for fold in folds {
            cancel.check()?;

            let train_size = fold.train.len();
            let validation_size = fold.validation.len();
            if train_size < self.settings.min_train_size
                || validation_size < self.settings.min_validation_size
                || fold.validation.end > data.len()
            {
                debug!(
                    "CrossValidator: Skipping fold {} (train {}, validation {})",
                    fold.index, train_size, validation_size
                );
                skipped += 1;
                continue;
            }
            if !fold.is_leak_free() {
                warn!(
                    "CrossValidator: Skipping fold {}: training range {:?} overlaps validation {:?}",
                    fold.index, fold.train, fold.validation
                );
                skipped += 1;
                continue;
            }

            let train = data.slice(fold.train.clone());
            let validation = data.slice(fold.validation.clone());

            let mut learner = model.clone_untrained();
            if let Err(e) = learner.train(&train.features, &train.targets, cancel) {
                if e.is_interruption() {
                    return Err(e);
                }
                warn!("CrossValidator: Fold {} training failed, skipping: {}", fold.index, e);
                skipped += 1;
                continue;
            }

            let train_scores =
                Confusion::tally(&learner.predict_batch(&train.features), &train.targets, threshold);
            let val_scores = Confusion::tally(
                &learner.predict_batch(&validation.features),
                &validation.targets,
                threshold,
            );

            validation_positive += val_scores.tp + val_scores.fn_;
            validation_total += val_scores.total();

            let report = FoldReport {
                fold: fold.index,
                train_size,
                validation_size,
                train_accuracy: train_scores.accuracy(),
                validation_accuracy: val_scores.accuracy(),
                precision: val_scores.precision(),
                recall: val_scores.recall(),
                f1: val_scores.f1(),
                overfitting_gap: train_scores.accuracy() - val_scores.accuracy(),
            };
            debug!(
                "CrossValidator: Fold {} train_acc={:.3} val_acc={:.3} gap={:.3}",
                report.fold, report.train_accuracy, report.validation_accuracy, report.overfitting_gap
            );
            reports.push(report);
        }

        if reports.is_empty() {
            return Err(TrainingError::NoValidFolds {
                requested: self.settings.max_folds,
                samples: data.len(),
            });
        }

        let gaps: Vec<f64> = reports.iter().map(|r| r.overfitting_gap).collect();
        let avg_gap = mean(gaps.clone());
        let max_gap = gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let positive_share = ratio(validation_positive, validation_total);
        let majority_class_share = positive_share.max(1.0 - positive_share);

        let raw_accuracy = mean(reports.iter().map(|r| r.validation_accuracy).collect());
        let raw_precision = mean(reports.iter().map(|r| r.precision).collect());
        let raw_recall = mean(reports.iter().map(|r| r.recall).collect());
        let raw_f1 = mean(reports.iter().map(|r| r.f1).collect());

        let (severity, multiplier, extreme_fold) = self.penalty_multiplier(avg_gap, max_gap);
        let scores = self.apply_penalty(
            [raw_accuracy, raw_precision, raw_recall, raw_f1],
            multiplier,
            majority_class_share,
        );

        if scores.clamped {
            warn!(
                "CrossValidator: Accuracy {:.3} above plausible ceiling, capped at {:.3}",
                raw_accuracy * multiplier,
                self.policy.accuracy_ceiling
            );
        }
        info!(
            "CrossValidator: {} folds ({} skipped) accuracy={:.3} (raw {:.3}) avg_gap={:.3} severity={}",
            reports.len(),
            skipped,
            scores.accuracy,
            raw_accuracy,
            avg_gap,
            severity
        );

        Ok(CvReport {
            folds: reports,
            skipped_folds: skipped,
            raw_accuracy,
            accuracy: scores.accuracy,
            precision: scores.precision,
            recall: scores.recall,
            f1: scores.f1,
            assessment: OverfittingAssessment {
                avg_gap,
                max_gap,
                severity,
                extreme_fold,
                majority_class_share,
                multiplier,
            },
            clamped: scores.clamped,
        })
    }

    /// Staged multiplier from the average gap, plus the extreme-fold
    /// penalty when any single fold's gap exceeds the extreme threshold.
    pub fn penalty_multiplier(&self, avg_gap: f64, max_gap: f64) -> (OverfittingSeverity, f64, bool) {
        let severities = [
            OverfittingSeverity::Heavy,
            OverfittingSeverity::Large,
            OverfittingSeverity::Moderate,
            OverfittingSeverity::Light,
        ];

        let mut severity = OverfittingSeverity::None;
        let mut multiplier = 1.0;
        for (i, &(min_gap, factor)) in self.policy.bands.iter().enumerate() {
            if avg_gap > min_gap {
                severity = severities.get(i).copied().unwrap_or(OverfittingSeverity::Light);
                multiplier = factor;
                break;
            }
        }

        let extreme_fold = max_gap > self.policy.extreme_fold_gap;
        if extreme_fold {
            multiplier *= self.policy.extreme_fold_multiplier;
        }
        (severity, multiplier, extreme_fold)
    }

    /// Apply `multiplier` to `[accuracy, precision, recall, f1]`, then the
    /// class-skew discount and the accuracy ceiling.
    pub fn apply_penalty(
        &self,
        raw: [f64; 4],
        multiplier: f64,
        majority_class_share: f64,
    ) -> PenalizedScores {
        let [accuracy, precision, recall, f1] = raw.map(|m| m * multiplier);

        let mut accuracy = accuracy;
        if majority_class_share > self.policy.class_skew_threshold {
            accuracy *= self.policy.class_skew_multiplier;
        }

        let clamped = accuracy > self.policy.accuracy_ceiling;
        if clamped {
            accuracy = self.policy.accuracy_ceiling;
        }

        PenalizedScores {
            accuracy,
            precision,
            recall,
            f1,
            clamped,
        }
    }
}
