mod common;

use common::regime_dataset;
use ensemble_engine::application::ml::cross_validation::{CrossValidator, CvSettings, OverfittingSeverity};
use ensemble_engine::domain::errors::TrainingError;
use ensemble_engine::domain::ml::cancellation::CancellationToken;
use ensemble_engine::domain::ml::regression_tree::RegressionTree;

#[test]
fn test_folds_never_leak() {
    for gap in [0, 3] {
        let validator = CrossValidator::new(CvSettings {
            min_train_size: 20,
            min_validation_size: 5,
            max_folds: 6,
            gap,
            ..Default::default()
        });
        for n in [25, 40, 77, 200, 1_000] {
            for fold in validator.plan_folds(n) {
                assert!(fold.is_leak_free());
                assert!(fold.train.end + gap <= fold.validation.start, "n={} gap={}", n, gap);
                assert!(fold.validation.end <= n);
                // Disjoint and time ordered
                let max_train = fold.train.clone().max().unwrap();
                let min_val = fold.validation.clone().min().unwrap();
                assert!(max_train < min_val);
            }
        }
    }
}

#[test]
fn test_folds_are_evaluated_in_time_order() {
    let validator = CrossValidator::default();
    let folds = validator.plan_folds(300);
    assert!(folds.len() > 1);
    for pair in folds.windows(2) {
        assert!(pair[0].validation.end <= pair[1].validation.start);
        assert!(pair[0].train.end < pair[1].train.end);
    }
}

#[test]
fn test_penalty_is_monotone_in_gap() {
    let validator = CrossValidator::default();
    let raw = [0.8, 0.7, 0.6, 0.65];
    let gaps: Vec<f64> = (0..=60).map(|i| i as f64 * 0.01).collect();

    let mut previous = f64::INFINITY;
    let mut previous_severity = OverfittingSeverity::None;
    for gap in gaps {
        let (severity, multiplier, _) = validator.penalty_multiplier(gap, gap);
        let scores = validator.apply_penalty(raw, multiplier, 0.5);
        assert!(
            scores.accuracy <= previous + 1e-12,
            "gap {} raised accuracy to {}",
            gap,
            scores.accuracy
        );
        assert!(severity >= previous_severity);
        previous = scores.accuracy;
        previous_severity = severity;
    }
}

#[test]
fn test_near_perfect_accuracy_is_capped() {
    let validator = CrossValidator::default();
    let scores = validator.apply_penalty([1.0, 1.0, 1.0, 1.0], 1.0, 0.5);
    assert!(scores.clamped);
    assert!(scores.accuracy < 1.0);
}

#[test]
fn test_validate_tree_on_regime_data() {
    let data = regime_dataset(150);
    let validator = CrossValidator::default();
    let report = validator
        .validate(&RegressionTree::default(), &data, &CancellationToken::new())
        .unwrap();

    assert!(!report.folds.is_empty());
    assert!(report.accuracy > 0.6);
    assert!(report.accuracy <= 0.95);
    for fold in &report.folds {
        assert!(fold.train_size >= validator.settings().min_train_size);
    }
}

#[test]
fn test_too_little_data_has_no_folds() {
    let data = regime_dataset(20);
    let err = CrossValidator::default()
        .validate(&RegressionTree::default(), &data, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, TrainingError::NoValidFolds { .. }));
}
