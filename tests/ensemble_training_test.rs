mod common;

use common::{DelayedLearner, regime_dataset};
use ensemble_engine::application::ml::ensemble::{EnsembleModel, EnsembleSettings};
use ensemble_engine::domain::errors::TrainingError;
use ensemble_engine::domain::ml::cancellation::CancellationToken;
use ensemble_engine::domain::ml::learner::BaseLearner;
use ensemble_engine::domain::ml::model::EnsembleMethod;
use ensemble_engine::domain::ml::regression_tree::{RegressionTree, TreeParams};

fn settings(workers: usize, seed: u64) -> EnsembleSettings {
    EnsembleSettings {
        workers,
        seed: Some(seed),
        ..Default::default()
    }
}

/// Learner order after training matches the configured order even when
/// later learners finish first.
#[test]
fn test_bagging_order_survives_worker_delays() {
    let data = regime_dataset(40);
    for workers in [1, 3, 8] {
        let mut model = EnsembleModel::new(
            EnsembleMethod::Bagging,
            DelayedLearner::reversed(6, None),
            settings(workers, 11),
        )
        .unwrap();

        model
            .train(&data.features, &data.targets, &CancellationToken::new())
            .unwrap();

        let ids: Vec<f64> = model.learners().iter().map(|l| l.predict(&[])).collect();
        assert_eq!(ids, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], "workers = {}", workers);
        // Mean of ids 0..=5
        assert!((model.predict(&[0.0, 0.0]) - 2.5).abs() < 1e-12);
    }
}

#[test]
fn test_failed_worker_names_index_and_keeps_model_untrained() {
    let data = regime_dataset(40);
    let mut model = EnsembleModel::new(
        EnsembleMethod::Bagging,
        DelayedLearner::reversed(5, Some(2)),
        settings(3, 5),
    )
    .unwrap();

    let err = model
        .train(&data.features, &data.targets, &CancellationToken::new())
        .unwrap_err();
    match err {
        TrainingError::WorkerFailed { index, .. } => assert_eq!(index, 2),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!model.is_trained());
    assert!(model.learners().iter().all(|l| !l.is_trained()));
}

#[test]
fn test_seeded_bagging_is_reproducible() {
    let data = regime_dataset(80);
    let tree = RegressionTree::new(TreeParams {
        max_depth: 4,
        ..Default::default()
    });

    let train = |workers: usize| {
        let mut model =
            EnsembleModel::homogeneous(EnsembleMethod::Bagging, &tree, 8, settings(workers, 42))
                .unwrap();
        model
            .train(&data.features, &data.targets, &CancellationToken::new())
            .unwrap();
        model.predict_batch(&data.features)
    };

    // Same seed, different parallelism: identical predictions
    assert_eq!(train(1), train(4));
}

#[test]
fn test_every_method_learns_the_regime() {
    let data = regime_dataset(120);
    let tree = RegressionTree::new(TreeParams {
        max_depth: 3,
        ..Default::default()
    });

    for method in [
        EnsembleMethod::Bagging,
        EnsembleMethod::Boosting,
        EnsembleMethod::Stacking,
    ] {
        let size = if method == EnsembleMethod::Boosting { 30 } else { 5 };
        let mut model = EnsembleModel::homogeneous(method, &tree, size, settings(2, 9)).unwrap();
        model
            .train(&data.features, &data.targets, &CancellationToken::new())
            .unwrap();

        let up = model.predict(&[1.2, 3.0]);
        let down = model.predict(&[-1.2, 3.0]);
        assert!(up > 0.5, "{} predicted {} for the up regime", method, up);
        assert!(down < 0.5, "{} predicted {} for the down regime", method, down);
    }
}

#[test]
fn test_cancelled_ensemble_reports_interruption() {
    let data = regime_dataset(40);
    let mut model = EnsembleModel::new(
        EnsembleMethod::Bagging,
        DelayedLearner::reversed(4, None),
        settings(2, 1),
    )
    .unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = model
        .train(&data.features, &data.targets, &token)
        .unwrap_err();
    assert!(err.is_interruption());
    assert!(!model.is_trained());
}
