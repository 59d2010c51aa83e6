//! Learners with injectable delays, failures and call counting.
#![allow(dead_code)]

use ensemble_engine::domain::errors::TrainingError;
use ensemble_engine::domain::ml::cancellation::CancellationToken;
use ensemble_engine::domain::ml::dataset::Dataset;
use ensemble_engine::domain::ml::learner::BaseLearner;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Predicts its id after sleeping `delay_ms` in `train`.
#[derive(Debug, Clone)]
pub struct DelayedLearner {
    pub id: usize,
    pub delay_ms: u64,
    pub fail: bool,
    pub trained: bool,
}

impl DelayedLearner {
    /// `n` learners where earlier ids finish last.
    pub fn reversed(n: usize, failing: Option<usize>) -> Vec<Box<dyn BaseLearner>> {
        (0..n)
            .map(|id| {
                Box::new(DelayedLearner {
                    id,
                    delay_ms: ((n - id) * 10) as u64,
                    fail: failing == Some(id),
                    trained: false,
                }) as Box<dyn BaseLearner>
            })
            .collect()
    }
}

impl BaseLearner for DelayedLearner {
    fn train(
        &mut self,
        _features: &[Vec<f64>],
        _targets: &[f64],
        _cancel: &CancellationToken,
    ) -> Result<(), TrainingError> {
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        if self.fail {
            return Err(TrainingError::learner("delayed", "injected failure"));
        }
        self.trained = true;
        Ok(())
    }

    fn predict(&self, _sample: &[f64]) -> f64 {
        self.id as f64
    }

    fn clone_untrained(&self) -> Box<dyn BaseLearner> {
        Box::new(DelayedLearner {
            trained: false,
            ..self.clone()
        })
    }

    fn clone_trained(&self) -> Box<dyn BaseLearner> {
        Box::new(self.clone())
    }

    fn feature_importance(&self) -> Vec<f64> {
        vec![1.0]
    }

    fn name(&self) -> &str {
        "delayed"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({ "id": self.id, "delay_ms": self.delay_ms })
    }
}

/// Counts `train` calls and work steps across all of its clones. Each step
/// sleeps 10ms and checks for cancellation first.
#[derive(Debug, Clone)]
pub struct CountingLearner {
    pub steps: usize,
    pub train_calls: Arc<AtomicUsize>,
    pub steps_done: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub trained: bool,
}

impl CountingLearner {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            train_calls: Arc::new(AtomicUsize::new(0)),
            steps_done: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            trained: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.train_calls.load(Ordering::SeqCst)
    }

    pub fn steps_done(&self) -> usize {
        self.steps_done.load(Ordering::SeqCst)
    }

    /// Most `train` calls ever running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl BaseLearner for CountingLearner {
    fn train(
        &mut self,
        _features: &[Vec<f64>],
        _targets: &[f64],
        cancel: &CancellationToken,
    ) -> Result<(), TrainingError> {
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);

        let result: Result<(), TrainingError> = (0..self.steps).try_for_each(|_| {
            cancel.check()?;
            std::thread::sleep(Duration::from_millis(10));
            self.steps_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        self.active.fetch_sub(1, Ordering::SeqCst);
        result?;
        self.trained = true;
        Ok(())
    }

    fn predict(&self, _sample: &[f64]) -> f64 {
        1.0
    }

    fn clone_untrained(&self) -> Box<dyn BaseLearner> {
        Box::new(CountingLearner {
            trained: false,
            ..self.clone()
        })
    }

    fn clone_trained(&self) -> Box<dyn BaseLearner> {
        Box::new(self.clone())
    }

    fn feature_importance(&self) -> Vec<f64> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "counting"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({ "steps": self.steps })
    }
}

/// Two features; the target follows the sign of the first in blocks of 5.
pub fn regime_dataset(n: usize) -> Dataset {
    let features: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let regime = if (i / 5) % 2 == 0 { 1.0 } else { -1.0 };
            vec![regime * (1.0 + (i % 5) as f64 * 0.1), (i % 7) as f64]
        })
        .collect();
    let targets = features
        .iter()
        .map(|row| if row[0] > 0.0 { 1.0 } else { 0.0 })
        .collect();
    Dataset::new(features, targets, vec!["momentum".into(), "noise".into()])
        .expect("valid dataset")
}
