use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use crate::domain::ml::dataset::Dataset;
use crate::domain::ml::learner::BaseLearner;
use crossbeam_channel::{Receiver, Sender};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// One unit of work: train `learner` on the rows named by `sample`.
pub struct TrainingJob {
    pub index: usize,
    pub learner: Box<dyn BaseLearner>,
    pub sample: Vec<usize>,
}

/// Outcome of a job, re-slotted by `index` on collection.
pub struct TrainingResult {
    pub index: usize,
    pub outcome: Result<Box<dyn BaseLearner>, TrainingError>,
}

/// Draw `n` row indices with replacement from `0..n`.
pub fn bootstrap_indices<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    (0..n).map(|_| rng.random_range(0..n)).collect()
}

/// Fixed-size worker pool for ensemble rounds.
///
/// Jobs go through a shared crossbeam queue; each worker trains the cloned
/// learner it receives and reports back. The round is all-or-nothing: the
/// first failure stops the remaining jobs and the whole call fails naming
/// that index. Output order always matches input order.
#[derive(Debug, Clone)]
pub struct ParallelTrainer {
    workers: usize,
}

impl ParallelTrainer {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Train `prototypes[i].clone_untrained()` on `data.select(&samples[i])`
    /// for every `i`, returning the trained learners in prototype order.
    pub fn train_all(
        &self,
        prototypes: &[Box<dyn BaseLearner>],
        samples: Vec<Vec<usize>>,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> Result<Vec<Box<dyn BaseLearner>>, TrainingError> {
        if prototypes.len() != samples.len() {
            return Err(TrainingError::invalid(format!(
                "{} learners but {} samples",
                prototypes.len(),
                samples.len()
            )));
        }
        let total = prototypes.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<TrainingJob>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<TrainingResult>();

        for (index, (prototype, sample)) in prototypes.iter().zip(samples).enumerate() {
            let job = TrainingJob {
                index,
                learner: prototype.clone_untrained(),
                sample,
            };
            if job_tx.send(job).is_err() {
                return Err(TrainingError::learner(
                    "parallel_trainer",
                    "job queue closed before dispatch",
                ));
            }
        }
        drop(job_tx);

        let worker_count = self.workers.min(total);
        let abort = AtomicBool::new(false);
        let started = Instant::now();

        let (slots, failure) = std::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                scope.spawn(move || run_worker(worker_id, job_rx, result_tx, data, cancel, abort));
            }
            drop(result_tx);

            let mut slots: Vec<Option<Box<dyn BaseLearner>>> = (0..total).map(|_| None).collect();
            let mut failure: Option<(usize, TrainingError)> = None;

            for result in result_rx.iter() {
                match result.outcome {
                    Ok(learner) => slots[result.index] = Some(learner),
                    Err(e) => {
                        if failure.is_none() {
                            warn!(
                                "ParallelTrainer: Learner #{} failed, aborting round: {}",
                                result.index, e
                            );
                            abort.store(true, Ordering::SeqCst);
                            failure = Some((result.index, e));
                        }
                    }
                }
            }
            (slots, failure)
        });

        if let Some((index, source)) = failure {
            return Err(TrainingError::WorkerFailed {
                index,
                source: Box::new(source),
            });
        }

        let mut trained = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(learner) => trained.push(learner),
                None => {
                    return Err(TrainingError::WorkerFailed {
                        index,
                        source: Box::new(TrainingError::learner(
                            "parallel_trainer",
                            "worker exited without a result",
                        )),
                    });
                }
            }
        }

        debug!(
            "ParallelTrainer: Trained {} learners on {} workers in {:?}",
            total,
            worker_count,
            started.elapsed()
        );
        Ok(trained)
    }
}

fn run_worker(
    worker_id: usize,
    jobs: Receiver<TrainingJob>,
    results: Sender<TrainingResult>,
    data: &Dataset,
    cancel: &CancellationToken,
    abort: &AtomicBool,
) {
    // Blocks while the queue is non-empty, ends once it is drained
    for job in jobs.iter() {
        let outcome = if abort.load(Ordering::SeqCst) {
            Err(TrainingError::Cancelled)
        } else {
            cancel.check().and_then(|_| {
                let mut learner = job.learner;
                let sample = data.select(&job.sample);
                learner
                    .train(&sample.features, &sample.targets, cancel)
                    .map(|_| learner)
            })
        };

        if results
            .send(TrainingResult {
                index: job.index,
                outcome,
            })
            .is_err()
        {
            debug!("ParallelTrainer: Worker {} lost its result channel", worker_id);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::regression_tree::RegressionTree;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    /// Predicts its own id; sleeps longer for lower ids so completion order
    /// is the reverse of submission order.
    #[derive(Debug, Clone)]
    struct DelayedLearner {
        id: usize,
        delay_ms: u64,
        fail: bool,
        trained: bool,
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
                return Err(TrainingError::invalid("injected failure"));
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
            serde_json::json!({ "id": self.id })
        }
    }

    fn tiny_dataset() -> Dataset {
        Dataset::new(
            (0..10).map(|i| vec![i as f64]).collect(),
            (0..10).map(|i| i as f64).collect(),
            vec![],
        )
        .unwrap()
    }

    fn delayed(n: usize, failing: Option<usize>) -> Vec<Box<dyn BaseLearner>> {
        (0..n)
            .map(|id| {
                Box::new(DelayedLearner {
                    id,
                    delay_ms: ((n - id) * 15) as u64,
                    fail: failing == Some(id),
                    trained: false,
                }) as Box<dyn BaseLearner>
            })
            .collect()
    }

    #[test]
    fn test_order_independent_of_completion() {
        let data = tiny_dataset();
        let prototypes = delayed(6, None);
        let samples = vec![(0..10).collect::<Vec<usize>>(); 6];

        let trained = ParallelTrainer::new(4)
            .train_all(&prototypes, samples, &data, &CancellationToken::new())
            .unwrap();

        let ids: Vec<f64> = trained.iter().map(|l| l.predict(&[])).collect();
        assert_eq!(ids, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(trained.iter().all(|l| l.is_trained()));
        // Prototypes are untouched
        assert!(prototypes.iter().all(|l| !l.is_trained()));
    }

    #[test]
    fn test_single_failure_aborts_round() {
        let data = tiny_dataset();
        let prototypes = delayed(5, Some(3));
        let samples = vec![(0..10).collect::<Vec<usize>>(); 5];

        let result = ParallelTrainer::new(2).train_all(
            &prototypes,
            samples,
            &data,
            &CancellationToken::new(),
        );

        match result {
            Err(TrainingError::WorkerFailed { index, .. }) => assert_eq!(index, 3),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("round should fail"),
        }
    }

    #[test]
    fn test_cancelled_round_fails() {
        let data = tiny_dataset();
        let prototypes = delayed(3, None);
        let samples = vec![(0..10).collect::<Vec<usize>>(); 3];
        let token = CancellationToken::new();
        token.cancel();

        let err = ParallelTrainer::new(2)
            .train_all(&prototypes, samples, &data, &token)
            .err()
            .unwrap();
        assert!(err.is_interruption());
    }

    #[test]
    fn test_bootstrap_with_replacement() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = bootstrap_indices(100, &mut rng);
        assert_eq!(sample.len(), 100);
        assert!(sample.iter().all(|&i| i < 100));

        let mut unique = sample.clone();
        unique.sort_unstable();
        unique.dedup();
        assert!(unique.len() < 100, "bootstrap should repeat some rows");

        let mut rng_again = StdRng::seed_from_u64(7);
        assert_eq!(sample, bootstrap_indices(100, &mut rng_again));
    }

    #[test]
    fn test_trains_real_trees() {
        let data = Dataset::new(
            (0..40).map(|i| vec![i as f64]).collect(),
            (0..40).map(|i| if i < 20 { 0.0 } else { 1.0 }).collect(),
            vec![],
        )
        .unwrap();
        let prototypes: Vec<Box<dyn BaseLearner>> =
            (0..3).map(|_| Box::new(RegressionTree::default()) as Box<dyn BaseLearner>).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let samples = (0..3).map(|_| bootstrap_indices(40, &mut rng)).collect();

        let trained = ParallelTrainer::new(3)
            .train_all(&prototypes, samples, &data, &CancellationToken::new())
            .unwrap();
        assert_eq!(trained.len(), 3);
        assert!(trained.iter().all(|t| t.predict(&[39.0]) > 0.5));
    }
}
