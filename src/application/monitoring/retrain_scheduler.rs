use crate::domain::performance::performance_evaluator::PerformanceEvaluator;
use crate::domain::performance::prediction_record::PerformanceStats;
use crate::domain::performance::retrain_trigger::{RetrainReason, RetrainSchedule};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Decides when a model is due for retraining and remembers when each one
/// was last scheduled.
pub struct RetrainScheduler {
    evaluator: PerformanceEvaluator,
    schedules: RwLock<HashMap<String, RetrainSchedule>>,
}

impl std::fmt::Debug for RetrainScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrainScheduler")
            .field("thresholds", self.evaluator.thresholds())
            .field("schedules", &"<RwLock>")
            .finish()
    }
}

impl RetrainScheduler {
    pub fn new(evaluator: PerformanceEvaluator) -> Self {
        Self {
            evaluator,
            schedules: RwLock::new(HashMap::new()),
        }
    }

    /// Reason to retrain `key` now, without recording anything. Callers
    /// record with [`mark_scheduled`](Self::mark_scheduled) once the retrain
    /// has succeeded, so a failed retrain stays due.
    pub fn due(&self, key: &str, stats: &PerformanceStats, now: DateTime<Utc>) -> Option<RetrainReason> {
        let guard = match self.schedules.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.evaluator.evaluate(guard.get(key), stats, now)
    }

    /// Record a completed retrain.
    pub fn mark_scheduled(&self, key: &str, reason: RetrainReason, now: DateTime<Utc>) {
        let mut guard = match self.schedules.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("RetrainScheduler: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };
        Self::record(&mut guard, key, reason, now);
    }

    fn record(
        schedules: &mut HashMap<String, RetrainSchedule>,
        key: &str,
        reason: RetrainReason,
        now: DateTime<Utc>,
    ) {
        match schedules.get_mut(key) {
            Some(schedule) => schedule.record(reason, now),
            None => {
                schedules.insert(key.to_string(), RetrainSchedule::new(key.to_string(), reason, now));
            }
        }
    }

    pub fn schedule(&self, key: &str) -> Option<RetrainSchedule> {
        match self.schedules.read() {
            Ok(guard) => guard.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    /// Drop the schedule for a removed model.
    pub fn forget(&self, key: &str) {
        match self.schedules.write() {
            Ok(mut guard) => {
                guard.remove(key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(key);
            }
        }
    }
}
