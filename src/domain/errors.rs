use thiserror::Error;

/// Errors raised while training learners, ensembles or validation runs.
///
/// Training is strict: any of these aborts the current round. Prediction
/// never produces one of these.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Invalid training data: {reason}")]
    InvalidData { reason: String },

    #[error("Insufficient training data: {usable} usable rows, need at least {required}")]
    InsufficientData { usable: usize, required: usize },

    #[error("Training exceeded its time budget of {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("Training was cancelled")]
    Cancelled,

    #[error("Ensemble worker for learner #{index} failed: {source}")]
    WorkerFailed {
        index: usize,
        #[source]
        source: Box<TrainingError>,
    },

    #[error("Learner {learner} failed: {reason}")]
    Learner { learner: String, reason: String },

    #[error("Unknown model: {name}")]
    UnknownModel { name: String },

    #[error("No valid cross-validation folds for {samples} samples (requested up to {requested})")]
    NoValidFolds { requested: usize, samples: usize },
}

impl TrainingError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        TrainingError::InvalidData {
            reason: reason.into(),
        }
    }

    pub fn learner(learner: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TrainingError::Learner {
            learner: learner.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the time budget or an explicit cancel,
    /// including when wrapped by a failing ensemble worker.
    pub fn is_interruption(&self) -> bool {
        match self {
            TrainingError::Timeout { .. } | TrainingError::Cancelled => true,
            TrainingError::WorkerFailed { source, .. } => source.is_interruption(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_formatting() {
        let error = TrainingError::InsufficientData {
            usable: 1,
            required: 2,
        };

        let msg = error.to_string();
        assert!(msg.contains("1 usable rows"));
        assert!(msg.contains("at least 2"));
    }

    #[test]
    fn test_worker_failure_names_index() {
        let error = TrainingError::WorkerFailed {
            index: 7,
            source: Box::new(TrainingError::invalid("all targets NaN")),
        };

        let msg = error.to_string();
        assert!(msg.contains("#7"));
        assert!(msg.contains("all targets NaN"));
    }

    #[test]
    fn test_interruption_detection_through_worker() {
        let wrapped = TrainingError::WorkerFailed {
            index: 0,
            source: Box::new(TrainingError::Timeout { budget_ms: 10 }),
        };
        assert!(wrapped.is_interruption());
        assert!(!TrainingError::invalid("x").is_interruption());
    }
}
