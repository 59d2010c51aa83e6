use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainReason {
    NeverTrained,     // No schedule entry yet
    IntervalElapsed,  // Regular refresh
    DecliningTrend,   // Recent confidence dropped
    LowAccuracy,      // Rolling accuracy under floor
    Manual,           // Caller forced
}

impl fmt::Display for RetrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainReason::NeverTrained => write!(f, "Never Trained"),
            RetrainReason::IntervalElapsed => write!(f, "Interval Elapsed"),
            RetrainReason::DecliningTrend => write!(f, "Declining Trend"),
            RetrainReason::LowAccuracy => write!(f, "Low Accuracy"),
            RetrainReason::Manual => write!(f, "Manual"),
        }
    }
}

/// Retraining bookkeeping for one registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainSchedule {
    /// Registered model name
    pub model: String,
    pub last_scheduled: DateTime<Utc>,
    pub last_reason: RetrainReason,
    pub times_scheduled: u64,
}

impl RetrainSchedule {
    pub fn new(model: String, reason: RetrainReason, at: DateTime<Utc>) -> Self {
        Self {
            model,
            last_scheduled: at,
            last_reason: reason,
            times_scheduled: 1,
        }
    }

    pub fn record(&mut self, reason: RetrainReason, at: DateTime<Utc>) {
        self.last_scheduled = at;
        self.last_reason = reason;
        self.times_scheduled += 1;
    }
}
