// Performance tracking domain
pub mod performance_evaluator;
pub mod prediction_record;
pub mod retrain_trigger;
