// Rolling live-prediction history and retrain decisions
pub mod performance_monitor;
pub mod retrain_scheduler;
