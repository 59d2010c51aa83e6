// Model registry, training orchestration and retrain loop
pub mod engine;

// Ensembles, validation, caching and parallel training
pub mod ml;

// Live performance tracking and retrain scheduling
pub mod monitoring;
