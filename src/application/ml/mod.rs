pub mod cross_validation;
pub mod ensemble;
pub mod learner_factory;
pub mod model_cache;
pub mod parallel_trainer;
