// Learners, datasets and model descriptions
pub mod ml;

// Performance tracking domain
pub mod performance;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
