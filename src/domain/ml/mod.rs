pub mod cancellation;
pub mod dataset;
pub mod learner;
pub mod linear;
pub mod model;
pub mod regression_tree;
