pub mod csv_training_data;
pub mod observability;
pub mod persistence;

pub use csv_training_data::CsvTrainingDataProvider;
pub use persistence::metadata_store::{InMemoryMetadataRepository, JsonFileMetadataRepository};
