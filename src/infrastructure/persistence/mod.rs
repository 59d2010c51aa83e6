pub mod metadata_store;
