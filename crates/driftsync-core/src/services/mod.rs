//! Shared services used by the engine and its clients

mod metadata_store;

pub use metadata_store::MetadataStore;
