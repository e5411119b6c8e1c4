//! HTTP implementations of the cloud provider traits

mod extraction;
mod object_store;

pub use extraction::HttpExtractionClient;
pub use object_store::HttpObjectStore;
