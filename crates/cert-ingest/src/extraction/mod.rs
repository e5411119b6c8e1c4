//! Text extraction backends and the per-document router

pub mod cloud;
pub mod router;

pub use cloud::CloudExtraction;
pub use router::{Backend, ExtractionRouter};
