//! Local OCR engine with geometric page correction

pub mod engine;
pub mod geometry;

pub use engine::LocalOcrEngine;
