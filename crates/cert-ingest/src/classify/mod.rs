//! Category classification and field extraction

pub mod classifier;
pub mod fields;
pub mod quantity;

pub use classifier::PartClassifier;
pub use fields::{evaluate_measurement, FieldExtractor};
pub use quantity::{extract_quantity, parse_locale_number};
