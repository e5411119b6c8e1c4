//! Document intake: filesystem watchers, PDF page handling, calibration packages

pub mod package;
pub mod pdf;
pub mod watcher;

pub use package::parse_package_dir;
pub use pdf::{page_count, truncate_pages};
pub use watcher::spawn_watcher;
