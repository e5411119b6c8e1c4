//! Calibration package ingestion
//!
//! A package is a dated directory of JSON sidecar files, one or more
//! transducer calibrations per file. Packages are all-or-nothing: a
//! malformed sidecar fails the whole package so no partial set is
//! persisted.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::types::TransducerCalibration;

/// Parse every sidecar file under a package directory, in name order.
pub fn parse_package_dir(dir: &Path) -> Result<Vec<TransducerCalibration>> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut calibrations = Vec::new();
    for path in &files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let raw = std::fs::read_to_string(path)?;
        calibrations.extend(parse_sidecar(&raw, &filename)?);
    }

    Ok(calibrations)
}

/// Parse one sidecar payload: a single calibration object or an array.
fn parse_sidecar(raw: &str, filename: &str) -> Result<Vec<TransducerCalibration>> {
    if let Ok(single) = serde_json::from_str::<TransducerCalibration>(raw) {
        return Ok(vec![single]);
    }
    serde_json::from_str::<Vec<TransducerCalibration>>(raw)
        .map_err(|e| Error::file_parse(filename, format!("Invalid calibration sidecar: {}", e)))
}
