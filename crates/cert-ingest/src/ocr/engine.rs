//! Local OCR path for document families with fixed page layouts
//!
//! Pages are rasterized with pdftoppm and recognized with tesseract, the
//! same external tools the listener probes for at startup. Each page is
//! geometrically corrected first: a tesseract orientation pass decides
//! quarter turns, the ink rectangle acts as fallback, and residual skew
//! beyond the configured threshold is rotated out. Recognition then
//! checks a small marker region and, when the marker is present, sweeps
//! the remainder of the page in overlapping horizontal bands.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use image::GrayImage;

use crate::config::{OcrConfig, Region, SourceProfile};
use crate::error::{Error, Result};
use crate::ocr::geometry;
use crate::storage::PipelineDb;
use crate::types::{ExtractedDocument, ExtractionSource};

/// Region-limited OCR over rasterized PDF pages.
pub struct LocalOcrEngine {
    config: OcrConfig,
    db: Arc<PipelineDb>,
}

impl LocalOcrEngine {
    pub fn new(config: OcrConfig, db: Arc<PipelineDb>) -> Self {
        Self { config, db }
    }

    /// Check if tesseract is available
    pub fn has_tesseract() -> bool {
        Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Check if pdftoppm is available
    pub fn has_pdftoppm() -> bool {
        Command::new("pdftoppm")
            .arg("-v")
            .output()
            .map(|_| true) // pdftoppm -v outputs to stderr, just check if command exists
            .unwrap_or(false)
    }

    /// Extract the profile's section of a document, caching under `key`.
    ///
    /// A key already in the text cache short-circuits without touching
    /// the external tools.
    pub fn extract(
        &self,
        key: &str,
        filename: &str,
        data: &[u8],
        profile: &SourceProfile,
    ) -> Result<ExtractedDocument> {
        if let Some(cached) = self.db.get_cached_text(key)? {
            tracing::info!("[{}] Local OCR cache hit ({} lines)", filename, cached.lines.len());
            return Ok(ExtractedDocument {
                key: key.to_string(),
                lines: cached.lines,
                page_count: cached.page_count,
                source: ExtractionSource::Cache,
            });
        }

        if !Self::has_pdftoppm() || !Self::has_tesseract() {
            return Err(Error::MissingTool(
                "local OCR requires pdftoppm and tesseract. Install with: apt install poppler-utils tesseract-ocr".to_string(),
            ));
        }

        let marker = profile.layout_marker.as_deref().ok_or_else(|| {
            Error::config(format!("profile '{}' has no layout marker", profile.name))
        })?;

        let temp_dir = std::env::temp_dir().join(format!("cert-ingest-ocr-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir)
            .map_err(|e| Error::ocr(format!("Failed to create temp dir: {}", e)))?;

        let result = self.scan_document(filename, data, marker, &profile.marker_region, &temp_dir);
        fs::remove_dir_all(&temp_dir).ok();
        let (lines, total_pages) = result?;

        if lines.is_empty() {
            return Err(Error::ocr(format!(
                "no '{}' pages recognized in {}",
                marker, filename
            )));
        }

        tracing::info!(
            "[{}] Local OCR extracted {} lines from {} pages",
            filename,
            lines.len(),
            total_pages
        );
        self.db
            .cache_text(key, &lines, Some(total_pages), "local_ocr")?;

        Ok(ExtractedDocument {
            key: key.to_string(),
            lines,
            page_count: Some(total_pages),
            source: ExtractionSource::LocalOcr,
        })
    }

    /// Recognize the text inside one fractional region of a page image.
    pub fn recognize_region(&self, image: &GrayImage, region: &Region) -> Result<String> {
        let cropped = geometry::crop_region(image, region);
        self.recognize(&cropped, None)
    }

    fn scan_document(
        &self,
        filename: &str,
        data: &[u8],
        marker: &str,
        marker_region: &Region,
        temp_dir: &Path,
    ) -> Result<(Vec<String>, u32)> {
        let page_paths = self.rasterize(data, temp_dir)?;
        let total_pages = page_paths.len() as u32;
        let marker_lower = marker.to_lowercase();

        let mut lines: Vec<String> = Vec::new();
        let mut miss_streak = 0u32;

        for (index, page_path) in page_paths.iter().enumerate() {
            let page = self.corrected_page(page_path)?;

            let header = self.recognize_region(&page, marker_region)?;
            if !header.to_lowercase().contains(&marker_lower) {
                miss_streak += 1;
                tracing::debug!(
                    "[{}] Page {} has no marker (streak {})",
                    filename,
                    index + 1,
                    miss_streak
                );
                if miss_streak >= self.config.miss_streak {
                    break;
                }
                continue;
            }
            miss_streak = 0;

            let page_lines = self.scan_bands(&page, marker_region)?;
            append_with_overlap(&mut lines, page_lines);
        }

        Ok((lines, total_pages))
    }

    /// Sweep the page below the marker region in overlapping bands.
    fn scan_bands(&self, page: &GrayImage, marker_region: &Region) -> Result<Vec<String>> {
        let mut lines: Vec<String> = Vec::new();
        let mut top = marker_region.top + marker_region.height;
        while top + self.config.band_height_frac <= 1.0 {
            let band = Region {
                left: 0.0,
                top,
                width: 1.0,
                height: self.config.band_height_frac,
            };
            let text = self.recognize_region(page, &band)?;
            append_with_overlap(&mut lines, clean_lines(&text));
            top += self.config.band_step_frac;
        }
        Ok(lines)
    }

    fn rasterize(&self, data: &[u8], temp_dir: &Path) -> Result<Vec<PathBuf>> {
        let pdf_path = temp_dir.join("input.pdf");
        fs::write(&pdf_path, data)
            .map_err(|e| Error::ocr(format!("Failed to write temp PDF: {}", e)))?;

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &self.config.dpi.to_string(), "-gray"])
            .arg(&pdf_path)
            .arg(temp_dir.join("page"))
            .output()
            .map_err(|e| Error::ocr(format!("pdftoppm failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ocr(format!("pdftoppm error: {}", stderr)));
        }

        let mut page_paths: Vec<PathBuf> = fs::read_dir(temp_dir)
            .map_err(|e| Error::ocr(format!("Failed to read temp dir: {}", e)))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
            .map(|e| e.path())
            .collect();
        page_paths.sort();

        if page_paths.is_empty() {
            return Err(Error::ocr("pdftoppm produced no images".to_string()));
        }
        Ok(page_paths)
    }

    /// Load a rasterized page and straighten it.
    fn corrected_page(&self, page_path: &Path) -> Result<GrayImage> {
        let mut page = image::open(page_path)
            .map_err(|e| Error::ocr(format!("Failed to load page image: {}", e)))?
            .to_luma8();

        match self.detect_orientation(page_path) {
            Some(90) => page = image::imageops::rotate90(&page),
            Some(180) => page = image::imageops::rotate180(&page),
            Some(270) => page = image::imageops::rotate270(&page),
            Some(_) | None => {
                // Sparse pages defeat the orientation pass; the ink
                // rectangle still tells portrait from landscape.
                let angle = geometry::orientation_from_ink(&page);
                if needs_quarter_turn(angle) {
                    page = image::imageops::rotate90(&page);
                }
            }
        }

        let skew = geometry::estimate_skew(&page);
        if skew.abs() > self.config.skew_threshold_deg {
            tracing::debug!("Correcting {:.1} degree skew", skew);
            page = geometry::rotate_about_center(&page, -skew);
        }
        Ok(page)
    }

    /// Tesseract orientation pass; `Rotate: N` is the clockwise turn that
    /// makes the text upright. None when the pass fails or finds nothing.
    fn detect_orientation(&self, page_path: &Path) -> Option<u32> {
        let output = Command::new("tesseract")
            .arg(page_path)
            .args(["stdout", "--psm", "0"])
            .output()
            .ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        parse_osd_rotation(&stdout).or_else(|| parse_osd_rotation(&stderr))
    }

    /// Run tesseract over one image, optionally with a page segmentation mode.
    fn recognize(&self, image: &GrayImage, psm: Option<&str>) -> Result<String> {
        let crop_path =
            std::env::temp_dir().join(format!("cert-ingest-crop-{}.png", uuid::Uuid::new_v4()));
        image
            .save(&crop_path)
            .map_err(|e| Error::ocr(format!("Failed to write crop image: {}", e)))?;

        let mut command = Command::new("tesseract");
        command
            .arg(&crop_path)
            .args(["stdout", "-l", &self.config.language]);
        if let Some(mode) = psm {
            command.args(["--psm", mode]);
        }
        let output = command
            .output()
            .map_err(|e| Error::ocr(format!("tesseract failed: {}", e)));
        fs::remove_file(&crop_path).ok();
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ocr(format!("tesseract error: {}", stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse the `Rotate:` line out of tesseract OSD output.
fn parse_osd_rotation(output: &str) -> Option<u32> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Rotate:") {
            return rest.trim().parse().ok();
        }
    }
    None
}

/// Ink running closer to vertical than horizontal means a sideways page.
fn needs_quarter_turn(long_side_degrees: f64) -> bool {
    long_side_degrees.abs() > 45.0
}

/// Lowercased, trimmed, non-empty lines of recognized text.
fn clean_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Append `new` to `acc`, skipping the longest prefix of `new` that
/// duplicates the tail of `acc`. Overlapping bands re-read the last
/// lines of the previous band.
fn append_with_overlap(acc: &mut Vec<String>, new: Vec<String>) {
    let max_overlap = acc.len().min(new.len());
    let mut overlap = 0;
    for k in (1..=max_overlap).rev() {
        if acc[acc.len() - k..] == new[..k] {
            overlap = k;
            break;
        }
    }
    acc.extend(new.into_iter().skip(overlap));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_osd_rotation() {
        let output = "Page number: 0\nOrientation in degrees: 270\nRotate: 90\nOrientation confidence: 6.79\n";
        assert_eq!(parse_osd_rotation(output), Some(90));
        assert_eq!(parse_osd_rotation("Rotate: 0"), Some(0));
        assert_eq!(parse_osd_rotation("no osd here"), None);
        assert_eq!(parse_osd_rotation("Rotate: ninety"), None);
    }

    #[test]
    fn test_needs_quarter_turn() {
        assert!(!needs_quarter_turn(0.0));
        assert!(!needs_quarter_turn(-30.0));
        assert!(needs_quarter_turn(88.0));
        assert!(needs_quarter_turn(-60.0));
    }

    #[test]
    fn test_clean_lines_lowercases_and_drops_blanks() {
        let text = "Flow Restrictor\n\n  Serial: FR-001  \n";
        assert_eq!(clean_lines(text), vec!["flow restrictor", "serial: fr-001"]);
    }

    #[test]
    fn test_append_with_overlap_dedupes_band_seam() {
        let mut acc = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        append_with_overlap(
            &mut acc,
            vec!["b".to_string(), "c".to_string(), "d".to_string()],
        );
        assert_eq!(acc, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_append_with_overlap_keeps_distinct_bands() {
        let mut acc = vec!["a".to_string()];
        append_with_overlap(&mut acc, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(acc, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_append_with_overlap_into_empty() {
        let mut acc: Vec<String> = Vec::new();
        append_with_overlap(&mut acc, vec!["x".to_string()]);
        assert_eq!(acc, vec!["x"]);
    }
}
