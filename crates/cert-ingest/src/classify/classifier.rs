//! Part/certification classifier
//!
//! Shipment documents routinely mention component types that belong to a
//! different certification batch printed on the same physical page.
//! Lines within a window around a foreign batch ID are excluded from
//! keyword matching, except where the current batch's own ID claims the
//! same lines. The first keyword match on a surviving line decides the
//! category.

use regex::Regex;

use crate::config::CategoryKeywords;
use crate::error::{Error, Result};
use crate::types::{BatchId, CategoryKind};

/// Lines this far on either side of a batch ID belong to that batch.
const ZONE_RADIUS: usize = 8;

#[derive(Debug)]
pub struct PartClassifier {
    categories: Vec<(CategoryKind, Vec<Regex>)>,
}

impl PartClassifier {
    /// Compile the keyword map into word-boundary, case-insensitive
    /// patterns. A category without keywords is a configuration error.
    pub fn new(categories: &[CategoryKeywords]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(categories.len());
        for category in categories {
            if category.keywords.is_empty() {
                return Err(Error::config(format!(
                    "category '{}' has no keywords",
                    category.kind
                )));
            }
            let mut patterns = Vec::with_capacity(category.keywords.len());
            for keyword in &category.keywords {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
                let re = Regex::new(&pattern)
                    .map_err(|e| Error::config(format!("bad keyword '{}': {}", keyword, e)))?;
                patterns.push(re);
            }
            compiled.push((category.kind, patterns));
        }
        Ok(Self {
            categories: compiled,
        })
    }

    /// Categories whose keywords appear anywhere in the document, in
    /// first-appearance order.
    pub fn detect_all_parts(&self, lines: &[String]) -> Vec<CategoryKind> {
        let mut detected = Vec::new();
        for line in lines {
            for (kind, patterns) in &self.categories {
                if detected.contains(kind) {
                    continue;
                }
                if patterns.iter().any(|re| re.is_match(line)) {
                    detected.push(*kind);
                }
            }
        }
        detected
    }

    /// Per-line exclusion flags.
    ///
    /// A line is excluded when it sits within `ZONE_RADIUS` of a foreign
    /// batch ID and the current batch's own ID does not claim it from a
    /// window of the same size.
    pub fn exclusion_zones(&self, lines: &[String], current: &BatchId) -> Vec<bool> {
        let mut foreign = vec![false; lines.len()];
        let mut claimed = vec![false; lines.len()];
        for (i, line) in lines.iter().enumerate() {
            for id in BatchId::find_all(line) {
                let lo = i.saturating_sub(ZONE_RADIUS);
                let hi = (i + ZONE_RADIUS).min(lines.len() - 1);
                let flags = if &id == current {
                    &mut claimed
                } else {
                    &mut foreign
                };
                for flag in &mut flags[lo..=hi] {
                    *flag = true;
                }
            }
        }
        foreign
            .into_iter()
            .zip(claimed)
            .map(|(f, c)| f && !c)
            .collect()
    }

    /// Decide which category a document belongs to.
    ///
    /// Scans lines in document order and returns on the first keyword
    /// match outside every exclusion zone, trying categories in
    /// first-appearance order and keywords in configured order. No
    /// surviving match is a per-document failure.
    pub fn classify(
        &self,
        lines: &[String],
        current: &BatchId,
        filename: &str,
    ) -> Result<CategoryKind> {
        let detected = self.detect_all_parts(lines);
        if detected.is_empty() {
            return Err(Error::NoCategory {
                filename: filename.to_string(),
            });
        }
        tracing::debug!("[{}] Candidate categories: {:?}", filename, detected);

        let ordered: Vec<&(CategoryKind, Vec<Regex>)> = detected
            .iter()
            .filter_map(|kind| self.categories.iter().find(|(k, _)| k == kind))
            .collect();
        let excluded = self.exclusion_zones(lines, current);

        for (i, line) in lines.iter().enumerate() {
            if excluded[i] {
                continue;
            }
            for (kind, patterns) in &ordered {
                if patterns.iter().any(|re| re.is_match(line)) {
                    tracing::debug!("[{}] Line {} decides {}", filename, i, kind);
                    return Ok(*kind);
                }
            }
        }

        Err(Error::NoCategory {
            filename: filename.to_string(),
        })
    }
}
