//! Shipped-quantity extraction with a three-stage fallback chain
//!
//! Stage one looks for the Dutch "totaal aantal" label and takes the
//! first digit-bearing token on the following lines. Stage two matches a
//! `quantity:`/`quantity supplied:` pattern anywhere. Stage three finds
//! an exact label line and takes the token that follows verbatim. Each
//! stage runs only when the previous found nothing, and the document
//! fails when all three come up empty.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

const TOTAL_LABEL: &str = "totaal aantal";
const EXACT_LABELS: &[&str] = &["quantity shipped:", "aantal geleverd:"];
const LABEL_LOOKAHEAD: usize = 5;

static QUANTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"quantity(?: supplied)?:\s*(\d+)").unwrap());

/// Shipped amount for a bulk document, as an integer.
pub fn extract_quantity(lines: &[String], filename: &str) -> Result<i64> {
    if let Some(amount) = total_label_amount(lines) {
        return Ok(amount);
    }
    if let Some(amount) = quantity_pattern_amount(lines) {
        return Ok(amount);
    }
    if let Some(amount) = exact_label_amount(lines) {
        return Ok(amount);
    }
    Err(Error::field_missing(filename, "quantity"))
}

fn total_label_amount(lines: &[String]) -> Option<i64> {
    let label_index = lines.iter().position(|l| l.contains(TOTAL_LABEL))?;
    lines
        .iter()
        .skip(label_index + 1)
        .take(LABEL_LOOKAHEAD)
        .flat_map(|l| l.split_whitespace())
        .find(|token| token.chars().any(|c| c.is_ascii_digit()))
        .and_then(parse_locale_number)
        .map(|v| v.round() as i64)
}

fn quantity_pattern_amount(lines: &[String]) -> Option<i64> {
    lines.iter().find_map(|line| {
        QUANTITY_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

fn exact_label_amount(lines: &[String]) -> Option<i64> {
    let label_index = lines
        .iter()
        .position(|l| EXACT_LABELS.contains(&l.trim()))?;
    lines
        .iter()
        .skip(label_index + 1)
        .take(LABEL_LOOKAHEAD)
        .flat_map(|l| l.split_whitespace())
        .next()
        .and_then(parse_locale_number)
        .map(|v| v.round() as i64)
}

/// Parse a number the way it appears on mixed Dutch/English paperwork:
/// comma or dot decimals, optional thousands separators, surrounding
/// junk ignored. A lone separator followed by exactly three digits is
/// read as a thousands separator.
pub fn parse_locale_number(token: &str) -> Option<f64> {
    let cleaned: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');
    let normalized = if has_dot && has_comma {
        // Rightmost separator is the decimal one.
        let decimal = if cleaned.rfind('.') > cleaned.rfind(',') {
            '.'
        } else {
            ','
        };
        let thousands = if decimal == '.' { ',' } else { '.' };
        cleaned.replace(thousands, "").replace(decimal, ".")
    } else if has_dot {
        normalize_single_separator(&cleaned, '.')
    } else if has_comma {
        normalize_single_separator(&cleaned, ',')
    } else {
        cleaned
    };

    normalized.parse().ok()
}

fn normalize_single_separator(cleaned: &str, sep: char) -> String {
    if cleaned.matches(sep).count() > 1 {
        return cleaned.replace(sep, "");
    }
    match cleaned.find(sep) {
        Some(idx) if cleaned.len() - idx - 1 == 3 => cleaned.replace(sep, ""),
        Some(_) => cleaned.replace(sep, "."),
        None => cleaned.to_string(),
    }
}
