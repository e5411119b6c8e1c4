//! Configuration for the ingestion pipeline

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::CategoryKind;

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Watched roots and event handling
    #[serde(default)]
    pub watch: WatchConfig,
    /// Cloud extraction service
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Monthly page quota
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Local OCR engine
    #[serde(default)]
    pub ocr: OcrConfig,
    /// Tolerance bands for restrictor measurements
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    /// Persistent state and traceability store locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Category keyword lists, in detection priority order
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryKeywords>,
    /// Declarative per-source profiles, first filename match wins
    #[serde(default)]
    pub profiles: Vec<SourceProfile>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch: WatchConfig::default(),
            cloud: CloudConfig::default(),
            quota: QuotaConfig::default(),
            ocr: OcrConfig::default(),
            tolerance: ToleranceConfig::default(),
            storage: StorageConfig::default(),
            categories: default_categories(),
            profiles: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file, or defaults when no path given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    Error::Config(format!("Failed to read config {}: {}", p.display(), e))
                })?;
                toml::from_str(&raw).map_err(|e| {
                    Error::Config(format!("Failed to parse config {}: {}", p.display(), e))
                })?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Validate invariants a running pipeline depends on.
    pub fn validate(&self) -> Result<()> {
        if self.watch.roots.is_empty() {
            return Err(Error::Config("no watched roots configured".to_string()));
        }
        if self.categories.is_empty() {
            return Err(Error::Config("no category keywords configured".to_string()));
        }
        for category in &self.categories {
            if category.keywords.is_empty()
                || category.keywords.iter().any(|k| k.trim().is_empty())
            {
                return Err(Error::Config(format!(
                    "empty keyword list for category {}",
                    category.kind
                )));
            }
        }
        if self.quota.monthly_page_cap == 0 {
            return Err(Error::Config("monthly_page_cap must be positive".to_string()));
        }
        if self.cloud.page_limit == 0 {
            return Err(Error::Config("cloud.page_limit must be positive".to_string()));
        }
        Ok(())
    }

    /// First profile whose selector matches the filename (case-insensitive).
    pub fn profile_for(&self, filename: &str) -> Option<&SourceProfile> {
        let lower = filename.to_lowercase();
        self.profiles
            .iter()
            .find(|p| lower.contains(&p.filename_contains.to_lowercase()))
    }

    /// Upload page limit for a document, honoring its profile override.
    pub fn page_limit_for(&self, filename: &str) -> u32 {
        self.profile_for(filename)
            .and_then(|p| p.page_limit)
            .unwrap_or(self.cloud.page_limit)
    }
}

/// Kind of content a watched root delivers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    /// Certification document files
    #[default]
    Documents,
    /// Calibration packages: dated directories of JSON sidecar files
    Packages,
}

/// One watched root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedRoot {
    /// Directory to watch recursively
    pub path: PathBuf,
    /// What arrives under this root
    #[serde(default)]
    pub kind: RootKind,
}

/// Watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Watched roots, one queue and worker each
    #[serde(default)]
    pub roots: Vec<WatchedRoot>,
    /// Document extension the watcher reacts to
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Wait after a package directory appears before enumerating it, so
    /// all sidecar files have landed
    #[serde(default = "default_package_debounce")]
    pub package_debounce_secs: u64,
    /// Enqueue files already present under document roots at startup
    #[serde(default = "default_sweep_on_start")]
    pub sweep_on_start: bool,
}

fn default_extension() -> String { "pdf".to_string() }
fn default_package_debounce() -> u64 { 5 }
fn default_sweep_on_start() -> bool { true }

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extension: default_extension(),
            package_debounce_secs: default_package_debounce(),
            sweep_on_start: default_sweep_on_start(),
        }
    }
}

/// Cloud extraction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the extraction service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Object storage bucket documents are uploaded to
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Logical folder prefix inside the bucket
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Seconds between job status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Longer sleep after a transient poll failure
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Consecutive poll failures tolerated before giving up on the document
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
    /// Overall wall-clock budget for one extraction job
    #[serde(default = "default_job_deadline")]
    pub job_deadline_secs: u64,
    /// Pages uploaded per document unless a profile overrides it
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

fn default_endpoint() -> String { "http://localhost:9400".to_string() }
fn default_api_key_env() -> String { "CERT_INGEST_API_KEY".to_string() }
fn default_bucket() -> String { "certification-documents".to_string() }
fn default_folder() -> String { "incoming".to_string() }
fn default_poll_interval() -> u64 { 5 }
fn default_backoff() -> u64 { 30 }
fn default_max_poll_failures() -> u32 { 5 }
fn default_job_deadline() -> u64 { 1800 }
fn default_page_limit() -> u32 { 20 }

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            bucket: default_bucket(),
            folder: default_folder(),
            poll_interval_secs: default_poll_interval(),
            backoff_secs: default_backoff(),
            max_poll_failures: default_max_poll_failures(),
            job_deadline_secs: default_job_deadline(),
            page_limit: default_page_limit(),
        }
    }
}

/// Monthly page quota for the cloud service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Hard cap on pages per calendar month; reservations that would reach
    /// it are refused, never throttled
    #[serde(default = "default_page_cap")]
    pub monthly_page_cap: u32,
}

fn default_page_cap() -> u32 { 1000 }

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_page_cap: default_page_cap(),
        }
    }
}

/// Local OCR engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Render resolution for page rasterization
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Tesseract language code
    #[serde(default = "default_language")]
    pub language: String,
    /// Residual skew below this many degrees is left uncorrected
    #[serde(default = "default_skew_threshold")]
    pub skew_threshold_deg: f64,
    /// Scan band height as a fraction of page height
    #[serde(default = "default_band_height")]
    pub band_height_frac: f64,
    /// Vertical step between bands; smaller than the height so bands overlap
    #[serde(default = "default_band_step")]
    pub band_step_frac: f64,
    /// Consecutive pages without the layout marker before scanning stops
    #[serde(default = "default_miss_streak")]
    pub miss_streak: u32,
}

fn default_dpi() -> u32 { 150 }
fn default_language() -> String { "eng".to_string() }
fn default_skew_threshold() -> f64 { 0.5 }
fn default_band_height() -> f64 { 0.12 }
fn default_band_step() -> f64 { 0.08 }
fn default_miss_streak() -> u32 { 2 }

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            language: default_language(),
            skew_threshold_deg: default_skew_threshold(),
            band_height_frac: default_band_height(),
            band_step_frac: default_band_step(),
            miss_streak: default_miss_streak(),
        }
    }
}

/// Percentage tolerance bands for restrictor measurements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Allowed deviation of the length/diameter ratio, percent
    #[serde(default = "default_geometry_pct")]
    pub geometry_pct: f64,
    /// Allowed deviation of a single dimension, percent
    #[serde(default = "default_dimension_pct")]
    pub dimension_pct: f64,
}

fn default_geometry_pct() -> f64 { 5.0 }
fn default_dimension_pct() -> f64 { 2.0 }

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            geometry_pct: default_geometry_pct(),
            dimension_pct: default_dimension_pct(),
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Pipeline state database (quota, cache, jobs, registry)
    pub db_path: PathBuf,
    /// Traceability store database
    pub traceability_db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
            .join("cert-ingest");
        Self {
            db_path: base.join("pipeline.db"),
            traceability_db_path: base.join("traceability.db"),
        }
    }
}

/// Keyword list for one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryKeywords {
    /// The category these keywords identify
    pub kind: CategoryKind,
    /// Matched case-insensitively on word boundaries
    pub keywords: Vec<String>,
}

fn default_categories() -> Vec<CategoryKeywords> {
    vec![
        CategoryKeywords {
            kind: CategoryKind::FlowRestrictor,
            keywords: vec!["restrictor".to_string(), "orifice".to_string()],
        },
        CategoryKeywords {
            kind: CategoryKind::PressureTransducer,
            keywords: vec!["transducer".to_string(), "druksensor".to_string()],
        },
        CategoryKeywords {
            kind: CategoryKind::Valve,
            keywords: vec!["valve".to_string(), "afsluiter".to_string()],
        },
        CategoryKeywords {
            kind: CategoryKind::Manifold,
            keywords: vec!["manifold".to_string(), "verdeelblok".to_string()],
        },
    ]
}

/// Fractional page region, all fields in 0.0..=1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Region {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Region {
    fn default() -> Self {
        // Top strip where the page title sits on the known layouts.
        Self {
            left: 0.05,
            top: 0.03,
            width: 0.90,
            height: 0.08,
        }
    }
}

/// Declarative settings for one document family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Profile name, used in logs
    pub name: String,
    /// Substring the filename must contain (case-insensitive)
    pub filename_contains: String,
    /// Upload page limit override for this family
    #[serde(default)]
    pub page_limit: Option<u32>,
    /// Page title marking pages that belong to this family; when set the
    /// document takes the local OCR path instead of the cloud service
    #[serde(default)]
    pub layout_marker: Option<String>,
    /// Where on the page the marker is expected
    #[serde(default)]
    pub marker_region: Region,
}

impl SourceProfile {
    /// Profiles with a layout marker are handled by the local OCR engine.
    pub fn uses_local_ocr(&self) -> bool {
        self.layout_marker.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, selector: &str, limit: Option<u32>) -> SourceProfile {
        SourceProfile {
            name: name.to_string(),
            filename_contains: selector.to_string(),
            page_limit: limit,
            layout_marker: None,
            marker_region: Region::default(),
        }
    }

    #[test]
    fn test_profile_selection_first_match_wins() {
        let mut config = PipelineConfig::default();
        config.profiles = vec![
            profile("vendor-a", "vendor_a", Some(30)),
            profile("vendor-a-legacy", "vendor", Some(10)),
        ];
        let selected = config.profile_for("VENDOR_A_C25-0110.pdf").unwrap();
        assert_eq!(selected.name, "vendor-a");
        assert_eq!(config.page_limit_for("VENDOR_A_C25-0110.pdf"), 30);
    }

    #[test]
    fn test_page_limit_falls_back_to_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.page_limit_for("unknown.pdf"), 20);
    }

    #[test]
    fn test_validate_rejects_empty_keywords() {
        let mut config = PipelineConfig::default();
        config.watch.roots.push(WatchedRoot {
            path: PathBuf::from("/tmp/in"),
            kind: RootKind::Documents,
        });
        config.categories[0].keywords.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let raw = r#"
            [[watch.roots]]
            path = "/srv/certs/incoming"

            [[watch.roots]]
            path = "/srv/certs/calibrations"
            kind = "packages"

            [quota]
            monthly_page_cap = 800

            [[profiles]]
            name = "vendor-a"
            filename_contains = "vendor_a"
            page_limit = 30
        "#;
        let config: PipelineConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.watch.roots.len(), 2);
        assert_eq!(config.watch.roots[1].kind, RootKind::Packages);
        assert_eq!(config.quota.monthly_page_cap, 800);
        assert_eq!(config.profiles[0].page_limit, Some(30));
        assert!(config.validate().is_ok());
    }
}
