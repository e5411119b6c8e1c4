//! Structured records produced by category extraction

use std::fmt;

use serde::{Deserialize, Serialize};

/// Part categories the pipeline recognizes.
///
/// Classification and extraction dispatch on this enum; each variant has a
/// dedicated extractor and its own keyword list in the configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    /// Flow restrictor with per-serial orifice measurements
    FlowRestrictor,
    /// Calibrated pressure transducer batch
    PressureTransducer,
    /// Bulk-shipped valve
    Valve,
    /// Bulk-shipped manifold
    Manifold,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::FlowRestrictor => "flow_restrictor",
            CategoryKind::PressureTransducer => "pressure_transducer",
            CategoryKind::Valve => "valve",
            CategoryKind::Manifold => "manifold",
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-way tolerance verdict for a restrictor measurement.
///
/// The geometry check (length-to-diameter relationship) runs first; only
/// when geometry holds are the individual dimensions checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementStatus {
    /// All checks within their tolerance bands
    WithinTolerance,
    /// Length/diameter relationship outside its band
    GeometryDeviation,
    /// A single dimension outside its band
    DimensionDeviation,
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithinTolerance => f.write_str("within_tolerance"),
            Self::GeometryDeviation => f.write_str("geometry_deviation"),
            Self::DimensionDeviation => f.write_str("dimension_deviation"),
        }
    }
}

/// One measured flow restrictor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestrictorMeasurement {
    /// Engraved serial number
    pub serial: String,
    /// Measured restrictor length in millimeters
    pub length_mm: f64,
    /// Measured orifice diameter in millimeters
    pub diameter_mm: f64,
    /// Tolerance verdict against the reference dimensions
    pub status: MeasurementStatus,
}

/// Category-specific structured output handed to the persistence adapter.
///
/// Upserts use natural keys: the serial for restrictors and transducers,
/// the (certification, part) pair for bulk shipments. Re-delivering the
/// same record must never create duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CategoryRecord {
    /// Flow restrictor certificate: one measurement row per serial
    FlowRestrictors {
        certification: String,
        measurements: Vec<RestrictorMeasurement>,
    },
    /// Pressure transducer certificate: the calibrated serial numbers
    TransducerBatch {
        certification: String,
        serials: Vec<String>,
    },
    /// Bulk shipment: part count plus the drawing it was made to
    BulkParts {
        certification: String,
        part: CategoryKind,
        amount: i64,
        drawing: String,
    },
}

impl CategoryRecord {
    pub fn certification(&self) -> &str {
        match self {
            Self::FlowRestrictors { certification, .. } => certification,
            Self::TransducerBatch { certification, .. } => certification,
            Self::BulkParts { certification, .. } => certification,
        }
    }

    pub fn kind(&self) -> CategoryKind {
        match self {
            Self::FlowRestrictors { .. } => CategoryKind::FlowRestrictor,
            Self::TransducerBatch { .. } => CategoryKind::PressureTransducer,
            Self::BulkParts { part, .. } => *part,
        }
    }
}

/// Calibration sidecar payload for one pressure transducer.
///
/// Delivered as JSON files inside dated package directories. Conversion
/// formulas are out of scope here; coefficients are stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransducerCalibration {
    /// Transducer serial number
    pub serial: String,
    /// Calibration date as delivered (not normalized)
    #[serde(default)]
    pub calibration_date: Option<String>,
    /// Lower bound of the calibrated pressure range
    #[serde(default)]
    pub range_min: Option<f64>,
    /// Upper bound of the calibrated pressure range
    #[serde(default)]
    pub range_max: Option<f64>,
    /// Polynomial coefficients as delivered
    #[serde(default)]
    pub coefficients: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_and_certification() {
        let record = CategoryRecord::BulkParts {
            certification: "C25-0110".to_string(),
            part: CategoryKind::Valve,
            amount: 40,
            drawing: "DRW-1100-B".to_string(),
        };
        assert_eq!(record.kind(), CategoryKind::Valve);
        assert_eq!(record.certification(), "C25-0110");
    }

    #[test]
    fn test_calibration_json_shape() {
        let json = r#"{
            "serial": "PT-9917",
            "calibrationDate": "2025-06-12",
            "rangeMin": 0.0,
            "rangeMax": 400.0,
            "coefficients": [1.002, -0.013, 0.0004]
        }"#;
        let cal: TransducerCalibration = serde_json::from_str(json).unwrap();
        assert_eq!(cal.serial, "PT-9917");
        assert_eq!(cal.coefficients.len(), 3);
    }

    #[test]
    fn test_calibration_json_minimal() {
        let cal: TransducerCalibration =
            serde_json::from_str(r#"{"serial": "PT-1"}"#).unwrap();
        assert!(cal.calibration_date.is_none());
        assert!(cal.coefficients.is_empty());
    }
}
