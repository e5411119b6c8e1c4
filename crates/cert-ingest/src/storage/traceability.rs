//! Traceability store: where extracted records end up
//!
//! Upserts are merge-by-natural-key (serial, or certification+part) so a
//! re-delivered document never creates duplicates. All records from one
//! document are written inside a single transaction; a failed document
//! leaves no partial rows behind.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{CategoryRecord, MeasurementStatus, TransducerCalibration};

/// SQLite-backed traceability store
pub struct TraceabilityStore {
    conn: Arc<Mutex<Connection>>,
}

impl TraceabilityStore {
    /// Create or open the store at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open traceability store: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::Internal(format!("Failed to open in-memory traceability store: {}", e))
        })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            -- Per-serial flow restrictor measurements
            CREATE TABLE IF NOT EXISTS restrictor_measurements (
                serial TEXT PRIMARY KEY,
                certification TEXT NOT NULL,
                length_mm REAL NOT NULL,
                diameter_mm REAL NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_restrictor_certification
                ON restrictor_measurements(certification);

            -- Calibrated transducer serials per certification
            CREATE TABLE IF NOT EXISTS transducer_serials (
                serial TEXT PRIMARY KEY,
                certification TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transducer_certification
                ON transducer_serials(certification);

            -- Bulk shipments: amount and drawing per certification+part
            CREATE TABLE IF NOT EXISTS bulk_parts (
                certification TEXT NOT NULL,
                part TEXT NOT NULL,
                amount INTEGER NOT NULL,
                drawing TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (certification, part)
            );

            -- Calibration sidecar payloads per transducer serial
            CREATE TABLE IF NOT EXISTS transducer_calibrations (
                serial TEXT PRIMARY KEY,
                calibration_date TEXT,
                range_min REAL,
                range_max REAL,
                coefficients_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

        Ok(())
    }

    /// Upsert all records from one document atomically.
    pub fn upsert_records(&self, records: &[CategoryRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Internal(format!("Failed to begin transaction: {}", e)))?;

        let now = Utc::now().to_rfc3339();
        for record in records {
            match record {
                CategoryRecord::FlowRestrictors {
                    certification,
                    measurements,
                } => {
                    for m in measurements {
                        tx.execute(
                            r#"
                            INSERT INTO restrictor_measurements
                                (serial, certification, length_mm, diameter_mm, status, updated_at)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                            ON CONFLICT(serial) DO UPDATE SET
                                certification = excluded.certification,
                                length_mm = excluded.length_mm,
                                diameter_mm = excluded.diameter_mm,
                                status = excluded.status,
                                updated_at = excluded.updated_at
                            "#,
                            params![
                                m.serial,
                                certification,
                                m.length_mm,
                                m.diameter_mm,
                                measurement_status_to_string(m.status),
                                now,
                            ],
                        )
                        .map_err(|e| {
                            Error::Internal(format!("Failed to upsert measurement: {}", e))
                        })?;
                    }
                }
                CategoryRecord::TransducerBatch {
                    certification,
                    serials,
                } => {
                    for serial in serials {
                        tx.execute(
                            r#"
                            INSERT INTO transducer_serials (serial, certification, updated_at)
                            VALUES (?1, ?2, ?3)
                            ON CONFLICT(serial) DO UPDATE SET
                                certification = excluded.certification,
                                updated_at = excluded.updated_at
                            "#,
                            params![serial, certification, now],
                        )
                        .map_err(|e| {
                            Error::Internal(format!("Failed to upsert transducer serial: {}", e))
                        })?;
                    }
                }
                CategoryRecord::BulkParts {
                    certification,
                    part,
                    amount,
                    drawing,
                } => {
                    tx.execute(
                        r#"
                        INSERT INTO bulk_parts (certification, part, amount, drawing, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT(certification, part) DO UPDATE SET
                            amount = excluded.amount,
                            drawing = excluded.drawing,
                            updated_at = excluded.updated_at
                        "#,
                        params![certification, part.as_str(), amount, drawing, now],
                    )
                    .map_err(|e| Error::Internal(format!("Failed to upsert bulk parts: {}", e)))?;
                }
            }
        }

        tx.commit()
            .map_err(|e| Error::Internal(format!("Failed to commit records: {}", e)))?;

        Ok(())
    }

    /// Upsert all calibrations from one package atomically.
    pub fn upsert_calibrations(&self, calibrations: &[TransducerCalibration]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Internal(format!("Failed to begin transaction: {}", e)))?;

        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO transducer_calibrations
                        (serial, calibration_date, range_min, range_max, coefficients_json, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(serial) DO UPDATE SET
                        calibration_date = excluded.calibration_date,
                        range_min = excluded.range_min,
                        range_max = excluded.range_max,
                        coefficients_json = excluded.coefficients_json,
                        updated_at = excluded.updated_at
                    "#,
                )
                .map_err(|e| Error::Internal(format!("Failed to prepare statement: {}", e)))?;

            for cal in calibrations {
                let coefficients_json = serde_json::to_string(&cal.coefficients)?;
                stmt.execute(params![
                    cal.serial,
                    cal.calibration_date,
                    cal.range_min,
                    cal.range_max,
                    coefficients_json,
                    now,
                ])
                .map_err(|e| Error::Internal(format!("Failed to upsert calibration: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::Internal(format!("Failed to commit calibrations: {}", e)))?;

        Ok(())
    }

    /// Certification a transducer serial is recorded under, if any.
    pub fn get_transducer_certification(&self, serial: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();

        let certification = conn
            .query_row(
                "SELECT certification FROM transducer_serials WHERE serial = ?1",
                params![serial],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to get transducer serial: {}", e)))?;

        Ok(certification)
    }

    /// Stored measurement for a restrictor serial, if any.
    pub fn get_restrictor(
        &self,
        serial: &str,
    ) -> Result<Option<(String, f64, f64, MeasurementStatus)>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT certification, length_mm, diameter_mm, status \
                 FROM restrictor_measurements WHERE serial = ?1",
                params![serial],
                |row| {
                    let status: String = row.get(3)?;
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        string_to_measurement_status(&status),
                    ))
                },
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to get restrictor: {}", e)))?;

        Ok(row)
    }

    /// Stored amount and drawing for a certification+part pair, if any.
    pub fn get_bulk(&self, certification: &str, part: &str) -> Result<Option<(i64, String)>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT amount, drawing FROM bulk_parts WHERE certification = ?1 AND part = ?2",
                params![certification, part],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to get bulk parts: {}", e)))?;

        Ok(row)
    }

    /// Stored calibration coefficients for a serial, if any.
    pub fn get_calibration(&self, serial: &str) -> Result<Option<Vec<f64>>> {
        let conn = self.conn.lock();

        let coefficients_json: Option<String> = conn
            .query_row(
                "SELECT coefficients_json FROM transducer_calibrations WHERE serial = ?1",
                params![serial],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to get calibration: {}", e)))?;

        match coefficients_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn measurement_status_to_string(status: MeasurementStatus) -> &'static str {
    match status {
        MeasurementStatus::WithinTolerance => "within_tolerance",
        MeasurementStatus::GeometryDeviation => "geometry_deviation",
        MeasurementStatus::DimensionDeviation => "dimension_deviation",
    }
}

fn string_to_measurement_status(s: &str) -> MeasurementStatus {
    match s {
        "within_tolerance" => MeasurementStatus::WithinTolerance,
        "geometry_deviation" => MeasurementStatus::GeometryDeviation,
        "dimension_deviation" => MeasurementStatus::DimensionDeviation,
        _ => MeasurementStatus::WithinTolerance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CategoryKind, RestrictorMeasurement};

    #[test]
    fn test_upsert_records_is_idempotent() {
        let store = TraceabilityStore::in_memory().unwrap();

        let records = vec![
            CategoryRecord::FlowRestrictors {
                certification: "C25-0110".to_string(),
                measurements: vec![RestrictorMeasurement {
                    serial: "FR-001".to_string(),
                    length_mm: 12.01,
                    diameter_mm: 1.52,
                    status: MeasurementStatus::WithinTolerance,
                }],
            },
            CategoryRecord::BulkParts {
                certification: "C25-0110".to_string(),
                part: CategoryKind::Valve,
                amount: 40,
                drawing: "DRW-1100-B".to_string(),
            },
        ];

        store.upsert_records(&records).unwrap();
        store.upsert_records(&records).unwrap();

        let (certification, length, _, status) =
            store.get_restrictor("FR-001").unwrap().unwrap();
        assert_eq!(certification, "C25-0110");
        assert!((length - 12.01).abs() < f64::EPSILON);
        assert_eq!(status, MeasurementStatus::WithinTolerance);

        let (amount, drawing) = store.get_bulk("C25-0110", "valve").unwrap().unwrap();
        assert_eq!(amount, 40);
        assert_eq!(drawing, "DRW-1100-B");
    }

    #[test]
    fn test_reassigning_serial_moves_certification() {
        let store = TraceabilityStore::in_memory().unwrap();

        store
            .upsert_records(&[CategoryRecord::TransducerBatch {
                certification: "C24-0001".to_string(),
                serials: vec!["PT-9917".to_string()],
            }])
            .unwrap();
        store
            .upsert_records(&[CategoryRecord::TransducerBatch {
                certification: "C25-0002".to_string(),
                serials: vec!["PT-9917".to_string()],
            }])
            .unwrap();

        assert_eq!(
            store.get_transducer_certification("PT-9917").unwrap().unwrap(),
            "C25-0002"
        );
    }

    #[test]
    fn test_upsert_calibrations() {
        let store = TraceabilityStore::in_memory().unwrap();

        let cal = TransducerCalibration {
            serial: "PT-9917".to_string(),
            calibration_date: Some("2025-06-12".to_string()),
            range_min: Some(0.0),
            range_max: Some(400.0),
            coefficients: vec![1.002, -0.013, 0.0004],
        };
        store.upsert_calibrations(&[cal.clone()]).unwrap();
        store.upsert_calibrations(&[cal]).unwrap();

        let coefficients = store.get_calibration("PT-9917").unwrap().unwrap();
        assert_eq!(coefficients, vec![1.002, -0.013, 0.0004]);
    }
}
