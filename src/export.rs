//! Tabular export of the detection history

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::detection::DetectionRecord;

pub const HEADER: [&str; 3] = ["Time", "Plate", "Confidence"];

/// Confidence as a percentage string, e.g. `0.912` -> `91.2%`
pub fn confidence_percent(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

/// Render the history as CSV: header plus one row per record
pub fn export_csv(records: &[DetectionRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for record in records {
        writer.write_record([
            record.display_time.as_str(),
            record.plate.as_str(),
            confidence_percent(record.confidence).as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV export: {}", e.error()))?;

    Ok(String::from_utf8(bytes)?)
}

/// File name offered when saving an export
pub fn default_file_name(now: DateTime<Local>) -> String {
    format!("detections-{}.csv", now.format("%Y%m%d-%H%M%S"))
}

/// Write the CSV export to `path`
pub fn save_csv(records: &[DetectionRecord], path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let text = export_csv(records)?;

    fs::write(path, text)
        .with_context(|| format!("Failed to write export to {}", path.display()))?;

    info!("Exported {} detections to {}", records.len(), path.display());

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: u64, plate: &str, confidence: f64, timestamp: f64) -> DetectionRecord {
        DetectionRecord {
            id,
            plate: plate.to_string(),
            confidence,
            timestamp,
            display_time: format!("00:{:02}.000", timestamp as u32),
        }
    }

    #[test]
    fn test_export_has_header_and_rows() {
        let records = vec![
            record(1, "ABC123", 0.912, 1.0),
            record(2, "XYZ999", 0.5, 4.0),
            record(3, "KA01AB1234", 1.0, 9.0),
        ];

        let text = export_csv(&records).unwrap();
        assert_eq!(text.lines().count(), records.len() + 1);
        assert_eq!(text.lines().next(), Some("Time,Plate,Confidence"));

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        for (row, source) in rows.iter().zip(&records) {
            assert_eq!(&row[0], source.display_time);
            assert_eq!(&row[1], source.plate);
            assert_eq!(row[2], confidence_percent(source.confidence));
        }
        assert_eq!(&rows[0][2], "91.2%");
        assert_eq!(&rows[2][2], "100.0%");
    }

    #[test]
    fn test_export_empty_history() {
        let text = export_csv(&[]).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_export_quotes_awkward_plates() {
        let text = export_csv(&[record(1, "AB,12\"3", 0.7, 2.0)]).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[1], "AB,12\"3");
    }

    #[test]
    fn test_save_csv_and_file_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let now = Local.with_ymd_and_hms(2025, 6, 1, 8, 30, 5).unwrap();
        let name = default_file_name(now);
        assert_eq!(name, "detections-20250601-083005.csv");

        let path = save_csv(&[record(1, "ABC123", 0.8, 1.0)], dir.path().join(&name)).unwrap();
        let written = fs::read_to_string(path).unwrap();
        assert!(written.contains("ABC123,80.0%"));
    }
}
