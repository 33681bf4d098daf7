//! Report writer — timestamped CSV under the reports directory.
//!
//! Written as CSV, not an xlsx workbook: one row per contact, columns in
//! `ReportRow` field order, readable by any spreadsheet tool.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use super::row::ReportRow;
use crate::error::ReportError;

/// Persists the rows of a run and returns where they went.
pub trait ReportWriter: Send + Sync {
    fn write(&self, rows: &[ReportRow]) -> Result<PathBuf, ReportError>;
}

/// Writes `send_report_<yyyymmdd_HHMMSS>.csv` into a directory.
#[derive(Debug, Clone)]
pub struct CsvReportWriter {
    dir: PathBuf,
}

impl CsvReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `send_report_<stamp>.csv`, or `send_report_<stamp>_<n>.csv` when an
    /// earlier run in the same second already took the name.
    fn create_unique(&self, stamp: &str) -> std::io::Result<(PathBuf, File)> {
        let mut n = 1u32;
        loop {
            let name = if n == 1 {
                format!("send_report_{stamp}.csv")
            } else {
                format!("send_report_{stamp}_{n}.csv")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

impl ReportWriter for CsvReportWriter {
    fn write(&self, rows: &[ReportRow]) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (path, file) = self.create_unique(&stamp)?;

        let mut writer = csv::Writer::from_writer(file);
        if rows.is_empty() {
            writer.write_record([
                "name",
                "email",
                "phone",
                "message",
                "status",
                "attempt_id",
                "timestamp_iso",
                "timestamp_local",
                "detail",
            ])?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        info!(path = %path.display(), rows = rows.len(), "Report written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::{Contact, identity};
    use crate::delivery::Outcome;
    use crate::report::build_row;

    #[test]
    fn writes_header_and_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvReportWriter::new(dir.path().join("reports"));

        let a = Contact::new("Ana", "a@example.com", identity("51911111111"));
        let b = Contact::new("Luis, Jr.", "", identity("51922222222"));
        let rows = vec![
            build_row(&a, Outcome::SkippedCooldown, "a_1", "iso", "local", Some("24h policy")),
            build_row(&b, Outcome::NoWhatsapp, "b_1", "iso", "local", None),
        ];

        let path = writer.write(&rows).unwrap();
        assert!(path.starts_with(dir.path().join("reports")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("send_report_"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("name,email,phone,message,status"));
        assert!(lines[1].contains("skipped_cooldown"));
        assert!(lines[2].starts_with("\"Luis, Jr.\""));
        assert!(lines[2].contains("no_whatsapp"));
    }

    #[test]
    fn same_second_runs_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvReportWriter::new(dir.path());
        let contact = Contact::new("Ana", "a@example.com", identity("51911111111"));
        let rows = vec![build_row(&contact, Outcome::SentText, "a_1", "iso", "local", None)];

        let first = writer.write(&rows).unwrap();
        let second = writer.write(&[]).unwrap();
        let (a, b) = writer.create_unique("20250301_100000").unwrap();
        let (c, _) = writer.create_unique("20250301_100000").unwrap();
        drop(b);

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap().lines().count(), 2);
        assert!(a.ends_with("send_report_20250301_100000.csv"));
        assert!(c.ends_with("send_report_20250301_100000_2.csv"));
    }

    #[test]
    fn empty_run_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = CsvReportWriter::new(dir.path()).write(&[]).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
