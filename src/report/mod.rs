//! Run report — one row per contact, written as a spreadsheet file.

pub mod row;
pub mod writer;

pub use row::{ReportRow, build_row, format_iso, format_local};
pub use writer::{CsvReportWriter, ReportWriter};
