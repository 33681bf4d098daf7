//! Report row builder.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::Serialize;

use crate::contacts::Contact;
use crate::delivery::Outcome;

/// Placeholder for the message column; the chosen template is not recorded.
pub const MESSAGE_COLUMN: &str = "random";

/// Immutable snapshot of what happened to one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
    pub status: Outcome,
    pub attempt_id: String,
    pub timestamp_iso: String,
    pub timestamp_local: String,
    pub detail: String,
}

/// Build the row for one contact.
pub fn build_row(
    contact: &Contact,
    status: Outcome,
    attempt_id: &str,
    timestamp_iso: &str,
    timestamp_local: &str,
    detail: Option<&str>,
) -> ReportRow {
    ReportRow {
        name: contact.name.clone(),
        email: contact.email.clone(),
        phone: contact.phone.to_string(),
        message: MESSAGE_COLUMN.to_string(),
        status,
        attempt_id: attempt_id.to_string(),
        timestamp_iso: timestamp_iso.to_string(),
        timestamp_local: timestamp_local.to_string(),
        detail: detail.unwrap_or_default().to_string(),
    }
}

/// `2025-03-01T10:00:00.000Z`
pub fn format_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Operator-facing local time, 24h clock.
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%d/%m/%Y, %H:%M:%S").to_string()
}
