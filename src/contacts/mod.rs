//! Contacts — phone normalization and spreadsheet row parsing.

pub mod google_auth;
pub mod sheets;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ContactError};

pub use sheets::SheetsSource;

/// Required header names (matched case-insensitively).
const HEADER_NAME: &str = "full_name";
const HEADER_EMAIL: &str = "email";
const HEADER_PHONE: &str = "phone_number";

/// Canonical recipient address in international numeric form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneIdentity(String);

impl PhoneIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recipient read from the contact sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: PhoneIdentity,
}

impl Contact {
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: PhoneIdentity) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone,
        }
    }
}

/// National numbering rules used to canonicalize raw phone cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingPlan {
    /// Country calling code without `+`, e.g. `51`.
    pub country_code: String,
    /// Leading digit(s) of a local mobile number, e.g. `9`.
    pub mobile_prefix: String,
    /// Length of the local mobile number.
    pub local_digits: usize,
}

impl Default for NumberingPlan {
    fn default() -> Self {
        Self {
            country_code: "51".to_string(),
            mobile_prefix: "9".to_string(),
            local_digits: 9,
        }
    }
}

impl NumberingPlan {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !all_digits(&self.country_code) {
            return Err(ConfigError::InvalidValue {
                key: "COUNTRY_CODE".into(),
                message: format!("{:?} is not a numeric calling code", self.country_code),
            });
        }
        if !all_digits(&self.mobile_prefix) || self.mobile_prefix.len() > self.local_digits {
            return Err(ConfigError::InvalidValue {
                key: "MOBILE_PREFIX".into(),
                message: format!("{:?} is not a valid mobile prefix", self.mobile_prefix),
            });
        }
        Ok(())
    }

    /// Compile the plan into a normalizer.
    pub fn normalizer(&self) -> Result<PhoneNormalizer, ConfigError> {
        self.validate()?;
        let pattern = format!(r"^{}\d{{{}}}$", self.country_code, self.local_digits);
        let international = Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
            key: "COUNTRY_CODE".into(),
            message: e.to_string(),
        })?;
        Ok(PhoneNormalizer {
            plan: self.clone(),
            international,
        })
    }
}

/// Maps free-form phone cells to a [`PhoneIdentity`].
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    plan: NumberingPlan,
    international: Regex,
}

impl PhoneNormalizer {
    /// Normalize a raw phone cell. Returns `None` when the number does not
    /// fit the numbering plan.
    ///
    /// - non-digits are stripped
    /// - an already prefixed number of the full length passes through
    /// - leading zeros are dropped from a local number
    /// - a local mobile number gets the country code prepended
    pub fn normalize(&self, raw: &str) -> Option<PhoneIdentity> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        if self.international.is_match(&digits) {
            return Some(PhoneIdentity(digits));
        }

        let local = digits.trim_start_matches('0');
        if local.len() == self.plan.local_digits && local.starts_with(&self.plan.mobile_prefix) {
            return Some(PhoneIdentity(format!("{}{}", self.plan.country_code, local)));
        }
        None
    }
}

/// Something that yields raw spreadsheet rows (header row first).
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, ContactError>;
}

/// Parse sheet rows into contacts.
///
/// The first row must carry the `full_name`, `email` and `phone_number`
/// headers. Rows whose phone does not normalize are dropped. Duplicate
/// identities keep the position of their first row and the values of their
/// last.
pub fn contacts_from_rows(
    rows: &[Vec<String>],
    normalizer: &PhoneNormalizer,
) -> Result<Vec<Contact>, ContactError> {
    if rows.len() < 2 {
        return Ok(Vec::new());
    }

    let head: Vec<String> = rows[0].iter().map(|h| h.trim().to_lowercase()).collect();
    let column = |name: &str| head.iter().position(|h| h == name);
    let (Some(i_name), Some(i_email), Some(i_phone)) =
        (column(HEADER_NAME), column(HEADER_EMAIL), column(HEADER_PHONE))
    else {
        return Err(ContactError::MissingHeaders);
    };

    let cell = |row: &Vec<String>, i: usize| row.get(i).map(|s| s.trim().to_string()).unwrap_or_default();

    let mut contacts: Vec<Contact> = Vec::new();
    let mut index: HashMap<PhoneIdentity, usize> = HashMap::new();

    for (line, row) in rows.iter().enumerate().skip(1) {
        let raw_phone = cell(row, i_phone);
        let Some(phone) = normalizer.normalize(&raw_phone) else {
            debug!(row = line + 1, phone = %raw_phone, "Dropping contact with invalid phone");
            continue;
        };
        let contact = Contact::new(cell(row, i_name), cell(row, i_email), phone);

        match index.get(&contact.phone) {
            Some(&pos) => contacts[pos] = contact,
            None => {
                index.insert(contact.phone.clone(), contacts.len());
                contacts.push(contact);
            }
        }
    }

    Ok(contacts)
}

#[cfg(test)]
pub(crate) fn identity(s: &str) -> PhoneIdentity {
    PhoneIdentity(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> PhoneNormalizer {
        NumberingPlan::default().normalizer().unwrap()
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    // ── Normalization ───────────────────────────────────────────────

    #[test]
    fn local_mobile_gets_country_code() {
        assert_eq!(normalizer().normalize("987654321"), Some(identity("51987654321")));
    }

    #[test]
    fn prefixed_number_passes_through() {
        assert_eq!(normalizer().normalize("51987654321"), Some(identity("51987654321")));
    }

    #[test]
    fn formatting_and_leading_zero_stripped() {
        let n = normalizer();
        assert_eq!(n.normalize("+51 987 654 321"), Some(identity("51987654321")));
        assert_eq!(n.normalize("0 987-654-321"), Some(identity("51987654321")));
    }

    #[test]
    fn malformed_numbers_rejected() {
        let n = normalizer();
        assert_eq!(n.normalize(""), None);
        assert_eq!(n.normalize("not a phone"), None);
        assert_eq!(n.normalize("12345"), None);
        // Local length but wrong mobile prefix.
        assert_eq!(n.normalize("887654321"), None);
        // Eleven digits without the country code.
        assert_eq!(n.normalize("52987654321"), None);
        assert_eq!(n.normalize("5198765432100"), None);
    }

    #[test]
    fn invalid_plan_rejected() {
        let plan = NumberingPlan {
            country_code: "+51".into(),
            ..NumberingPlan::default()
        };
        assert!(plan.normalizer().is_err());
    }

    // ── Row parsing ─────────────────────────────────────────────────

    #[test]
    fn rows_parsed_with_any_header_order() {
        let rows = vec![
            row(&[" Phone_Number", "EMAIL", "full_name "]),
            row(&["987654321", "ana@example.com", " Ana "]),
            row(&["51912345678", "", "Luis"]),
        ];
        let contacts = contacts_from_rows(&rows, &normalizer()).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].name, "Ana");
        assert_eq!(contacts[0].email, "ana@example.com");
        assert_eq!(contacts[0].phone, identity("51987654321"));
        assert_eq!(contacts[1].phone, identity("51912345678"));
    }

    #[test]
    fn missing_headers_is_an_error() {
        let rows = vec![row(&["name", "email", "phone"]), row(&["Ana", "a@b.c", "987654321"])];
        assert!(matches!(
            contacts_from_rows(&rows, &normalizer()),
            Err(ContactError::MissingHeaders)
        ));
    }

    #[test]
    fn header_only_sheet_is_empty() {
        let rows = vec![row(&["full_name", "email", "phone_number"])];
        assert!(contacts_from_rows(&rows, &normalizer()).unwrap().is_empty());
        assert!(contacts_from_rows(&[], &normalizer()).unwrap().is_empty());
    }

    #[test]
    fn invalid_and_short_rows_dropped() {
        let rows = vec![
            row(&["full_name", "email", "phone_number"]),
            row(&["Ana", "a@example.com", "123"]),
            row(&["Luis"]),
            row(&["Rosa", "r@example.com", "912345678"]),
        ];
        let contacts = contacts_from_rows(&rows, &normalizer()).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Rosa");
    }

    #[test]
    fn duplicates_keep_first_position_and_last_values() {
        let rows = vec![
            row(&["full_name", "email", "phone_number"]),
            row(&["Ana", "old@example.com", "987654321"]),
            row(&["Luis", "l@example.com", "912345678"]),
            row(&["Ana María", "new@example.com", "51987654321"]),
        ];
        let contacts = contacts_from_rows(&rows, &normalizer()).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].name, "Ana María");
        assert_eq!(contacts[0].email, "new@example.com");
        assert_eq!(contacts[1].name, "Luis");
    }
}
