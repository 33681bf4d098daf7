//! Google Sheets contact source — reads a value range over the Sheets v4 REST API.
//!
//! Credentials come from [`super::google_auth::resolve_auth`].

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::contacts::ContactSource;
use crate::error::ContactError;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// How requests to the Sheets API are authorized.
#[derive(Debug, Clone)]
pub enum SheetsAuth {
    ApiKey(SecretString),
    Bearer(SecretString),
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Reads one A1 range from a spreadsheet.
pub struct SheetsSource {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    auth: SheetsAuth,
}

impl SheetsSource {
    pub fn new(
        client: reqwest::Client,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        auth: SheetsAuth,
    ) -> Self {
        Self {
            client,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            auth,
        }
    }

    /// Point the source at a different API host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn values_url(&self) -> Result<Url, ContactError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ContactError::Http(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ContactError::Http(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", self.range.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl ContactSource for SheetsSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, ContactError> {
        let url = self.values_url()?;
        let request = match &self.auth {
            SheetsAuth::ApiKey(key) => self.client.get(url).query(&[("key", key.expose_secret())]),
            SheetsAuth::Bearer(token) => self.client.get(url).bearer_auth(token.expose_secret()),
        };

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ContactError::Http(format!("values.get returned {status}: {body}")));
        }

        let range: ValueRange = resp.json().await?;
        let rows: Vec<Vec<String>> = range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect();

        info!(rows = rows.len(), range = %self.range, "Fetched contact rows");
        Ok(rows)
    }
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
