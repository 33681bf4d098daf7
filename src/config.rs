//! Configuration types, built from environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::contacts::NumberingPlan;
use crate::error::ConfigError;

/// Default attempts allowed per hourly window.
pub const DEFAULT_HOURLY_LIMIT: u32 = 5;
/// Default lower bound of the inter-send delay (9 minutes).
pub const DEFAULT_DELAY_MIN_SECS: u64 = 9 * 60;
/// Default upper bound of the inter-send delay (15 minutes).
pub const DEFAULT_DELAY_MAX_SECS: u64 = 15 * 60;

/// Load `KEY=value` pairs from a `.env` file into the process environment.
///
/// Variables already set in the environment are left alone. Returns whether
/// the file existed.
pub fn load_dotenv(path: &Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(ConfigError::DotEnv(format!("{}: {e}", path.display()))),
    }
}

/// Google Sheets access settings.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// API key for publicly readable sheets. Takes precedence over OAuth.
    pub api_key: Option<SecretString>,
    /// OAuth client secrets (installed/web client) or a service-account key.
    pub client_secrets: PathBuf,
    /// Stored OAuth token (access + refresh token).
    pub token_path: PathBuf,
}

impl GoogleConfig {
    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Every value has a default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: get("GOOGLE_API_KEY").map(SecretString::from),
            client_secrets: PathBuf::from(
                get("GOOGLE_CLIENT_SECRETS").unwrap_or_else(|| "client_secrets.json".to_string()),
            ),
            token_path: PathBuf::from(
                get("GOOGLE_TOKEN_PATH").unwrap_or_else(|| "tokens/google_sheets_token.json".to_string()),
            ),
        }
    }
}

/// Settings for a single outreach run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub spreadsheet_id: String,
    pub sheet_range: String,
    /// Attempts (not successes) allowed per window.
    pub hourly_limit: u32,
    pub delay_min: Duration,
    pub delay_max: Duration,
    /// Image sent with the template as caption. Missing file means text mode.
    pub image_path: PathBuf,
    pub templates_path: PathBuf,
    /// Root for the send log, reports and log files.
    pub data_dir: PathBuf,
    pub bridge_url: String,
    /// How long to wait for the chat session to report ready.
    pub ready_timeout: Duration,
    pub google: GoogleConfig,
    pub numbering: NumberingPlan,
}

impl RunConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let spreadsheet_id =
            get("SPREADSHEET_ID").ok_or_else(|| ConfigError::MissingEnvVar("SPREADSHEET_ID".into()))?;
        let sheet_range = get("SHEET_RANGE").unwrap_or_else(|| "Contacts!A:C".to_string());

        let hourly_limit: u32 = parse_or(&get, "HOURLY_LIMIT", DEFAULT_HOURLY_LIMIT)?;
        if hourly_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HOURLY_LIMIT".into(),
                message: "must be greater than zero".into(),
            });
        }

        let delay_min_s: u64 = parse_or(&get, "DELAY_MIN_S", DEFAULT_DELAY_MIN_SECS)?;
        let delay_max_s: u64 = parse_or(&get, "DELAY_MAX_S", DEFAULT_DELAY_MAX_SECS)?;
        if delay_min_s > delay_max_s {
            return Err(ConfigError::InvalidValue {
                key: "DELAY_MIN_S".into(),
                message: format!("{delay_min_s} is greater than DELAY_MAX_S ({delay_max_s})"),
            });
        }

        let ready_timeout_s: u64 = parse_or(&get, "WA_READY_TIMEOUT_S", 300)?;

        let numbering = NumberingPlan {
            country_code: get("COUNTRY_CODE").unwrap_or_else(|| "51".to_string()),
            mobile_prefix: get("MOBILE_PREFIX").unwrap_or_else(|| "9".to_string()),
            local_digits: parse_or(&get, "LOCAL_DIGITS", 9)?,
        };
        numbering.validate()?;

        let data_dir = PathBuf::from(get("OUTREACH_DATA_DIR").unwrap_or_else(|| "data".to_string()));

        Ok(Self {
            spreadsheet_id,
            sheet_range,
            hourly_limit,
            delay_min: Duration::from_secs(delay_min_s),
            delay_max: Duration::from_secs(delay_max_s),
            image_path: PathBuf::from(get("IMAGE_PATH").unwrap_or_else(|| "img/expo.jpeg".to_string())),
            templates_path: PathBuf::from(
                get("TEMPLATES_PATH").unwrap_or_else(|| "templates.json".to_string()),
            ),
            data_dir,
            bridge_url: get("WA_BRIDGE_URL").unwrap_or_else(|| "http://127.0.0.1:3000".to_string()),
            ready_timeout: Duration::from_secs(ready_timeout_s),
            google: GoogleConfig::from_lookup(&lookup),
            numbering,
        })
    }

    /// Path of the persisted send log.
    pub fn send_log_path(&self) -> PathBuf {
        self.data_dir.join("send_log.json")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
