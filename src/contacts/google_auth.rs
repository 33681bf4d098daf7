//! Google credentials for the Sheets API.
//!
//! Three ways in, tried in order: an API key, a service-account key (signed
//! JWT exchanged for an access token), or an installed/web OAuth client with
//! a token saved by the `authorize` command (refreshed when it carries a
//! refresh token).

use std::path::Path;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::sheets::SheetsAuth;
use crate::config::GoogleConfig;
use crate::error::ContactError;

pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
/// Used when the client lists no redirect URI.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:53682";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Installed or web OAuth client from the secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub auth_uri: Option<String>,
}

impl OAuthClient {
    /// First `http://localhost` redirect, else the first listed, else the default.
    pub fn redirect_uri(&self) -> String {
        self.redirect_uris
            .iter()
            .find(|u| u.starts_with("http://localhost"))
            .or_else(|| self.redirect_uris.first())
            .cloned()
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string())
    }
}

/// Service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
}

/// What the secrets file turned out to hold.
#[derive(Debug, Clone)]
pub enum GoogleSecrets {
    ServiceAccount(ServiceAccountKey),
    OAuth(OAuthClient),
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    installed: Option<OAuthClient>,
    web: Option<OAuthClient>,
    client_email: Option<String>,
    private_key: Option<SecretString>,
}

/// Token file written by the consent flow. Unknown fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Read and classify the client secrets file.
pub async fn load_secrets(path: &Path) -> Result<GoogleSecrets, ContactError> {
    if !path.exists() {
        return Err(ContactError::SecretsNotFound(path.to_path_buf()));
    }
    let file: SecretsFile = serde_json::from_str(&tokio::fs::read_to_string(path).await?)?;

    if file.kind.as_deref() == Some("service_account") {
        let (Some(client_email), Some(private_key)) = (file.client_email, file.private_key) else {
            return Err(ContactError::InvalidSecrets(
                "service account key is missing client_email or private_key".into(),
            ));
        };
        return Ok(GoogleSecrets::ServiceAccount(ServiceAccountKey {
            client_email,
            private_key,
        }));
    }

    file.installed
        .or(file.web)
        .map(GoogleSecrets::OAuth)
        .ok_or_else(|| ContactError::InvalidSecrets("expected an installed or web section".into()))
}

/// Resolve credentials for the Sheets API.
pub async fn resolve_auth(
    client: &reqwest::Client,
    google: &GoogleConfig,
    token_url: &str,
) -> Result<SheetsAuth, ContactError> {
    if let Some(key) = &google.api_key {
        debug!("Using Google API key for Sheets access");
        return Ok(SheetsAuth::ApiKey(key.clone()));
    }

    match load_secrets(&google.client_secrets).await? {
        GoogleSecrets::ServiceAccount(key) => {
            let token = service_account_token(client, &key, token_url, Utc::now()).await?;
            info!(account = %key.client_email, "Authorized with service account");
            Ok(SheetsAuth::Bearer(token))
        }
        GoogleSecrets::OAuth(oauth) => stored_token_auth(client, &oauth, &google.token_path, token_url).await,
    }
}

async fn stored_token_auth(
    client: &reqwest::Client,
    oauth: &OAuthClient,
    token_path: &Path,
    token_url: &str,
) -> Result<SheetsAuth, ContactError> {
    if !token_path.exists() {
        return Err(ContactError::TokenNotFound(token_path.to_path_buf()));
    }
    let token: StoredToken = serde_json::from_str(&tokio::fs::read_to_string(token_path).await?)?;

    if let Some(refresh) = &token.refresh_token {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.expose_secret()),
            ("refresh_token", refresh.as_str()),
        ];
        let fresh = request_token(client, token_url, &form)
            .await
            .map_err(ContactError::TokenRefresh)?;
        info!("Refreshed Google OAuth access token");
        return Ok(SheetsAuth::Bearer(SecretString::from(fresh.access_token)));
    }

    token
        .access_token
        .map(|t| SheetsAuth::Bearer(SecretString::from(t)))
        .ok_or_else(|| ContactError::TokenRefresh("token file has neither access nor refresh token".into()))
}

async fn request_token(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, String> {
    let resp = client
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("{status}: {body}"));
    }
    resp.json().await.map_err(|e| e.to_string())
}

/// Signed RS256 assertion for the `jwt-bearer` grant.
pub fn service_account_assertion(
    key: &ServiceAccountKey,
    token_url: &str,
    now: DateTime<Utc>,
) -> Result<String, ContactError> {
    let claims = AssertionClaims {
        iss: key.client_email.clone(),
        scope: SHEETS_READONLY_SCOPE.to_string(),
        aud: token_url.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())
        .map_err(|e| ContactError::ServiceAccount(format!("invalid private key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| ContactError::ServiceAccount(format!("signing failed: {e}")))
}

/// Exchange a signed assertion for an access token.
pub async fn service_account_token(
    client: &reqwest::Client,
    key: &ServiceAccountKey,
    token_url: &str,
    now: DateTime<Utc>,
) -> Result<SecretString, ContactError> {
    let assertion = service_account_assertion(key, token_url, now)?;
    let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
    let token = request_token(client, token_url, &form)
        .await
        .map_err(ContactError::ServiceAccount)?;
    Ok(SecretString::from(token.access_token))
}

// ── Consent flow ────────────────────────────────────────────────────────

/// Consent page URL asking for offline read-only access to spreadsheets.
pub fn authorization_url(oauth: &OAuthClient, redirect_uri: &str) -> Result<Url, ContactError> {
    let base = oauth.auth_uri.as_deref().unwrap_or(OAUTH_AUTH_URL);
    let mut url = Url::parse(base).map_err(|e| ContactError::InvalidSecrets(format!("auth_uri: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &oauth.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", SHEETS_READONLY_SCOPE)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

/// Trade the authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    oauth: &OAuthClient,
    code: &str,
    redirect_uri: &str,
    token_url: &str,
) -> Result<StoredToken, ContactError> {
    let resp = client
        .post(token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.expose_secret()),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ContactError::Authorization(format!("{status}: {body}")));
    }
    let token: StoredToken = resp.json().await?;
    if token.access_token.is_none() {
        return Err(ContactError::Authorization("token response has no access_token".into()));
    }
    Ok(token)
}

/// Write the token file, creating its directory.
pub async fn save_token(path: &Path, token: &StoredToken) -> Result<(), ContactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(token)?).await?;
    info!(path = %path.display(), "Saved Google OAuth token");
    Ok(())
}

/// Bind the local port a `http://localhost` redirect URI points at.
/// Returns the listener and the path the redirect will hit.
pub async fn bind_redirect(redirect_uri: &str) -> Result<(TcpListener, String), ContactError> {
    let url = Url::parse(redirect_uri).map_err(|e| ContactError::Authorization(e.to_string()))?;
    if url.scheme() != "http" || !matches!(url.host_str(), Some("localhost" | "127.0.0.1")) {
        return Err(ContactError::Authorization(format!(
            "{redirect_uri} is not a local http redirect"
        )));
    }
    let port = url.port_or_known_default().unwrap_or(80);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    Ok((listener, url.path().to_string()))
}

/// Serve redirects on `listener` until one hits `path`, and return its `code`.
pub async fn accept_redirect_code(listener: &TcpListener, path: &str) -> Result<String, ContactError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let target = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/");

        let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
            stream.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await?;
            continue;
        };
        if url.path() != path {
            stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await?;
            continue;
        }

        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let body = "<h1>Authorization complete</h1><p>You can close this tab.</p>";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await?;

        return match param("code") {
            Some(code) => Ok(code),
            None => Err(ContactError::Authorization(
                param("error").unwrap_or_else(|| "redirect carried no code".into()),
            )),
        };
    }
}
