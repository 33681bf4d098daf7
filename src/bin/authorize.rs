//! One-time Google authorization for the spreadsheet contact source.
//!
//! OAuth clients: opens the consent flow, captures the code from the local
//! redirect (or asks for it on stdin) and saves the token file.
//! Service-account keys need no token; the command only prints the account
//! to share the sheet with.

use std::io::{BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use outreach::config::{GoogleConfig, load_dotenv};
use outreach::contacts::google_auth::{
    GoogleSecrets, OAUTH_TOKEN_URL, accept_redirect_code, authorization_url, bind_redirect,
    exchange_code, load_secrets, save_token,
};

/// How long to wait for the browser redirect before asking on stdin.
const REDIRECT_WAIT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    load_dotenv(Path::new(".env"))?;
    let google = GoogleConfig::from_env();

    let oauth = match load_secrets(&google.client_secrets).await? {
        GoogleSecrets::ServiceAccount(key) => {
            eprintln!("Service account key: no authorization needed.");
            eprintln!("Share the spreadsheet with {}", key.client_email);
            return Ok(());
        }
        GoogleSecrets::OAuth(oauth) => oauth,
    };

    let redirect_uri = oauth.redirect_uri();
    let url = authorization_url(&oauth, &redirect_uri)?;
    eprintln!("Open this URL and grant access:\n\n  {url}\n");

    let code = match capture_code(&redirect_uri).await {
        Ok(code) => code,
        Err(e) => {
            warn!("Redirect not captured: {e:#}");
            prompt_code()?
        }
    };

    let http = reqwest::Client::new();
    let token = exchange_code(&http, &oauth, code.trim(), &redirect_uri, OAUTH_TOKEN_URL).await?;
    save_token(&google.token_path, &token).await?;
    eprintln!("Token saved to {}", google.token_path.display());
    Ok(())
}

async fn capture_code(redirect_uri: &str) -> anyhow::Result<String> {
    let (listener, path) = bind_redirect(redirect_uri).await?;
    eprintln!("Waiting for the browser redirect on {redirect_uri} ...");
    let code = tokio::time::timeout(REDIRECT_WAIT, accept_redirect_code(&listener, &path))
        .await
        .context("timed out waiting for the redirect")??;
    Ok(code)
}

fn prompt_code() -> anyhow::Result<String> {
    eprint!("Paste the authorization code: ");
    std::io::stderr().flush()?;
    let mut code = String::new();
    std::io::stdin().lock().read_line(&mut code)?;
    anyhow::ensure!(!code.trim().is_empty(), "no authorization code entered");
    Ok(code)
}
