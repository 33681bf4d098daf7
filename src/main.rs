use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use outreach::channels::{BridgeTransport, Transport};
use outreach::config::{RunConfig, load_dotenv};
use outreach::contacts::google_auth::{OAUTH_TOKEN_URL, resolve_auth};
use outreach::contacts::{ContactSource, SheetsSource, contacts_from_rows};
use outreach::delivery::{DeliverySettings, Orchestrator};
use outreach::pacing::{HourlyRateLimiter, InterSendDelay, SystemClock};
use outreach::report::CsvReportWriter;
use outreach::store::SendLog;
use outreach::templates::Templates;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = load_dotenv(Path::new(".env")) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Stderr plus a daily file under the data dir. Keep the guard alive for the run.
    let file_appender = tracing_appender::rolling::daily(config.logs_dir(), "outreach.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    eprintln!("📨 Outreach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sheet: {} ({})", config.spreadsheet_id, config.sheet_range);
    eprintln!("   Bridge: {}", config.bridge_url);
    eprintln!("   Data: {}", config.data_dir.display());

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Run failed: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RunConfig) -> anyhow::Result<()> {
    let templates = Templates::load(&config.templates_path)
        .await
        .with_context(|| format!("loading templates from {}", config.templates_path.display()))?;

    // ── Contacts ────────────────────────────────────────────────────────
    let http = reqwest::Client::new();
    let auth = resolve_auth(&http, &config.google, OAUTH_TOKEN_URL).await?;
    let source = SheetsSource::new(http, &config.spreadsheet_id, &config.sheet_range, auth);
    let rows = source.fetch_rows().await?;
    let normalizer = config.numbering.normalizer()?;
    let contacts = contacts_from_rows(&rows, &normalizer)?;
    info!(rows = rows.len().saturating_sub(1), contacts = contacts.len(), "Loaded contacts");

    // ── Session ─────────────────────────────────────────────────────────
    let transport = Arc::new(BridgeTransport::new(&config.bridge_url, config.ready_timeout));
    transport.ready().await?;
    info!(transport = transport.name(), "Chat session ready");

    // ── Delivery ────────────────────────────────────────────────────────
    let clock = Arc::new(SystemClock);
    let send_log = SendLog::load(config.send_log_path()).await;
    let settings = DeliverySettings::new(InterSendDelay::new(config.delay_min, config.delay_max))
        .with_image_if_exists(&config.image_path);
    if settings.image.is_none() {
        info!(path = %config.image_path.display(), "No image found; sending text only");
    }

    let mut orchestrator = Orchestrator::new(
        transport.clone(),
        clock.clone(),
        Box::new(StdRng::from_entropy()),
        HourlyRateLimiter::new(config.hourly_limit, clock),
        send_log,
        templates,
        settings,
    );
    let writer = CsvReportWriter::new(config.reports_dir());
    let result = orchestrator.run(&contacts, &writer).await;

    if let Err(e) = transport.shutdown().await {
        error!("Session shutdown failed: {e}");
    }

    let summary = result?;
    eprintln!("   Report: {}", summary.report_path.display());
    Ok(())
}
