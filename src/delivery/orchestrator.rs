//! Delivery orchestrator — walks the contact list one recipient at a time.
//!
//! Per contact: cooldown check → rate gate → send → ack wait → record →
//! randomized pause. Nothing a single contact does can abort the run; only
//! the final save and report write can fail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tracing::{Instrument, debug, info, info_span, warn};

use super::attempt_id;
use super::outcome::{Outcome, SendAttemptResult};
use crate::channels::{AckLevel, AckWait, Transport, wait_for_ack};
use crate::contacts::Contact;
use crate::error::Result;
use crate::pacing::{Clock, HourlyRateLimiter, InterSendDelay};
use crate::report::{ReportRow, ReportWriter, build_row, format_iso, format_local};
use crate::store::{DEFAULT_COOLDOWN, SendLog};
use crate::templates::Templates;

/// Ack wait for a text message.
pub const TEXT_ACK_TIMEOUT: Duration = Duration::from_secs(15);
/// Ack wait for an image message (upload takes longer).
pub const IMAGE_ACK_TIMEOUT: Duration = Duration::from_secs(20);

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Image sent with the template as caption; `None` sends plain text.
    pub image: Option<PathBuf>,
    pub text_ack_timeout: Duration,
    pub image_ack_timeout: Duration,
    /// Lowest ack level that counts as sent.
    pub min_ack: AckLevel,
    pub cooldown: Duration,
    pub delay: InterSendDelay,
}

impl DeliverySettings {
    pub fn new(delay: InterSendDelay) -> Self {
        Self {
            image: None,
            text_ack_timeout: TEXT_ACK_TIMEOUT,
            image_ack_timeout: IMAGE_ACK_TIMEOUT,
            min_ack: AckLevel::Server,
            cooldown: DEFAULT_COOLDOWN,
            delay,
        }
    }

    /// Switch the whole run to image mode if `path` exists right now.
    pub fn with_image_if_exists(mut self, path: &Path) -> Self {
        self.image = path.exists().then(|| path.to_path_buf());
        self
    }

    fn ack_timeout(&self) -> Duration {
        if self.image.is_some() {
            self.image_ack_timeout
        } else {
            self.text_ack_timeout
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One row per contact, in input order.
    pub rows: Vec<ReportRow>,
    pub report_path: PathBuf,
}

impl RunSummary {
    pub fn counts(&self) -> HashMap<Outcome, usize> {
        let mut counts = HashMap::new();
        for row in &self.rows {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.rows.iter().filter(|r| r.status == outcome).count()
    }
}

/// Owns the send log and rate window for the duration of a run.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    limiter: HourlyRateLimiter,
    send_log: SendLog,
    templates: Templates,
    settings: DeliverySettings,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RngCore + Send>,
        limiter: HourlyRateLimiter,
        send_log: SendLog,
        templates: Templates,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            transport,
            clock,
            rng,
            limiter,
            send_log,
            templates,
            settings,
        }
    }

    pub fn send_log(&self) -> &SendLog {
        &self.send_log
    }

    pub fn limiter(&self) -> &HourlyRateLimiter {
        &self.limiter
    }

    /// Process every contact, then save the send log and write the report.
    pub async fn run(&mut self, contacts: &[Contact], writer: &dyn ReportWriter) -> Result<RunSummary> {
        let mode = if self.settings.image.is_some() { "image" } else { "text" };
        info!(contacts = contacts.len(), mode, "Starting delivery run");

        let mut rows = Vec::with_capacity(contacts.len());
        for (i, contact) in contacts.iter().enumerate() {
            let span = info_span!("contact", n = i + 1, phone = %contact.phone);
            let (row, attempted) = self.process_contact(contact).instrument(span).await;
            rows.push(row);

            if attempted && i + 1 < contacts.len() {
                self.pace().await;
            }
        }

        // Save before the report so dedupe state survives a report failure.
        self.send_log.save().await?;
        let report_path = writer.write(&rows)?;

        let summary = RunSummary { rows, report_path };
        info!(
            sent = summary.count(Outcome::SentText) + summary.count(Outcome::SentImage),
            skipped = summary.count(Outcome::SkippedCooldown),
            no_whatsapp = summary.count(Outcome::NoWhatsapp),
            ack_timeout = summary.count(Outcome::AckTimeout),
            send_error = summary.count(Outcome::SendError),
            report = %summary.report_path.display(),
            "Delivery run finished"
        );
        Ok(summary)
    }

    /// Handle one contact. Returns its row and whether an attempt was made
    /// (false only for a cooldown skip).
    pub async fn process_contact(&mut self, contact: &Contact) -> (ReportRow, bool) {
        let started = self.clock.now();
        let id = attempt_id(&contact.phone, started);
        let iso = format_iso(started);
        let local = format_local(started);

        if self
            .send_log
            .is_within_cooldown(&contact.phone, started, self.settings.cooldown)
        {
            info!("Sent within cooldown window; skipping");
            let outcome = Outcome::SkippedCooldown;
            let row = build_row(contact, outcome, &id, &iso, &local, Some(outcome.default_detail()));
            return (row, false);
        }

        self.limiter.before_send().await;

        let result = self.attempt(contact).await;
        self.limiter.mark_attempt();

        let image = self.settings.image.is_some();
        let outcome = result.outcome(image);
        if outcome.is_dispatched() {
            self.send_log
                .record(&contact.phone, &id, self.clock.now(), outcome);
        }

        match &result {
            SendAttemptResult::Success { ack } => info!(%ack, %outcome, "Message sent"),
            SendAttemptResult::NoWhatsApp => info!("Number has no WhatsApp account"),
            SendAttemptResult::AckTimeout { ack } => warn!(%ack, "No server ack before timeout"),
            SendAttemptResult::SendError { message } => warn!(error = %message, "Send failed"),
        }

        let detail = result.detail(image);
        let row = build_row(contact, outcome, &id, &iso, &local, Some(&detail));
        (row, true)
    }

    async fn attempt(&mut self, contact: &Contact) -> SendAttemptResult {
        let recipient = match self.transport.resolve_recipient(&contact.phone).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => return SendAttemptResult::NoWhatsApp,
            Err(e) => {
                debug!("Recipient lookup failed, treating as unreachable: {e}");
                return SendAttemptResult::NoWhatsApp;
            }
        };

        let text = self.templates.pick(&mut self.rng).to_string();
        let timeout = self.settings.ack_timeout();

        let subscription = self.transport.subscribe_acks();
        let sent = match &self.settings.image {
            Some(path) => self.transport.send_image(&recipient, path, &text).await,
            None => self.transport.send_text(&recipient, &text).await,
        };
        let handle = match sent {
            Ok(handle) => handle,
            Err(e) => {
                return SendAttemptResult::SendError {
                    message: e.to_string(),
                };
            }
        };

        match wait_for_ack(subscription, &handle, self.settings.min_ack, timeout).await {
            AckWait::Confirmed(ack) => SendAttemptResult::Success { ack },
            AckWait::TimedOut(ack) => SendAttemptResult::AckTimeout { ack },
        }
    }

    async fn pace(&mut self) {
        let wait = self.settings.delay.sample(&mut self.rng);
        info!(
            minutes = (wait.as_secs() as f64 / 60.0).round() as u64,
            "Waiting before the next attempt"
        );
        self.clock.sleep(wait).await;
    }
}
