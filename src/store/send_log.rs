//! Send log — per-recipient last-sent timestamp and attempt history.
//!
//! Loaded once at start, mutated in memory, written back once at the end of
//! a run. Loading never fails: a missing file is an empty log, and an
//! unreadable one is moved aside and replaced by an empty log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::contacts::PhoneIdentity;
use crate::delivery::Outcome;
use crate::error::StoreError;

/// Minimum time between two confirmed sends to the same recipient.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(24 * 3600);

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub at: DateTime<Utc>,
    #[serde(alias = "estado")]
    pub status: String,
}

/// Everything known about one recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogEntry {
    #[serde(rename = "lastSentISO", default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
}

/// File-backed send log.
#[derive(Debug)]
pub struct SendLog {
    path: PathBuf,
    entries: BTreeMap<PhoneIdentity, SendLogEntry>,
}

impl SendLog {
    /// Empty log that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the log at `path`.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No send log yet, starting empty");
            return Self::empty(path);
        }

        let parsed = match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<BTreeMap<PhoneIdentity, SendLogEntry>>(&raw)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(entries) => {
                info!(path = %path.display(), recipients = entries.len(), "Loaded send log");
                Self { path, entries }
            }
            Err(reason) => {
                let backup = quarantine(&path).await;
                warn!(
                    path = %path.display(),
                    backup = ?backup,
                    %reason,
                    "Send log unreadable; starting empty. Recently contacted recipients may be messaged again"
                );
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, identity: &PhoneIdentity) -> Option<&SendLogEntry> {
        self.entries.get(identity)
    }

    pub fn entries(&self) -> &BTreeMap<PhoneIdentity, SendLogEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if a confirmed send to `identity` happened less than `window` before `now`.
    pub fn is_within_cooldown(
        &self,
        identity: &PhoneIdentity,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        let Some(last) = self.entries.get(identity).and_then(|e| e.last_sent) else {
            return false;
        };
        match chrono::Duration::from_std(window) {
            Ok(window) => now - last < window,
            Err(_) => true,
        }
    }

    /// Append an attempt. `last_sent` moves only for a confirmed send.
    pub fn record(
        &mut self,
        identity: &PhoneIdentity,
        attempt_id: &str,
        at: DateTime<Utc>,
        outcome: Outcome,
    ) {
        let entry = self.entries.entry(identity.clone()).or_default();
        if outcome.is_sent() {
            entry.last_sent = Some(at);
        }
        entry.history.push(HistoryItem {
            id: attempt_id.to_string(),
            at,
            status: outcome.as_str().to_string(),
        });
    }

    /// Overwrite the file with the full log.
    pub async fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), recipients = self.entries.len(), "Saved send log");
        Ok(())
    }
}

/// Move an unreadable log out of the way so the next save does not erase it.
async fn quarantine(path: &Path) -> Option<PathBuf> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
    let backup = PathBuf::from(backup);
    match fs::rename(path, &backup).await {
        Ok(()) => Some(backup),
        Err(e) => {
            warn!(path = %path.display(), "Could not move corrupt send log aside: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::identity;

    fn at(hours_ago: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(hours_ago)
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = SendLog::load(dir.path().join("send_log.json")).await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty_and_is_kept_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.json");
        std::fs::write(&path, "{ not json").unwrap();

        let log = SendLog::load(&path).await;
        assert!(log.is_empty());
        assert!(!path.exists());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read_to_string(backups[0].path()).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn legacy_file_format_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.json");
        std::fs::write(
            &path,
            r#"{"51987654321":{"lastSentISO":"2025-03-01T10:00:00.000Z","history":[{"id":"51987654321_20250301100000","at":"2025-03-01T10:00:00.000Z","estado":"enviado_texto"}]}}"#,
        )
        .unwrap();

        let log = SendLog::load(&path).await;
        let entry = log.get(&identity("51987654321")).unwrap();
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].status, "enviado_texto");
        assert_eq!(
            entry.last_sent.unwrap().to_rfc3339(),
            "2025-03-01T10:00:00+00:00"
        );
    }

    #[test]
    fn cooldown_only_inside_window() {
        let mut log = SendLog::empty("unused.json");
        let recent = identity("51911111111");
        let old = identity("51922222222");
        log.record(&recent, "a", at(1), Outcome::SentText);
        log.record(&old, "b", at(25), Outcome::SentText);

        let now = Utc::now();
        assert!(log.is_within_cooldown(&recent, now, DEFAULT_COOLDOWN));
        assert!(!log.is_within_cooldown(&old, now, DEFAULT_COOLDOWN));
        assert!(!log.is_within_cooldown(&identity("51933333333"), now, DEFAULT_COOLDOWN));
    }

    #[test]
    fn failed_attempts_do_not_start_cooldown() {
        let mut log = SendLog::empty("unused.json");
        let id = identity("51911111111");
        log.record(&id, "a", at(0), Outcome::AckTimeout);
        log.record(&id, "b", at(0), Outcome::SendError);

        let entry = log.get(&id).unwrap();
        assert_eq!(entry.last_sent, None);
        assert_eq!(entry.history.len(), 2);
        assert!(!log.is_within_cooldown(&id, Utc::now(), DEFAULT_COOLDOWN));
    }

    #[tokio::test]
    async fn save_then_reload_matches_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("send_log.json");

        let mut log = SendLog::load(&path).await;
        let a = identity("51911111111");
        let b = identity("51922222222");
        log.record(&a, "a1", at(2), Outcome::SentText);
        log.record(&b, "b1", at(1), Outcome::SentImage);
        log.record(&b, "b2", at(0), Outcome::AckTimeout);
        log.save().await.unwrap();

        let reloaded = SendLog::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        for id in [&a, &b] {
            let before = log.get(id).unwrap();
            let after = reloaded.get(id).unwrap();
            assert_eq!(before.last_sent, after.last_sent);
            assert_eq!(before.history.len(), after.history.len());
        }
        assert_eq!(reloaded.entries(), log.entries());
    }

    #[tokio::test]
    async fn save_overwrites_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.json");
        std::fs::write(&path, r#"{"51900000000":{"history":[]}}"#).unwrap();

        let mut log = SendLog::load(&path).await;
        log.record(&identity("51911111111"), "x", at(0), Outcome::SentText);
        log.save().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("51900000000"));
        assert!(raw.contains("lastSentISO"));
        assert!(!dir.path().join("send_log.json.tmp").exists());
    }
}
