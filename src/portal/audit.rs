//! Append-only JSONL audit trail of admin mutations and auth events.
//!
//! Each line optionally carries `prev_hash`/`hash` so that edits to earlier
//! lines break the chain.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuditConfig;

/// Upper bound on lines scanned by [`read_recent`].
const MAX_SCAN_LINES: usize = 50_000;

#[derive(Debug, Default, Clone, Serialize)]
struct AuthCounters {
    failed_logins: u64,
    denied_requests: u64,
}

#[derive(Debug, Serialize)]
struct AuditLine<'a> {
    ts: String,
    event_type: &'a str,
    details: serde_json::Value,
    counters: AuthCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

/// A parsed audit line, as returned to the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub details: serde_json::Value,
}

struct AuditLogger {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Mutex<Option<String>>,
    counters: Mutex<AuthCounters>,
}

impl AuditLogger {
    fn new(path: PathBuf, hash_chain: bool) -> Self {
        Self {
            path,
            hash_chain,
            last_hash: Mutex::new(None),
            counters: Mutex::new(AuthCounters::default()),
        }
    }

    fn bump<F>(&self, update: F)
    where
        F: FnOnce(&mut AuthCounters),
    {
        if let Ok(mut counters) = self.counters.lock() {
            update(&mut counters);
        }
    }

    fn write(&self, event_type: &str, details: serde_json::Value) {
        let counters = match self.counters.lock() {
            Ok(c) => c.clone(),
            Err(e) => {
                tracing::warn!("Audit counters lock poisoned: {}", e);
                return;
            }
        };
        // Held through the append so chained lines land in hash order.
        let mut last_hash = match self.last_hash.lock() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Audit chain lock poisoned: {}", e);
                return;
            }
        };

        let mut line = AuditLine {
            ts: Utc::now().to_rfc3339(),
            event_type,
            details,
            counters,
            prev_hash: last_hash.clone(),
            hash: None,
        };

        let mut next_hash = None;
        if self.hash_chain {
            let to_hash = match serde_json::to_string(&line) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to serialize audit event for hashing: {}", e);
                    return;
                }
            };
            let hash = format!("{:x}", Sha256::digest(to_hash.as_bytes()));
            line.hash = Some(hash.clone());
            next_hash = Some(hash);
        }

        let serialized = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        if let Some(parent) = self.path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("Failed to create audit log dir {:?}: {}", parent, e);
            return;
        }

        // New files are created 0600; existing files with broader modes are refused.
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).append(true);
        #[cfg(unix)]
        open_opts.mode(0o600);
        let mut file = match open_opts.open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Failed to open audit log {:?}: {}", self.path, e);
                return;
            }
        };
        #[cfg(unix)]
        {
            let mode = match file.metadata() {
                Ok(meta) => meta.permissions().mode() & 0o777,
                Err(e) => {
                    tracing::warn!("Failed to stat audit log {:?}: {}", self.path, e);
                    return;
                }
            };
            if mode != 0o600 {
                tracing::warn!(
                    "Refusing to write audit event; insecure mode {:o} on {:?} (expected 600)",
                    mode,
                    self.path
                );
                return;
            }
        }
        match writeln!(file, "{serialized}") {
            Ok(()) => {
                if next_hash.is_some() {
                    *last_hash = next_hash;
                }
            }
            Err(e) => tracing::warn!("Failed to append audit event: {}", e),
        }
    }
}

static LOGGER: OnceLock<AuditLogger> = OnceLock::new();
#[cfg(test)]
static TEST_EVENTS: OnceLock<Mutex<Vec<(String, serde_json::Value)>>> = OnceLock::new();

/// Absolute path of the audit log for `config`, rooted at `home`.
pub fn log_path(config: &AuditConfig, home: &Path) -> PathBuf {
    home.join(&config.path)
}

/// Start writing audit events. A no-op when auditing is disabled or already
/// initialized.
pub fn init(config: &AuditConfig, home: &Path) {
    if !config.enabled {
        return;
    }
    let path = log_path(config, home);
    tracing::info!(path = %path.display(), hash_chain = config.hash_chain, "Audit log enabled");
    let _ = LOGGER.set(AuditLogger::new(path, config.hash_chain));
}

/// Record one audit event.
pub fn record(event_type: &str, details: serde_json::Value) {
    #[cfg(test)]
    push_test_event(event_type, &details);
    if let Some(logger) = LOGGER.get() {
        logger.write(event_type, details);
    }
}

pub fn inc_failed_login() {
    if let Some(logger) = LOGGER.get() {
        logger.bump(|c| c.failed_logins += 1);
    }
}

pub fn inc_denied_request() {
    if let Some(logger) = LOGGER.get() {
        logger.bump(|c| c.denied_requests += 1);
    }
}

pub fn enabled() -> bool {
    LOGGER.get().is_some()
}

/// Newest-first audit entries, optionally filtered by event type.
///
/// Unparseable lines are skipped. A missing file yields an empty list.
pub fn read_recent(
    path: &Path,
    event_type: Option<&str>,
    limit: usize,
) -> std::io::Result<Vec<AuditEntry>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines().take(MAX_SCAN_LINES) {
        let line = line?;
        let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) else {
            continue;
        };
        if event_type.is_some_and(|wanted| wanted != entry.event_type) {
            continue;
        }
        entries.push(entry);
    }
    entries.reverse();
    entries.truncate(limit);
    Ok(entries)
}

#[cfg(test)]
fn push_test_event(event_type: &str, details: &serde_json::Value) {
    if let Ok(mut events) = TEST_EVENTS.get_or_init(|| Mutex::new(Vec::new())).lock() {
        events.push((event_type.to_string(), details.clone()));
    }
}

#[cfg(test)]
pub(crate) fn recorded_event_types() -> Vec<String> {
    TEST_EVENTS
        .get()
        .and_then(|events| events.lock().ok().map(|e| e.iter().map(|(t, _)| t.clone()).collect()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;

    use super::*;

    #[test]
    fn hash_chain_links_consecutive_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/audit.jsonl");
        let logger = AuditLogger::new(path.clone(), true);

        logger.write("client.created", serde_json::json!({"client_id": "a"}));
        logger.write("client.deleted", serde_json::json!({"client_id": "a"}));

        let raw = fs::read_to_string(&path).expect("read audit log");
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].get("prev_hash").is_none());
        let first_hash = lines[0]["hash"].as_str().expect("hash");
        assert_eq!(lines[1]["prev_hash"].as_str(), Some(first_hash));
    }

    #[test]
    fn counters_are_snapshotted_into_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(path.clone(), false);
        logger.bump(|c| c.failed_logins += 2);
        logger.write("auth.login_failed", serde_json::json!({}));

        let raw = fs::read_to_string(&path).expect("read");
        let line: Value = serde_json::from_str(raw.trim()).expect("json");
        assert_eq!(line["counters"]["failed_logins"], 2);
        assert!(line.get("hash").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn refuses_world_readable_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "existing\n").expect("seed");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");

        AuditLogger::new(path.clone(), false).write("x", serde_json::json!({}));
        assert_eq!(fs::read_to_string(&path).expect("read"), "existing\n");
    }

    #[test]
    fn read_recent_filters_and_orders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(path.clone(), true);
        logger.write("auth.login", serde_json::json!({"n": 1}));
        logger.write("task.updated", serde_json::json!({"n": 2}));
        logger.write("auth.login", serde_json::json!({"n": 3}));
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "not json"))
            .expect("append garbage");

        let logins = read_recent(&path, Some("auth.login"), 10).expect("read");
        assert_eq!(logins.len(), 2);
        assert_eq!(logins[0].details["n"], 3);

        let latest = read_recent(&path, None, 1).expect("read");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].details["n"], 3);

        assert!(
            read_recent(&dir.path().join("missing.jsonl"), None, 10)
                .expect("missing")
                .is_empty()
        );
    }

    #[test]
    fn record_is_observable_in_tests() {
        record("settings.updated", serde_json::json!({"key": "agency.name"}));
        assert!(recorded_event_types().iter().any(|t| t == "settings.updated"));
    }
}
