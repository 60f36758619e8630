use crate::pane::PaneId;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

static ID: AtomicUsize = AtomicUsize::new(0);

/// Identifies a single client session. Two `ClientId`s compare equal iff
/// every field matches; `sequence` disambiguates multiple connections from
/// the same host/user/process (eg: several windows of the same GUI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId {
    pub username: String,
    pub hostname: String,
    pub pid: u32,
    /// Seconds since the Unix epoch at which the owning process started.
    pub epoch: u64,
    pub sequence: usize,
    pub ssh_auth_sock: Option<String>,
}

impl ClientId {
    pub fn new() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            username,
            hostname,
            pid: std::process::id(),
            epoch,
            sequence: ID.fetch_add(1, Ordering::Relaxed),
            ssh_auth_sock: std::env::var("SSH_AUTH_SOCK").ok(),
        }
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}@{} pid={} seq={}",
            self.username, self.hostname, self.pid, self.sequence
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: Arc<ClientId>,
    /// The time this client last connected.
    #[serde(with = "ts_seconds")]
    pub connected_at: DateTime<Utc>,
    /// Which workspace is active for this client.
    pub active_workspace: Option<String>,
    /// The last time we received input from this client.
    #[serde(with = "ts_seconds")]
    pub last_input: DateTime<Utc>,
    pub focused_pane_id: Option<PaneId>,
}

impl ClientInfo {
    pub fn new(client_id: Arc<ClientId>) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            connected_at: now,
            active_workspace: None,
            last_input: now,
            focused_pane_id: None,
        }
    }

    pub fn update_last_input(&mut self) {
        self.last_input = Utc::now();
    }

    pub fn update_focused_pane(&mut self, pane_id: PaneId) {
        self.focused_pane_id.replace(pane_id);
    }
}
