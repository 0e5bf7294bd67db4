use tracing::{info, warn};

/// Session lifecycle events on the `audit` target. Never carries secrets.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn login(&self, email: &str) {
        info!(target: "audit", event = "login", email);
    }

    pub fn logout(&self, reason: &str) {
        info!(target: "audit", event = "logout", reason);
    }

    pub fn refresh_started(&self, episode: u64, waiting: usize) {
        info!(target: "audit", event = "refresh_started", episode, waiting);
    }

    pub fn refresh_succeeded(&self, episode: u64, replays: usize) {
        info!(target: "audit", event = "refresh_succeeded", episode, replays);
    }

    pub fn refresh_failed(&self, episode: u64, rejected: usize, reason: &str) {
        warn!(target: "audit", event = "refresh_failed", episode, rejected, reason);
    }

    pub fn session_ended(&self, episode: u64) {
        warn!(target: "audit", event = "session_ended", episode);
    }

    pub fn replay_failed(&self, episode: u64, method: &str, path: &str, error_msg: &str) {
        warn!(target: "audit", event = "replay_failed", episode, method, path, error = error_msg);
    }
}
