//! Groups captured requests into `(agent, host)` time-windowed sessions.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const INACTIVITY_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub agent: String,
    pub host: String,
    pub protocol: Option<String>,
    pub provider: Option<String>,
    pub started: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub request_count: u64,
}

fn session_id(agent: &str, host: &str, now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{agent}:{host}:{}", now.to_rfc3339()));
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// In-memory `(agent, host)` → session map. Not thread-safe; callers must
/// serialize access (typically via a `Mutex`).
#[derive(Debug, Default)]
pub struct SessionTracker {
    /// Index keyed by `"{agent}:{host}"`, each bucket ordered oldest-first.
    by_key: HashMap<String, Vec<SessionInfo>>,
    by_id: HashMap<String, (String, usize)>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(agent: &str, host: &str) -> String {
        format!("{agent}:{host}")
    }

    /// Look up or create the session for `(agent, host)` at `now`, updating
    /// `last_active`/`request_count` on the existing session if it is
    /// still within the inactivity window.
    pub fn track(
        &mut self,
        agent: &str,
        host: &str,
        protocol: Option<String>,
        provider: Option<String>,
        now: DateTime<Utc>,
    ) -> SessionInfo {
        let key = Self::key(agent, host);
        let bucket = self.by_key.entry(key.clone()).or_default();

        if let Some(last) = bucket.last_mut() {
            if now - last.last_active < Duration::minutes(INACTIVITY_WINDOW_MINUTES) {
                last.last_active = now;
                last.request_count += 1;
                if protocol.is_some() {
                    last.protocol = protocol;
                }
                if provider.is_some() {
                    last.provider = provider;
                }
                return last.clone();
            }
        }

        let info = SessionInfo {
            id: session_id(agent, host, now),
            agent: agent.to_string(),
            host: host.to_string(),
            protocol,
            provider,
            started: now,
            last_active: now,
            request_count: 1,
        };
        let index = bucket.len();
        bucket.push(info.clone());
        self.by_id.insert(info.id.clone(), (key, index));
        info
    }

    /// Drop every session whose `last_active` is at least 30 minutes stale
    /// relative to `now`. Returns the number dropped.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let mut dropped = 0;
        for bucket in self.by_key.values_mut() {
            let before = bucket.len();
            bucket.retain(|s| now - s.last_active < Duration::minutes(INACTIVITY_WINDOW_MINUTES));
            dropped += before - bucket.len();
        }
        self.by_id.clear();
        for (key, bucket) in &self.by_key {
            for (idx, session) in bucket.iter().enumerate() {
                self.by_id.insert(session.id.clone(), (key.clone(), idx));
            }
        }
        dropped
    }

    pub fn by_id(&self, id: &str) -> Option<&SessionInfo> {
        let (key, idx) = self.by_id.get(id)?;
        self.by_key.get(key)?.get(*idx)
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<&SessionInfo> {
        self.by_key
            .values()
            .flatten()
            .filter(|s| now - s.last_active < Duration::minutes(INACTIVITY_WINDOW_MINUTES))
            .collect()
    }

    pub fn by_agent(&self, agent: &str) -> Vec<&SessionInfo> {
        self.by_key
            .values()
            .flatten()
            .filter(|s| s.agent == agent)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_within_window_share_a_session() {
        let mut tracker = SessionTracker::new();
        let t0 = Utc::now();
        let s1 = tracker.track("claude_code", "api.anthropic.com", None, None, t0);
        let s2 = tracker.track(
            "claude_code",
            "api.anthropic.com",
            None,
            None,
            t0 + Duration::seconds(60),
        );
        assert_eq!(s1.id, s2.id);
        assert_eq!(s2.request_count, 2);
    }

    #[test]
    fn request_31_minutes_later_starts_new_session() {
        let mut tracker = SessionTracker::new();
        let t0 = Utc::now();
        let s1 = tracker.track("claude_code", "api.anthropic.com", None, None, t0);
        let s2 = tracker.track(
            "claude_code",
            "api.anthropic.com",
            None,
            None,
            t0 + Duration::minutes(31),
        );
        assert_ne!(s1.id, s2.id);
    }

    #[test]
    fn expire_drops_stale_sessions() {
        let mut tracker = SessionTracker::new();
        let t0 = Utc::now();
        tracker.track("codex", "api.openai.com", None, None, t0);
        let dropped = tracker.expire(t0 + Duration::minutes(45));
        assert_eq!(dropped, 1);
        assert!(tracker.active_at(t0 + Duration::minutes(45)).is_empty());
    }
}
