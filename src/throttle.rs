//! Sliding-window ledger of login attempts per requester key.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// Attempts allowed inside one window before the key is blocked.
    pub max_attempts: u32,
    /// Fixed window length in seconds.
    pub window_secs: u64,
    /// Recorded attempts after which a login must carry a challenge response.
    pub step_up_threshold: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 600, // 10 minutes
            step_up_threshold: 3,
        }
    }
}

#[derive(Debug)]
struct Entry {
    attempts: u32,
    window_start: Instant,
}

/// Tracks authentication attempts per `ip|email` key. Entries reset when the
/// window lapses or on successful login. Callers must only record an attempt
/// when they proceed to authenticate, never on plain page views.
#[derive(Debug, Clone)]
pub struct ThrottleLedger {
    config: ThrottleConfig,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ThrottleLedger {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Builds the requester key. Both parts so one address hammering many
    /// accounts and many addresses hammering one account stay distinct.
    pub fn key(ip: &str, email: &str) -> String {
        format!("{}|{}", ip, email)
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Records one authentication attempt and returns the in-window count
    /// after the increment.
    pub async fn record_attempt(&self, key: &str) -> u32 {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let window = self.window();

        // Lapsed keys are dead weight; drop them while we hold the lock.
        entries.retain(|_, entry| now.duration_since(entry.window_start) < window);

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            attempts: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= window {
            entry.attempts = 0;
            entry.window_start = now;
        }
        entry.attempts += 1;
        if entry.attempts == self.config.max_attempts {
            info!("throttle cap reached for a requester key");
        }
        entry.attempts
    }

    /// Whether the key has exhausted its attempts for the live window.
    /// Read-only: a blocked caller does not consume an attempt.
    pub async fn is_blocked(&self, key: &str) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) => {
                Instant::now().duration_since(entry.window_start) < self.window()
                    && entry.attempts >= self.config.max_attempts
            }
            None => false,
        }
    }

    /// Number of attempts already recorded in the live window.
    pub async fn attempt_count(&self, key: &str) -> u32 {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if Instant::now().duration_since(entry.window_start) < self.window() => {
                entry.attempts
            }
            _ => 0,
        }
    }

    /// Time until the live window lapses and the key unblocks.
    pub async fn retry_after(&self, key: &str) -> Duration {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) => self
                .window()
                .saturating_sub(Instant::now().duration_since(entry.window_start)),
            None => Duration::ZERO,
        }
    }

    /// Forgets the key entirely. Called after a successful login.
    pub async fn clear(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    #[cfg(test)]
    pub(crate) async fn tracked_keys(&self) -> usize {
        self.entries.lock().await.len()
    }
}
