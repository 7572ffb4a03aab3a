// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only history + cached "current" record per `(model, account)`.
//! Persisted to a JSON file with an atomic write-tmp-then-rename discipline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::{epoch_ms, RateLimitInfo, RateLimitRecord};

const MAX_HISTORY_PER_PAIR: usize = 1000;

/// Normalize a model name: lowercase, spaces to `-`, strip anything outside
/// `[a-z0-9-]`.
pub fn normalize_model(model: &str) -> String {
    model
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Normalize an account identifier: lowercase, strip anything outside
/// `[a-z0-9@.-]`.
pub fn normalize_account(account: &str) -> String {
    account
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-'))
        .collect()
}

type Key = (String, String);

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedStore {
    /// `(model, account)` joined by a NUL byte, since JSON object keys must
    /// be strings and tuples aren't directly serializable.
    history: HashMap<String, Vec<RateLimitRecord>>,
}

fn join_key(key: &Key) -> String {
    format!("{}\u{0}{}", key.0, key.1)
}

fn split_key(joined: &str) -> Option<Key> {
    let mut parts = joined.splitn(2, '\u{0}');
    let model = parts.next()?.to_owned();
    let account = parts.next()?.to_owned();
    Some((model, account))
}

struct CurrentEntry {
    record: RateLimitRecord,
    expires_at_epoch_ms: u64,
}

struct StoreState {
    history: HashMap<Key, Vec<RateLimitRecord>>,
    current: HashMap<Key, CurrentEntry>,
}

/// Persisted, append-only availability store, keyed by normalized
/// `(model, account)` pairs.
pub struct AvailabilityStore {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl AvailabilityStore {
    /// Construct a store backed by `path`, loading any existing history.
    /// A missing file is treated as an empty store, not an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let history = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let persisted: PersistedStore = serde_json::from_str(&contents)?;
            persisted.history.into_iter().filter_map(|(k, v)| split_key(&k).map(|key| (key, v))).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: Some(path.to_owned()),
            state: RwLock::new(StoreState { history, current: HashMap::new() }),
        })
    }

    /// An in-memory-only store, for tests and embedding contexts that don't
    /// want disk persistence.
    pub fn in_memory() -> Self {
        Self { path: None, state: RwLock::new(StoreState { history: HashMap::new(), current: HashMap::new() }) }
    }

    /// Append `info` to the `(model, account)` history (bounded at ~1000
    /// entries, coarse-trimmed from the front), and refresh the
    /// current-state cache with a TTL equal to `max(1s, available_at - now)`.
    pub async fn persist(
        &self,
        info: &RateLimitInfo,
        account: &str,
        session_id: &str,
        source: &str,
    ) -> anyhow::Result<()> {
        let key = (normalize_model(&info.model), normalize_account(account));
        let now = epoch_ms();
        let available_at_epoch_ms = info.available_at.map(|dt| dt.timestamp_millis().max(0) as u64).unwrap_or(now);

        let record = RateLimitRecord {
            model: key.0.clone(),
            account: key.1.clone(),
            session_id: session_id.to_owned(),
            is_limited: info.is_limited,
            available_at: info.available_at,
            available_at_epoch_ms,
            detected_at_epoch_ms: now,
            source: source.to_owned(),
        };

        {
            let mut state = self.state.write().await;
            let entries = state.history.entry(key.clone()).or_default();
            entries.push(record.clone());
            if entries.len() > MAX_HISTORY_PER_PAIR {
                let overflow = entries.len() - MAX_HISTORY_PER_PAIR;
                entries.drain(0..overflow);
            }

            let ttl_ms = available_at_epoch_ms.saturating_sub(now).max(1000);
            state.current.insert(key, CurrentEntry { record, expires_at_epoch_ms: now + ttl_ms });
        }

        self.flush().await
    }

    /// The current-state record for `(model, account)`, falling back to the
    /// latest (possibly expired) history entry if the cached key itself has
    /// expired or was never written.
    pub async fn get_current(&self, model: &str, account: &str) -> Option<RateLimitRecord> {
        let key = (normalize_model(model), normalize_account(account));
        let state = self.state.read().await;
        let now = epoch_ms();
        if let Some(entry) = state.current.get(&key) {
            if entry.expires_at_epoch_ms > now {
                return Some(entry.record.clone());
            }
        }
        state.history.get(&key).and_then(|h| h.last()).cloned()
    }

    /// Reverse-chronological slice of up to `limit` history entries.
    pub async fn get_history(&self, model: &str, account: &str, limit: usize) -> Vec<RateLimitRecord> {
        let key = (normalize_model(model), normalize_account(account));
        let state = self.state.read().await;
        match state.history.get(&key) {
            Some(entries) => entries.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// All current-state records whose `available_at_epoch_ms > now`.
    pub async fn list_all_current(&self) -> Vec<RateLimitRecord> {
        let state = self.state.read().await;
        let now = epoch_ms();
        state
            .current
            .values()
            .filter(|entry| entry.expires_at_epoch_ms > now)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// First model in `models` (caller-supplied order) whose record is
    /// absent, not limited, or whose `available_at` has already passed.
    pub async fn find_available(&self, models: &[String], account: &str) -> Option<String> {
        for model in models {
            match self.get_current(model, account).await {
                None => return Some(model.clone()),
                Some(record) if !record.is_limited => return Some(model.clone()),
                Some(record) if record.available_at_epoch_ms <= epoch_ms() => return Some(model.clone()),
                Some(_) => continue,
            }
        }
        None
    }

    /// The limited model (among `models`) whose `available_at` is earliest.
    pub async fn get_next_available(&self, models: &[String], account: &str) -> Option<String> {
        let mut best: Option<(String, u64)> = None;
        for model in models {
            let Some(record) = self.get_current(model, account).await else { continue };
            if !record.is_limited || record.available_at_epoch_ms <= epoch_ms() {
                continue;
            }
            match &best {
                Some((_, at)) if *at <= record.available_at_epoch_ms => {}
                _ => best = Some((model.clone(), record.available_at_epoch_ms)),
            }
        }
        best.map(|(model, _)| model)
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let state = self.state.read().await;
        let persisted = PersistedStore {
            history: state.history.iter().map(|(k, v)| (join_key(k), v.clone())).collect(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
