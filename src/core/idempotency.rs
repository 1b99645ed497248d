//! In-memory idempotency ledger.
//!
//! Maps an event fingerprint to the outcome computed the first time that
//! event was processed. Within the TTL window a duplicate delivery gets the
//! cached outcome back without re-executing side effects. Deliberately not
//! persisted across restarts: the upstream delivers at-least-once, so the
//! data layer must tolerate the occasional duplicate anyway (all status
//! updates are set-operations, not increments).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::core::types::ProcessedResult;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

struct LedgerEntry {
    outcome: ProcessedResult,
    recorded_at: Instant,
}

pub struct IdempotencyLedger {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl IdempotencyLedger {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic fingerprint over event kind + correlation id (external
    /// bot or calendar id) + event timestamp.
    pub fn fingerprint(kind: &str, correlation_id: &str, timestamp: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b"|");
        hasher.update(correlation_id.as_bytes());
        hasher.update(b"|");
        hasher.update(timestamp.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Cached outcome for a fingerprint, treating expired entries as absent.
    pub fn lookup(&self, fingerprint: &str) -> Option<ProcessedResult> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .get(fingerprint)
            .filter(|e| e.recorded_at.elapsed() < self.ttl)
            .map(|e| e.outcome.clone())
    }

    /// Record the outcome for a fingerprint. When the table has grown past
    /// its threshold, expired entries are evicted opportunistically so the
    /// ledger stays bounded even without the periodic purge.
    pub fn record(&self, fingerprint: String, outcome: ProcessedResult) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, e| e.recorded_at.elapsed() < ttl);
        }
        entries.insert(
            fingerprint,
            LedgerEntry {
                outcome,
                recorded_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry. Called from the cleanup sweep; returns the
    /// number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.recorded_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyLedger {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}
