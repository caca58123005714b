//! Per-candidate probe history exposed through the admin API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::probe::ProbeOutcome;

/// Running counters for one candidate.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CandidateHistory {
    pub probes: u64,
    pub live: u64,
    /// Dead probes since the last live one.
    pub consecutive_failures: u32,
    pub last_live: Option<bool>,
    pub last_status: Option<u16>,
    pub last_latency_ms: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Concurrent map of candidate name → [`CandidateHistory`].
#[derive(Debug, Default)]
pub struct ProbeHistory {
    entries: DashMap<String, CandidateHistory>,
}

impl ProbeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &ProbeOutcome) {
        let mut entry = self.entries.entry(outcome.candidate.clone()).or_default();
        entry.probes += 1;
        if outcome.live {
            entry.live += 1;
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        }
        entry.last_live = Some(outcome.live);
        entry.last_status = outcome.status;
        entry.last_latency_ms = Some(outcome.latency_ms);
        entry.last_checked = Some(Utc::now());
    }

    pub fn get(&self, candidate: &str) -> Option<CandidateHistory> {
        self.entries.get(candidate).map(|e| e.value().clone())
    }

    /// Sorted copy of every entry, suitable for JSON output.
    pub fn snapshot(&self) -> BTreeMap<String, CandidateHistory> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Drop entries for candidates that are no longer configured.
    pub fn retain_candidates<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = names.into_iter().collect();
        self.entries.retain(|name, _| keep.contains(name.as_str()));
    }
}
