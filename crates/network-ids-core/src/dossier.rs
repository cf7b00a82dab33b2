//! Source Dossier Store: per-source activity bookkeeping, lazily created,
//! never deleted during uptime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::access::AccessLists;
use crate::types::{Classification, DossierStatus, Severity};

const RECENT_WINDOW_SECS: f64 = 60.0;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub timestamp: f64,
    pub action: String,
    pub details: String,
    pub severity: Severity,
}

/// Per-source record. `ports_touched` is the single copy of "ports seen from
/// this source" — the port-scan detector reads it rather than keeping its
/// own shadow set (§4.3).
#[derive(Debug, Clone)]
pub struct Dossier {
    pub first_seen: f64,
    pub last_seen: f64,
    pub recent_packet_times: VecDeque<f64>,
    pub ports_touched: HashSet<u16>,
    pub classification: Classification,
    pub notes: String,
    pub activity_log: Vec<ActivityEntry>,
}

impl Dossier {
    fn new(now: f64) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            recent_packet_times: VecDeque::new(),
            ports_touched: HashSet::new(),
            classification: Classification::Unknown,
            notes: String::new(),
            activity_log: Vec::new(),
        }
    }

    /// Count of entries within the last `window` seconds of `now`.
    pub fn recent_count(&self, now: f64, window: f64) -> usize {
        self.recent_packet_times.iter().filter(|&&t| now - t < window).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DossierSnapshot {
    pub source_addr: Ipv4Addr,
    pub first_seen: f64,
    pub last_seen: f64,
    pub recent_packet_count: usize,
    pub ports_touched: Vec<u16>,
    pub classification: Classification,
    pub notes: String,
    pub activity_log: Vec<ActivityEntry>,
    pub status: DossierStatus,
}

#[derive(Debug, Default)]
pub struct DossierStore {
    dossiers: HashMap<Ipv4Addr, Dossier>,
}

impl DossierStore {
    pub fn new() -> Self {
        Self { dossiers: HashMap::new() }
    }

    /// Ensures a dossier exists, appends `now`, evicts entries older than
    /// 60s, and bumps `last_seen`. Invariant 1 in §8 holds immediately after
    /// this call returns.
    pub fn note_packet(&mut self, src: Ipv4Addr, now: f64) {
        let dossier = self.dossiers.entry(src).or_insert_with(|| Dossier::new(now));
        dossier.recent_packet_times.push_back(now);
        while let Some(&front) = dossier.recent_packet_times.front() {
            if now - front >= RECENT_WINDOW_SECS {
                dossier.recent_packet_times.pop_front();
            } else {
                break;
            }
        }
        dossier.last_seen = now;
    }

    /// Idempotent: inserting a port already present is a no-op.
    pub fn note_port(&mut self, src: Ipv4Addr, port: u16) {
        if let Some(dossier) = self.dossiers.get_mut(&src) {
            dossier.ports_touched.insert(port);
        }
    }

    pub fn log(&mut self, src: Ipv4Addr, action: impl Into<String>, details: impl Into<String>, severity: Severity) {
        if let Some(dossier) = self.dossiers.get_mut(&src) {
            dossier.activity_log.push(ActivityEntry {
                timestamp: dossier.last_seen,
                action: action.into(),
                details: details.into(),
                severity,
            });
        }
    }

    pub fn set_classification(&mut self, src: Ipv4Addr, classification: Classification) -> bool {
        if let Some(dossier) = self.dossiers.get_mut(&src) {
            dossier.classification = classification;
            true
        } else {
            false
        }
    }

    pub fn set_notes(&mut self, src: Ipv4Addr, text: String) -> bool {
        if let Some(dossier) = self.dossiers.get_mut(&src) {
            dossier.notes = text;
            true
        } else {
            false
        }
    }

    pub fn get(&self, src: Ipv4Addr, access: &AccessLists) -> Option<DossierSnapshot> {
        let dossier = self.dossiers.get(&src)?;
        let status = if access.is_blocked(src) {
            DossierStatus::Blocked
        } else if access.is_allowed(src) {
            DossierStatus::Allowlisted
        } else {
            DossierStatus::Monitoring
        };
        Some(DossierSnapshot {
            source_addr: src,
            first_seen: dossier.first_seen,
            last_seen: dossier.last_seen,
            recent_packet_count: dossier.recent_packet_times.len(),
            ports_touched: dossier.ports_touched.iter().copied().collect(),
            classification: dossier.classification,
            notes: dossier.notes.clone(),
            activity_log: dossier.activity_log.clone(),
            status,
        })
    }

    pub fn get_raw(&self, src: Ipv4Addr) -> Option<&Dossier> {
        self.dossiers.get(&src)
    }

    pub fn active_source_count(&self) -> usize {
        self.dossiers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_packet_evicts_stale_entries() {
        let mut store = DossierStore::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        store.note_packet(addr, 0.0);
        store.note_packet(addr, 30.0);
        store.note_packet(addr, 61.0);
        let raw = store.get_raw(addr).unwrap();
        // t=0 is 61s behind t=61, evicted; t=30 (31s behind) and t=61 remain.
        assert_eq!(raw.recent_packet_times.len(), 2);
        assert!(raw.recent_packet_times.iter().all(|&t| 61.0 - t < 60.0));
    }

    #[test]
    fn note_port_is_idempotent() {
        let mut store = DossierStore::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        store.note_packet(addr, 0.0);
        store.note_port(addr, 22);
        store.note_port(addr, 22);
        assert_eq!(store.get_raw(addr).unwrap().ports_touched.len(), 1);
    }

    #[test]
    fn status_reflects_access_lists() {
        let mut store = DossierStore::new();
        let mut access = AccessLists::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        store.note_packet(addr, 0.0);
        assert_eq!(store.get(addr, &access).unwrap().status, DossierStatus::Monitoring);
        access.block(addr).unwrap();
        assert_eq!(store.get(addr, &access).unwrap().status, DossierStatus::Blocked);
        access.allow(addr);
        assert_eq!(store.get(addr, &access).unwrap().status, DossierStatus::Allowlisted);
    }

    #[test]
    fn unknown_source_returns_none() {
        let store = DossierStore::new();
        let access = AccessLists::new();
        assert!(store.get(Ipv4Addr::new(1, 2, 3, 4), &access).is_none());
    }
}
