//! Sliding-window rule detectors: port scan and volumetric flood.
//!
//! Both operate over a single source's dossier and never consult other
//! sources' state, which is what lets the concurrency model in §5 shard by
//! source address if a deployment ever wants to parallelize.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::dossier::Dossier;

#[derive(Debug, Clone)]
pub enum Detection {
    PortScan { source: Ipv4Addr, ports: HashSet<u16> },
    Flood { source: Ipv4Addr, count: usize },
}

/// Checks the port-scan rule after `dest_port` has already been inserted
/// into `dossier.ports_touched` by the caller. Fires on the threshold
/// crossing and on every packet while still above it (§4.3) — callers that
/// want one-shot alerting must deduplicate downstream.
pub fn check_port_scan(source: Ipv4Addr, dossier: &Dossier, port_scan_threshold: u32) -> Option<Detection> {
    if dossier.ports_touched.len() as u32 > port_scan_threshold {
        Some(Detection::PortScan { source, ports: dossier.ports_touched.clone() })
    } else {
        None
    }
}

/// Checks the volumetric-flood rule: more than `ddos_threshold` packets from
/// `source` within the last 1.0s of `dossier.recent_packet_times`.
pub fn check_flood(source: Ipv4Addr, dossier: &Dossier, now: f64, ddos_threshold: u32) -> Option<Detection> {
    let recent = dossier.recent_count(now, 1.0);
    if recent as u32 > ddos_threshold {
        Some(Detection::Flood { source, count: recent })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dossier::DossierStore;

    #[test]
    fn port_scan_fires_past_threshold() {
        let mut store = DossierStore::new();
        let src = Ipv4Addr::new(10, 0, 0, 9);
        for (i, port) in [20u16, 21, 22, 23, 24, 25].iter().enumerate() {
            store.note_packet(src, i as f64);
            store.note_port(src, *port);
        }
        let dossier = store.get_raw(src).unwrap();
        let detection = check_port_scan(src, dossier, 5);
        assert!(matches!(detection, Some(Detection::PortScan { .. })));
    }

    #[test]
    fn port_scan_silent_below_threshold() {
        let mut store = DossierStore::new();
        let src = Ipv4Addr::new(10, 0, 0, 9);
        for (i, port) in [20u16, 21, 22].iter().enumerate() {
            store.note_packet(src, i as f64);
            store.note_port(src, *port);
        }
        let dossier = store.get_raw(src).unwrap();
        assert!(check_port_scan(src, dossier, 5).is_none());
    }

    #[test]
    fn flood_fires_on_burst() {
        let mut store = DossierStore::new();
        let src = Ipv4Addr::new(203, 0, 113, 45);
        for i in 0..60 {
            store.note_packet(src, i as f64 * 0.008);
        }
        let dossier = store.get_raw(src).unwrap();
        let now = 59.0 * 0.008;
        let detection = check_flood(src, dossier, now, 50);
        assert!(matches!(detection, Some(Detection::Flood { .. })));
    }
}
