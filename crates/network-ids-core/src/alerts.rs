//! Alert Assembler: normalizes detection records into alerts and keeps the
//! bounded alert ring downstream collaborators scrape the tail of.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use chrono::Local;
use serde::Serialize;
use serde_json::{json, Value};

use crate::anomaly::{AnomalyDetection, GlobalMetric};
use crate::rules::Detection;
use crate::types::{AlertStatus, Severity};

pub const ALERT_RING_CAPACITY: usize = 1000;
const RECENT_ANOMALY_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// ISO-8601, local time zone, seconds precision.
    pub timestamp: String,
    pub source_addr: String,
    pub dest_addr: String,
    pub status: AlertStatus,
    pub details: Value,
    /// Wall-clock seconds since epoch the alert was assembled at; used only
    /// to compute `recent_anomaly_count` without re-parsing `timestamp`.
    #[serde(skip)]
    pub assembled_at: f64,
    #[serde(skip)]
    pub is_anomaly: bool,
}

pub struct AlertAssembler {
    ring: VecDeque<Alert>,
    next_id: u64,
}

fn fmt_range(mean: f64, std: f64) -> String {
    format!("{:.1} - {:.1}", mean - std, mean + std)
}

impl AlertAssembler {
    pub fn new() -> Self {
        Self { ring: VecDeque::new(), next_id: 0 }
    }

    fn push(&mut self, alert: Alert) {
        self.ring.push_back(alert);
        while self.ring.len() > ALERT_RING_CAPACITY {
            self.ring.pop_front();
        }
    }

    fn next_counter(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// `now` is wall-clock unix seconds, used for the id's timestamp segment
    /// and for `recent_anomaly_count` bookkeeping; it is independent of the
    /// orchestrator's monotonic clock.
    pub fn assemble_rule(&mut self, detection: &Detection, unix_now: i64, port_scan_threshold: u32, ddos_threshold: u32) -> Alert {
        let counter = self.next_counter();
        let (tag, severity, title, description, source, details) = match detection {
            Detection::PortScan { source, ports } => (
                "ps",
                Severity::High,
                "Port Scan Detected".to_string(),
                format!(
                    "Source touched {} distinct ports, exceeding the threshold of {}",
                    ports.len(),
                    port_scan_threshold
                ),
                *source,
                json!({ "kind": "port_scan", "source": source.to_string(), "ports": ports.iter().collect::<Vec<_>>(), "threshold": port_scan_threshold }),
            ),
            Detection::Flood { source, count } => (
                "ddos",
                Severity::High,
                "Volumetric Flood Detected".to_string(),
                format!(
                    "Source sent {} packets in the last second, exceeding the threshold of {}",
                    count, ddos_threshold
                ),
                *source,
                json!({ "kind": "flood", "source": source.to_string(), "count": count, "threshold": ddos_threshold }),
            ),
        };
        let alert = self.build(tag, None, severity, title, description, Some(source), None, details, unix_now, counter);
        self.push(alert.clone());
        alert
    }

    pub fn assemble_anomaly(&mut self, detection: &AnomalyDetection, unix_now: i64) -> Alert {
        let counter = self.next_counter();
        let (metric, severity, title, description, source, details) = match detection {
            AnomalyDetection::Global { metric: GlobalMetric::PacketRate, current, mean, std, z, severity } => (
                "packet_rate",
                *severity,
                "Unusual Packet Rate Detected".to_string(),
                format!("Packet rate ({current}) significantly differs from baseline ({})", fmt_range(*mean, *std)),
                None,
                json!({ "kind": "anomaly:packet_rate", "current": current, "mean": mean, "std": std, "z": z }),
            ),
            AnomalyDetection::Global { metric: GlobalMetric::ConnectionCount, current, mean, std, z, severity } => (
                "connection_count",
                *severity,
                "Abnormal Connection Pattern".to_string(),
                format!("Connection count ({current}) outside normal range ({})", fmt_range(*mean, *std)),
                None,
                json!({ "kind": "anomaly:connection_count", "current": current, "mean": mean, "std": std, "z": z }),
            ),
            AnomalyDetection::Global { metric: GlobalMetric::PortCount, current, mean, std, z, severity } => (
                "port_count",
                *severity,
                "Unusual Port Usage Pattern".to_string(),
                format!("Port usage pattern ({current} unique ports) deviates from baseline"),
                None,
                json!({ "kind": "anomaly:port_count", "current": current, "mean": mean, "std": std, "z": z }),
            ),
            AnomalyDetection::PerSource { source, current, mean, std, z, severity } => (
                "ip_frequency",
                *severity,
                "Abnormal IP Traffic Frequency".to_string(),
                format!("Source {source} showing unusual traffic frequency"),
                Some(*source),
                json!({ "kind": "anomaly:ip_frequency", "source": source.to_string(), "current": current, "mean": mean, "std": std, "z": z }),
            ),
        };
        let alert = self.build("anomaly", Some(metric), severity, title, description, source, None, details, unix_now, counter);
        self.push(alert.clone());
        alert
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        tag: &str,
        metric: Option<&str>,
        severity: Severity,
        title: String,
        description: String,
        source: Option<Ipv4Addr>,
        dest: Option<Ipv4Addr>,
        details: Value,
        unix_now: i64,
        counter: u64,
    ) -> Alert {
        let id = match metric {
            Some(metric) => format!("{tag}_{unix_now}_{metric}_{counter:06}"),
            None => format!("{tag}_{unix_now}_{counter:06}"),
        };
        Alert {
            id,
            severity,
            title,
            description,
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            source_addr: source.map(|a| a.to_string()).unwrap_or_else(|| "multiple".to_string()),
            dest_addr: dest.map(|a| a.to_string()).unwrap_or_else(|| "multiple".to_string()),
            status: AlertStatus::Active,
            details,
            assembled_at: unix_now as f64,
            is_anomaly: tag == "anomaly",
        }
    }

    pub fn set_status(&mut self, alert_id: &str, status: AlertStatus) -> bool {
        if let Some(alert) = self.ring.iter_mut().find(|a| a.id == alert_id) {
            alert.status = status;
            true
        } else {
            false
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.ring.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn recent_anomaly_count(&self, unix_now: i64) -> usize {
        self.ring
            .iter()
            .filter(|a| a.is_anomaly && unix_now - a.assembled_at as i64 <= RECENT_ANOMALY_WINDOW_SECS)
            .count()
    }
}

impl Default for AlertAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn port_scan_alert_has_expected_shape() {
        let mut assembler = AlertAssembler::new();
        let mut ports = HashSet::new();
        for p in 20..=25u16 {
            ports.insert(p);
        }
        let detection = Detection::PortScan { source: Ipv4Addr::new(10, 0, 0, 9), ports };
        let alert = assembler.assemble_rule(&detection, 1_700_000_000, 5, 50);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.source_addr, "10.0.0.9");
        assert!(alert.id.starts_with("ps_1700000000_"));
    }

    #[test]
    fn ring_is_bounded() {
        let mut assembler = AlertAssembler::new();
        for i in 0..(ALERT_RING_CAPACITY + 10) {
            let detection = Detection::Flood { source: Ipv4Addr::new(1, 2, 3, 4), count: i };
            assembler.assemble_rule(&detection, 1_700_000_000, 5, 50);
        }
        assert_eq!(assembler.len(), ALERT_RING_CAPACITY);
    }

    #[test]
    fn set_status_updates_matching_alert() {
        let mut assembler = AlertAssembler::new();
        let detection = Detection::Flood { source: Ipv4Addr::new(1, 2, 3, 4), count: 99 };
        let alert = assembler.assemble_rule(&detection, 1_700_000_000, 5, 50);
        assert!(assembler.set_status(&alert.id, AlertStatus::Resolved));
        assert!(!assembler.set_status("does-not-exist", AlertStatus::Resolved));
    }
}
