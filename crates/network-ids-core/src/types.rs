//! Shared data types for the detection pipeline.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Transport protocol as seen by the decoder. Anything that isn't TCP is
/// folded into `Other` — deep inspection of other transports is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Other,
}

/// A normalized, immutable packet record as produced by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Seconds on the orchestrator's monotonic clock.
    pub timestamp: f64,
    pub source_addr: Ipv4Addr,
    pub dest_addr: Ipv4Addr,
    pub protocol: Protocol,
    /// Only meaningful when `protocol == Tcp`.
    pub dest_port: Option<u16>,
    /// Only meaningful when `protocol == Tcp`.
    pub tcp_flags: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Unknown,
    Benign,
    Malicious,
}

impl Default for Classification {
    fn default() -> Self {
        Classification::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// Derived status of a dossier with respect to the access lists, computed at
/// query time rather than stored (it would otherwise drift from the lists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DossierStatus {
    Blocked,
    Allowlisted,
    Monitoring,
}

/// Coarse knob jointly setting rule thresholds and anomaly z-score multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    High,
    Medium,
    Low,
}

/// The three anomaly z-score multipliers a sensitivity level maps to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyMultipliers {
    pub packet_rate_mult: f64,
    pub connection_mult: f64,
    pub ip_frequency_mult: f64,
}

impl Sensitivity {
    pub fn multipliers(self) -> AnomalyMultipliers {
        match self {
            Sensitivity::High => AnomalyMultipliers {
                packet_rate_mult: 2.0,
                connection_mult: 2.0,
                ip_frequency_mult: 1.5,
            },
            Sensitivity::Medium => AnomalyMultipliers {
                packet_rate_mult: 3.0,
                connection_mult: 2.5,
                ip_frequency_mult: 2.0,
            },
            Sensitivity::Low => AnomalyMultipliers {
                packet_rate_mult: 4.0,
                connection_mult: 3.0,
                ip_frequency_mult: 2.5,
            },
        }
    }

    pub fn port_scan_threshold(self) -> u32 {
        match self {
            Sensitivity::High => 5,
            Sensitivity::Medium => 10,
            Sensitivity::Low => 20,
        }
    }

    pub fn ddos_threshold(self) -> u32 {
        match self {
            Sensitivity::High => 50,
            Sensitivity::Medium => 100,
            Sensitivity::Low => 200,
        }
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Medium
    }
}

/// Mutable knobs reachable via `config_set`. Setting `sensitivity` overwrites
/// the rule thresholds and anomaly multipliers per §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub port_scan_threshold: u32,
    pub ddos_threshold: u32,
    pub sensitivity: Sensitivity,
    pub auto_block: bool,
    pub anomaly_enabled: bool,
    pub monitored_ports: Vec<u16>,
    pub excluded_addrs: Vec<Ipv4Addr>,
    /// Rule detectors fire on every packet above threshold by default. When
    /// set, the alert assembler suppresses a re-fire for a given source and
    /// rule kind until the underlying count (ports touched, or flood size)
    /// grows past what it was the last time that source/kind alerted.
    pub suppress_duplicate_rule_alerts: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let sensitivity = Sensitivity::default();
        Self {
            port_scan_threshold: sensitivity.port_scan_threshold(),
            ddos_threshold: sensitivity.ddos_threshold(),
            sensitivity,
            auto_block: false,
            anomaly_enabled: true,
            monitored_ports: vec![22, 80, 443, 3389],
            excluded_addrs: Vec::new(),
            suppress_duplicate_rule_alerts: false,
        }
    }
}

/// Options accepted by `config_set`. Every field is optional: only the
/// options present in a given call are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOptions {
    pub port_scan_threshold: Option<u32>,
    pub ddos_threshold: Option<u32>,
    pub sensitivity: Option<Sensitivity>,
    pub auto_block: Option<bool>,
    pub anomaly_enabled: Option<bool>,
    pub monitored_ports: Option<Vec<u16>>,
    pub excluded_addrs: Option<Vec<Ipv4Addr>>,
    pub suppress_duplicate_rule_alerts: Option<bool>,
}

impl SystemConfig {
    /// Applies a partial options set. `sensitivity`, if present, is applied
    /// first so an explicit `port_scan_threshold`/`ddos_threshold` in the
    /// same call can still override the sensitivity-derived default.
    pub fn apply(&mut self, options: ConfigOptions) {
        if let Some(sensitivity) = options.sensitivity {
            self.sensitivity = sensitivity;
            self.port_scan_threshold = sensitivity.port_scan_threshold();
            self.ddos_threshold = sensitivity.ddos_threshold();
        }
        if let Some(v) = options.port_scan_threshold {
            self.port_scan_threshold = v;
        }
        if let Some(v) = options.ddos_threshold {
            self.ddos_threshold = v;
        }
        if let Some(v) = options.auto_block {
            self.auto_block = v;
        }
        if let Some(v) = options.anomaly_enabled {
            self.anomaly_enabled = v;
        }
        if let Some(v) = options.monitored_ports {
            self.monitored_ports = v;
        }
        if let Some(v) = options.excluded_addrs {
            self.excluded_addrs = v;
        }
        if let Some(v) = options.suppress_duplicate_rule_alerts {
            self.suppress_duplicate_rule_alerts = v;
        }
    }
}
