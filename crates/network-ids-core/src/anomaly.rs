//! Statistical anomaly detector: rolling windows of global traffic metrics,
//! a baseline learned once, and per-metric z-score exceedances afterward.
//!
//! This is deliberately not machine learning — a frozen mean/std snapshot
//! and a z-score comparison, matching §4.4 exactly.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::types::{AnomalyMultipliers, PacketRecord, Severity};

const SERIES_CAPACITY: usize = 100;
const RECENT_WINDOW_SECS: f64 = 60.0;
const MIN_SAMPLES_FOR_BASELINE: usize = 50;
const MIN_SAMPLES_FOR_PER_SOURCE: usize = 10;
pub const DEFAULT_BASELINE_PERIOD_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub packet_rate_mean: f64,
    pub packet_rate_std: f64,
    pub connection_count_mean: f64,
    pub connection_count_std: f64,
    pub port_count_mean: f64,
    pub port_count_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalMetric {
    PacketRate,
    ConnectionCount,
    PortCount,
}

#[derive(Debug, Clone)]
pub enum AnomalyDetection {
    Global { metric: GlobalMetric, current: f64, mean: f64, std: f64, z: f64, severity: Severity },
    PerSource { source: Ipv4Addr, current: f64, mean: f64, std: f64, z: f64, severity: Severity },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentMetrics {
    pub packet_rate: usize,
    pub connection_count: usize,
    pub unique_ports: usize,
    pub unique_ips: usize,
}

pub struct AnomalyState {
    start_time: f64,
    baseline_period: f64,
    packet_rate_series: VecDeque<f64>,
    connection_count_series: VecDeque<f64>,
    port_count_series: VecDeque<f64>,
    per_source_freq_series: HashMap<Ipv4Addr, VecDeque<f64>>,
    baseline: Option<Baseline>,
    last_metrics: CurrentMetrics,
}

fn push_bounded(series: &mut VecDeque<f64>, value: f64) {
    series.push_back(value);
    if series.len() > SERIES_CAPACITY {
        series.pop_front();
    }
}

fn mean(series: &VecDeque<f64>) -> f64 {
    series.iter().sum::<f64>() / series.len() as f64
}

/// Bessel-corrected (n-1) sample standard deviation. 0.0 for fewer than 2 samples.
fn sample_std(series: &VecDeque<f64>, series_mean: f64) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let variance = series.iter().map(|v| (v - series_mean).powi(2)).sum::<f64>() / (series.len() - 1) as f64;
    variance.sqrt()
}

fn severity_high_medium(z: f64, threshold: f64) -> Severity {
    if z > threshold * 1.5 {
        Severity::High
    } else {
        Severity::Medium
    }
}

fn severity_medium_low(z: f64, threshold: f64) -> Severity {
    if z > threshold * 1.2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

impl AnomalyState {
    pub fn new(start_time: f64) -> Self {
        Self::with_baseline_period(start_time, DEFAULT_BASELINE_PERIOD_SECS)
    }

    pub fn with_baseline_period(start_time: f64, baseline_period: f64) -> Self {
        Self {
            start_time,
            baseline_period,
            packet_rate_series: VecDeque::new(),
            connection_count_series: VecDeque::new(),
            port_count_series: VecDeque::new(),
            per_source_freq_series: HashMap::new(),
            baseline: None,
            last_metrics: CurrentMetrics::default(),
        }
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn last_metrics(&self) -> &CurrentMetrics {
        &self.last_metrics
    }

    pub fn sample_count(&self) -> usize {
        self.packet_rate_series.len()
    }

    pub fn baseline_progress_percent(&self, now: f64) -> f64 {
        let progress = (now - self.start_time) / self.baseline_period * 100.0;
        crate::utils::clamp(progress, 0.0, 100.0)
    }

    pub fn packet_rate_series_len(&self) -> usize {
        self.packet_rate_series.len()
    }

    /// One anomaly pass: samples the traffic log restricted to the trailing
    /// 60s window, updates the rolling series, establishes the baseline the
    /// instant it becomes eligible, and (once established) emits z-score
    /// detections. Returns no detections on the tick the baseline is
    /// established on, matching the source's "try to establish, then
    /// return" ordering.
    pub fn tick(
        &mut self,
        now: f64,
        traffic_log: &VecDeque<PacketRecord>,
        multipliers: AnomalyMultipliers,
    ) -> Vec<AnomalyDetection> {
        let window: Vec<&PacketRecord> = traffic_log
            .iter()
            .filter(|p| now - p.timestamp <= RECENT_WINDOW_SECS && p.timestamp <= now)
            .collect();

        let packet_rate = window.len();
        let connection_count = window.len(); // open question #1: preserved as identical

        let mut unique_ports = std::collections::HashSet::new();
        let mut ip_counts: HashMap<Ipv4Addr, usize> = HashMap::new();
        for entry in &window {
            if let Some(port) = entry.dest_port {
                unique_ports.insert(port);
            }
            *ip_counts.entry(entry.source_addr).or_insert(0) += 1;
        }

        push_bounded(&mut self.packet_rate_series, packet_rate as f64);
        push_bounded(&mut self.connection_count_series, connection_count as f64);
        push_bounded(&mut self.port_count_series, unique_ports.len() as f64);
        for (&source, &count) in &ip_counts {
            let series = self.per_source_freq_series.entry(source).or_default();
            push_bounded(series, count as f64);
        }

        self.last_metrics = CurrentMetrics {
            packet_rate,
            connection_count,
            unique_ports: unique_ports.len(),
            unique_ips: ip_counts.len(),
        };

        if self.baseline.is_none() {
            if now - self.start_time >= self.baseline_period
                && self.packet_rate_series.len() >= MIN_SAMPLES_FOR_BASELINE
            {
                let pr_mean = mean(&self.packet_rate_series);
                let cc_mean = mean(&self.connection_count_series);
                let pc_mean = mean(&self.port_count_series);
                self.baseline = Some(Baseline {
                    packet_rate_mean: pr_mean,
                    packet_rate_std: sample_std(&self.packet_rate_series, pr_mean),
                    connection_count_mean: cc_mean,
                    connection_count_std: sample_std(&self.connection_count_series, cc_mean),
                    port_count_mean: pc_mean,
                    port_count_std: sample_std(&self.port_count_series, pc_mean),
                });
            }
            return Vec::new();
        }

        let baseline = self.baseline.as_ref().expect("checked above");
        let mut detections = Vec::new();

        if baseline.packet_rate_std > 0.0 {
            let z = (packet_rate as f64 - baseline.packet_rate_mean).abs() / baseline.packet_rate_std;
            if z > multipliers.packet_rate_mult {
                detections.push(AnomalyDetection::Global {
                    metric: GlobalMetric::PacketRate,
                    current: packet_rate as f64,
                    mean: baseline.packet_rate_mean,
                    std: baseline.packet_rate_std,
                    z,
                    severity: severity_high_medium(z, multipliers.packet_rate_mult),
                });
            }
        }

        if baseline.connection_count_std > 0.0 {
            let z = (connection_count as f64 - baseline.connection_count_mean).abs() / baseline.connection_count_std;
            if z > multipliers.connection_mult {
                detections.push(AnomalyDetection::Global {
                    metric: GlobalMetric::ConnectionCount,
                    current: connection_count as f64,
                    mean: baseline.connection_count_mean,
                    std: baseline.connection_count_std,
                    z,
                    severity: severity_high_medium(z, multipliers.connection_mult),
                });
            }
        }

        if baseline.port_count_std > 0.0 {
            // Threshold intentionally reuses connection_mult, per §4.4.
            let z = (unique_ports.len() as f64 - baseline.port_count_mean).abs() / baseline.port_count_std;
            if z > multipliers.connection_mult {
                detections.push(AnomalyDetection::Global {
                    metric: GlobalMetric::PortCount,
                    current: unique_ports.len() as f64,
                    mean: baseline.port_count_mean,
                    std: baseline.port_count_std,
                    z,
                    severity: severity_medium_low(z, multipliers.connection_mult),
                });
            }
        }

        for (&source, series) in &self.per_source_freq_series {
            if series.len() < MIN_SAMPLES_FOR_PER_SOURCE {
                continue;
            }
            let source_mean = mean(series);
            let source_std = sample_std(series, source_mean);
            if source_std == 0.0 {
                continue;
            }
            let current = *ip_counts.get(&source).unwrap_or(&0) as f64;
            let z = (current - source_mean).abs() / source_std;
            if z > multipliers.ip_frequency_mult {
                detections.push(AnomalyDetection::PerSource {
                    source,
                    current,
                    mean: source_mean,
                    std: source_std,
                    z,
                    severity: severity_high_medium(z, multipliers.ip_frequency_mult),
                });
            }
        }

        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Protocol;

    fn packet(source: Ipv4Addr, t: f64) -> PacketRecord {
        PacketRecord {
            timestamp: t,
            source_addr: source,
            dest_addr: Ipv4Addr::new(10, 0, 0, 1),
            protocol: Protocol::Tcp,
            dest_port: Some(80),
            tcp_flags: Some(0x10),
        }
    }

    fn medium() -> AnomalyMultipliers {
        AnomalyMultipliers { packet_rate_mult: 3.0, connection_mult: 2.5, ip_frequency_mult: 2.0 }
    }

    #[test]
    fn no_baseline_before_window_elapses() {
        let mut state = AnomalyState::new(0.0);
        let mut log = VecDeque::new();
        for i in 0..200 {
            log.push_back(packet(Ipv4Addr::new(1, 2, 3, 4), i as f64));
        }
        let detections = state.tick(3000.0, &log, medium());
        assert!(detections.is_empty());
        assert!(state.baseline().is_none());
    }

    #[test]
    fn baseline_established_once_and_frozen() {
        let mut state = AnomalyState::with_baseline_period(0.0, 100.0);
        let src = Ipv4Addr::new(192, 168, 1, 5);

        // ~50 ticks of steady ~20-packet windows to build up the series.
        let mut now = 0.0;
        for i in 0..60 {
            now = i as f64 * 2.0;
            let mut log = VecDeque::new();
            for j in 0..20 {
                log.push_back(packet(src, now - j as f64));
            }
            state.tick(now, &log, medium());
        }

        assert!(state.baseline().is_some());
        let frozen = *state.baseline().unwrap();

        // Feed more steady samples; baseline must not move.
        for i in 0..20 {
            let t = now + (i as f64 + 1.0) * 2.0;
            let mut log = VecDeque::new();
            for j in 0..20 {
                log.push_back(packet(src, t - j as f64));
            }
            state.tick(t, &log, medium());
        }
        assert_eq!(*state.baseline().unwrap(), frozen);
    }

    #[test]
    fn zero_std_suppresses_detection() {
        let mut state = AnomalyState::with_baseline_period(0.0, 10.0);
        // Identical windows -> std == 0 for every series.
        let mut now = 0.0;
        for i in 0..60 {
            now = i as f64 * 0.2;
            let mut log = VecDeque::new();
            for j in 0..10 {
                log.push_back(packet(Ipv4Addr::new(1, 1, 1, 1), now - j as f64 * 0.01));
            }
            let detections = state.tick(now, &log, medium());
            assert!(detections.is_empty());
        }
    }

    proptest::proptest! {
        /// Whatever sequence of per-tick packet counts arrives, the global
        /// packet-rate series never exceeds its fixed capacity and always
        /// holds the most recent samples in arrival order (invariant 3).
        #[test]
        fn packet_rate_series_stays_bounded_and_fifo(counts in proptest::collection::vec(0usize..30, 1..300)) {
            let mut state = AnomalyState::with_baseline_period(0.0, 1_000_000.0);
            let src = Ipv4Addr::new(1, 1, 1, 1);
            let mut expected_tail: Vec<f64> = Vec::new();

            for (i, &count) in counts.iter().enumerate() {
                let now = i as f64;
                let mut log = VecDeque::new();
                for j in 0..count {
                    log.push_back(packet(src, now - j as f64 * 0.001));
                }
                state.tick(now, &log, medium());

                expected_tail.push(count as f64);
                if expected_tail.len() > SERIES_CAPACITY {
                    expected_tail.remove(0);
                }

                proptest::prop_assert!(state.packet_rate_series_len() <= SERIES_CAPACITY);
                proptest::prop_assert_eq!(state.packet_rate_series_len(), expected_tail.len());
                proptest::prop_assert_eq!(&state.packet_rate_series, &VecDeque::from(expected_tail.clone()));
            }
        }
    }
}
