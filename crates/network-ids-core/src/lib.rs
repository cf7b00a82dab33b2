//! # network-ids-core
//!
//! The detection pipeline for a host-resident network intrusion detection
//! engine: packet decode, per-source dossiers, sliding-window rule
//! detectors, a statistical anomaly detector, and alert assembly. Capture
//! hardware, HTTP control surfaces, and configuration persistence are
//! deliberately out of scope — collaborators in other crates consume the
//! small API this crate exposes.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod alerts;
pub mod anomaly;
pub mod clock;
pub mod decode;
pub mod dossier;
pub mod error;
pub mod pipeline;
pub mod rules;
pub mod types;
pub mod utils;

pub use alerts::Alert;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dossier::DossierSnapshot;
pub use error::{CoreError, Result};
pub use pipeline::{AnomalyStatus, NetworkIds, Stats, Status};
pub use types::{
    AlertStatus, Classification, ConfigOptions, DossierStatus, PacketRecord, Protocol,
    Sensitivity, Severity, SystemConfig,
};
