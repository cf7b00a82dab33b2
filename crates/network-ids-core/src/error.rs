//! Error taxonomy for the control-plane surface.
//!
//! `decode` and `capacity` never reach here: both are recovered locally by
//! the orchestrator (a dropped frame and a counter bump) and are not part of
//! any caller-facing `Result`. `CoreError` only carries the kinds that a
//! control-plane call can actually fail with.

use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn blocking_allowlisted(addr: Ipv4Addr) -> Self {
        Self::Precondition(format!(
            "{addr} is allowlisted; block() refuses to add an allowlisted address"
        ))
    }

    pub fn no_such_dossier(addr: Ipv4Addr) -> Self {
        Self::NotFound(format!("no dossier recorded for {addr}"))
    }

    pub fn no_such_alert(id: &str) -> Self {
        Self::NotFound(format!("no alert with id {id}"))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
