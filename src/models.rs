use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Tracked availability of a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unknown,
    Ok,
    Failed,
}

/// Result of a single OPTIONS probe. Consumed immediately by the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
}

impl ProbeOutcome {
    pub fn status(self) -> Status {
        match self {
            ProbeOutcome::Reachable => Status::Ok,
            ProbeOutcome::Unreachable => Status::Failed,
        }
    }
}

/// Immutable probing target, built once at startup. The source address/port
/// only feed the SIP header fields, not the socket binding.
#[derive(Debug, Clone)]
pub struct Target {
    pub address: String,
    pub port: u16,
    pub source_ip: IpAddr,
    pub source_port: u16,
}

impl Target {
    pub fn label(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Per-target mutable record. `since` marks the start of the current
/// continuous status run; it is `None` only before the first probe completes.
#[derive(Debug, Clone, Copy)]
pub struct EndpointState {
    pub status: Status,
    pub since: Option<DateTime<Utc>>,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            status: Status::Unknown,
            since: None,
        }
    }
}

/// Emitted by the state store when an endpoint's status actually changed.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub target: String,
    pub old_status: Status,
    pub new_status: Status,
    pub at: DateTime<Utc>,
}
