use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of one proxy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    /// Never used; eligible for rotation until proven bad.
    Unknown,
    Healthy,
    /// Out of rotation until a probe brings it back.
    Unhealthy,
}

/// Worker-reported outcome of using a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    /// Timeout, connection reset; counts toward the unhealthy threshold.
    TransientFailure,
    /// Refused, protocol error; counts toward the unhealthy threshold.
    FatalFailure,
}

/// Point-in-time view of one proxy, for status APIs.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub url: String,
    pub health: ProxyHealth,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
}
