//! Notification message types (service-to-observer events)

use serde::{Deserialize, Serialize};

use crate::core::types::ConnectivityStatus;

/// Service-to-observer notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// Connectivity state changed
    StateChanged(ConnectivityStatus),

    /// Reconnecting to the upstream network gave up; back to AP-only
    RetriesExhausted(RetriesExhaustedParams),
}

/// Reconnect-exhausted notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetriesExhaustedParams {
    pub ssid: String,
    pub attempts: u32,
}

impl Notification {
    pub fn retries_exhausted(ssid: impl Into<String>, attempts: u32) -> Self {
        Notification::RetriesExhausted(RetriesExhaustedParams {
            ssid: ssid.into(),
            attempts,
        })
    }
}
