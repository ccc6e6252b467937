//! Error types for the SoftAP provisioning service

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for radio backend operations
pub type RadioResult<T> = Result<T, RadioError>;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors decoding a provisioning record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),
}

/// Errors related to radio backend operations
#[derive(Error, Debug, Clone)]
pub enum RadioError {
    #[error("Radio command failed: {0}")]
    CommandFailed(String),

    #[error("wpa_supplicant error: {0}")]
    WpaSupplicantError(String),

    #[error("hostapd error: {0}")]
    HostapdError(String),
}

/// Errors reported by the connectivity state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("Reconnect to {ssid} exhausted after {attempts} retries")]
    RetriesExhausted { ssid: String, attempts: u32 },
}

/// Errors related to the provisioning transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to listen on {addr}: {source}")]
    ListenFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    AcceptFailed(std::io::Error),

    #[error("Read failed: {0}")]
    ReadFailed(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the listening socket cannot be brought up at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::BindFailed { .. } | TransportError::ListenFailed { .. }
        )
    }
}

/// Errors related to core service operations
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Event queue closed")]
    QueueClosed,
}
