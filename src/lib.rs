//! SoftAP Provisioning Service
//!
//! Brings a device onto an upstream WiFi network by broadcasting a soft
//! access point, accepting `ssid=<name>&password=<secret>` records over TCP
//! and driving the station interface through join, retry and fallback.

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;

pub use core::{
    error::{ConnectivityError, ParseError, RadioError, ServiceError, TransportError},
    types::{ConnectivityState, ConnectivityStatus, CredentialRecord},
};
