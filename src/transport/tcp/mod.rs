//! TCP provisioning transport

pub mod connection;
pub mod server;

pub use {
    connection::{ConnectionCloser, ConnectionHandle, ConnectionOutcome, ReadPolicy},
    server::ProvisioningServer,
};
