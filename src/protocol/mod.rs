//! Protocol message definitions

pub mod credentials;
pub mod jsonrpc;
pub mod notification;

pub use {
    credentials::CredentialCodec,
    jsonrpc::JsonRpcNotification,
    notification::{Notification, RetriesExhaustedParams},
};
