//! Unix domain socket status transport

pub mod server;
pub mod session;

pub use {server::StatusSocketServer, session::StatusSession};
