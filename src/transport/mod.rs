//! Transport layers

pub mod tcp;
pub mod unix_socket;
