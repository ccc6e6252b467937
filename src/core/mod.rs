//! Core business logic module

pub mod connectivity;
pub mod error;
pub mod events;
pub mod service;
pub mod supervisor;
pub mod types;
