// ABOUTME: Library root for dockhand - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod options;
pub mod runtime;
pub mod server;
pub mod service;
pub mod status;
pub mod transfer;
pub mod types;
pub mod wire;
