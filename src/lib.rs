//! Depot library
//!
//! Wire codec, directory-backed file store, one-command-per-connection TCP
//! server, and the thin client peer the CLI is built on.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod server;
pub mod store;
pub mod wire;
