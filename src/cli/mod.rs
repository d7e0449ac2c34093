//! Command-line surface of the ledger.

pub mod commands;

pub use commands::{Command, Opt};
