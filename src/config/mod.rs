//! Process-wide runtime configuration.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
