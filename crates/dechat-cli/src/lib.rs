//! DeChat CLI library
//!
//! Argument parsing, configuration files and command handlers for the
//! `dechat` binary. The demo runs the full messaging runtime against the
//! in-memory collaborators from `dechat-harness`.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::{DechatApp, DemoPlan};
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
