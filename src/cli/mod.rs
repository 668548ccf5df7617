//! CLI module for the Halldyll orchestrator.
//!
//! This module provides the command-line interface for planning and
//! applying configurations.

mod commands;
mod output;

pub use commands::{Cli, Commands, GraphKindArg, OutputFormat, PlanArgs, StateCommands};
pub use output::OutputFormatter;
