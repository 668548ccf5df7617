//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::addrs::Target;
use crate::config::ConfigParser;
use crate::error::Result;
use crate::graph::DEFAULT_PARALLELISM;
use crate::orchestrator::{GraphKind, PlanOptions};
use crate::plans::PlanMode;

/// Halldyll - Dependency-ordered infrastructure planning and apply.
#[derive(Parser, Debug)]
#[command(name = "halldyll")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "HALLDYLL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the state file (defaults to `.halldyll/state.json` next to
    /// the configuration).
    #[arg(long, global = true, env = "HALLDYLL_STATE")]
    pub state: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration.
    Validate,

    /// Compute and display the changes an apply would make.
    Plan {
        /// Plan to destroy everything in state.
        #[arg(long)]
        destroy: bool,

        /// Write the plan to a file for a later `apply`.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Planning options.
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Apply a saved plan, or plan and apply in one step.
    Apply {
        /// Saved plan file.
        plan_file: Option<PathBuf>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Planning options, used when no plan file is given.
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Destroy everything recorded in state.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Planning options.
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Print an operation's dependency graph in DOT format.
    Graph {
        /// Which graph to build.
        #[arg(long, value_enum, default_value = "plan")]
        kind: GraphKindArg,

        /// Planning options.
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Inspect state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Remove a stale state lock.
    ForceUnlock {
        /// Lock ID, as reported by the operation that holds it.
        lock_id: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Options shared by every planning command.
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Restrict to this address and its dependencies (repeatable).
    #[arg(long = "target", value_name = "ADDRESS")]
    pub targets: Vec<String>,

    /// Leave out this address and its dependents (repeatable).
    #[arg(long = "exclude", value_name = "ADDRESS")]
    pub excludes: Vec<String>,

    /// Set a root variable, e.g. `--var region=eu-west` (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Refresh recorded objects before planning.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub refresh: bool,

    /// Maximum number of concurrent operations.
    #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
    pub parallelism: usize,
}

impl PlanArgs {
    /// Converts the arguments into plan options. Variables from the
    /// environment are overridden by `--var`.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed address or variable assignment.
    pub fn to_options(&self, mode: PlanMode) -> Result<PlanOptions> {
        let mut variables = ConfigParser::variables_from_env();
        variables.extend(ConfigParser::parse_assignments(&self.vars)?);
        Ok(PlanOptions {
            mode,
            targets: parse_targets(&self.targets)?,
            excludes: parse_targets(&self.excludes)?,
            variables,
            refresh: self.refresh,
            parallelism: self.parallelism,
        })
    }
}

fn parse_targets(raw: &[String]) -> Result<Vec<Target>> {
    raw.iter()
        .map(|s| s.parse::<Target>().map_err(Into::into))
        .collect()
}

/// State subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// List every resource instance in state.
    List,

    /// Show one resource instance.
    Show {
        /// Resource instance address.
        address: String,
    },
}

/// Graph kinds accepted by `halldyll graph`.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum GraphKindArg {
    /// Normal plan.
    Plan,
    /// Destroy plan.
    Destroy,
    /// Apply of a fresh plan.
    Apply,
    /// Validation.
    Validate,
}

impl From<GraphKindArg> for GraphKind {
    fn from(kind: GraphKindArg) -> Self {
        match kind {
            GraphKindArg::Plan => Self::Plan,
            GraphKindArg::Destroy => Self::PlanDestroy,
            GraphKindArg::Apply => Self::Apply,
            GraphKindArg::Validate => Self::Validate,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
