// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Orchestrator
//!
//! A dependency-graph planning and concurrent apply engine for declarative
//! infrastructure.
//!
//! ## Overview
//!
//! Halldyll reads a YAML configuration describing resources, compares it
//! with the last recorded state and computes the changes needed to make
//! the two match:
//!
//! - Build a dependency graph of resources, outputs and providers
//! - Plan changes by asking each provider what it would do
//! - Apply a saved plan concurrently, in dependency order
//! - Record results in a locked, versioned state file
//!
//! ## Architecture
//!
//! Every operation follows the same pipeline:
//!
//! 1. **Graph**: a builder runs an ordered list of transforms over an
//!    arena DAG ([`graph::Graph`]) of [`graph::Node`]s
//! 2. **Walk**: the [`graph::Walker`] executes vertices concurrently, each
//!    after its dependencies, against a shared [`graph::EvalContext`]
//! 3. **Persist**: [`operation`] holds the state lock around the walk and
//!    writes the resulting state
//!
//! ## Modules
//!
//! - [`addrs`]: Resource, instance, output, module and provider addresses
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`graph`]: DAG, node kinds, transforms, builders and walker
//! - [`plans`]: Plans, planned changes and the JSON change report
//! - [`provider`]: Provider and provisioner traits, with the built-in ones
//! - [`state`]: State model and storage backends (local, memory)
//! - [`orchestrator`]: Validate, plan, apply and graph entry points
//! - [`operation`]: Lock-disciplined operations over a state store
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! variables:
//!   - name: zone
//!     default: eu-west
//!
//! resources:
//!   - type: simple_network
//!     name: main
//!     attributes:
//!       cidr: 10.0.0.0/16
//!
//!   - type: simple_server
//!     name: web
//!     count: 2
//!     depends_on: [simple_network.main]
//!     lifecycle:
//!       create_before_destroy: true
//!     attributes:
//!       zone: eu-west
//!
//! outputs:
//!   - name: network_id
//!     value_from: simple_network.main.id
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod addrs;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod operation;
pub mod orchestrator;
pub mod plans;
pub mod provider;
pub mod state;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Config, ConfigHasher, ConfigParser, ConfigValidator};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{OrchestratorError, Result};
pub use graph::{Graph, InterruptHandle, Node, WalkStatus, Walker};
pub use operation::{ApplyReport, run_apply, run_plan};
pub use orchestrator::{ApplyOptions, Orchestrator, PlanOptions};
pub use plans::{Action, ChangeReport, Plan, PlanMode};
pub use provider::{ProviderFactory, ProvisionerFactory, ResourceProvider, ResourceProvisioner, SimpleProvider};
pub use state::{LocalStateStore, MemoryStateStore, State, StateFile, StateStore};
