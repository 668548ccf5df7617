//! Error types for the Halldyll orchestrator.
//!
//! This module provides the error hierarchy for every stage of an operation:
//! configuration, state storage, providers, graph construction, planning and
//! the concurrent walk. Errors raised while visiting graph vertices are wrapped
//! in [`crate::diagnostics::Diagnostic`] values so that many failures can be
//! reported from a single walk.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Halldyll orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Errors reported by a resource provider.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Graph construction and validation errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Errors raised by the graph walker itself.
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Duplicate definition inside one module.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Kind of block (resource, output, variable, ...).
        kind: String,
        /// The duplicated name.
        name: String,
    },

    /// An address string could not be parsed.
    #[error("Invalid address \"{input}\": {reason}")]
    InvalidAddress {
        /// The rejected input.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// A reference points at something that is not declared.
    #[error("{from} refers to undeclared {reference}")]
    UnknownReference {
        /// The referencing block.
        from: String,
        /// The missing referent.
        reference: String,
    },

    /// A root variable has neither an input value nor a default.
    #[error("No value for required variable \"{name}\"")]
    MissingVariable {
        /// Name of the variable.
        name: String,
    },

    /// A saved plan was created from a different configuration.
    #[error("Saved plan is stale: configuration hash {found} does not match plan hash {expected}")]
    StalePlan {
        /// Hash recorded in the plan.
        expected: String,
        /// Hash of the current configuration.
        found: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// No state has been written yet.
    #[error("State not found: {location}")]
    NotFound {
        /// Where the store looked for state.
        location: String,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A stored object could not be decoded for a resource instance.
    #[error("Failed to read state for {addr}: {message}")]
    ReadState {
        /// Resource instance address.
        addr: String,
        /// Description of the decode failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock id: {lock_id}, holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the existing lock.
        lock_id: String,
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Unlock was attempted with an id that does not own the lock.
    #[error("Lock id mismatch: lock is held as {held}, unlock requested for {requested}")]
    LockMismatch {
        /// Id of the lock currently held.
        held: String,
        /// Id supplied by the caller.
        requested: String,
    },

    /// Unlock was attempted while no lock is held.
    #[error("State is not locked")]
    NotLocked,

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: u32,
        /// Found state version.
        found: u32,
    },
}

/// Errors surfaced by resource providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider handled the call and reported a failure.
    #[error("{provider}: {message}")]
    Reported {
        /// Provider type or address.
        provider: String,
        /// Message reported by the provider.
        message: String,
    },

    /// The provider could not be reached at all.
    #[error("{provider} is unreachable: {message}")]
    Unreachable {
        /// Provider type or address.
        provider: String,
        /// Transport-level description.
        message: String,
    },

    /// No constructor is registered for a provider type.
    #[error("Unknown provider type \"{provider_type}\"")]
    UnknownType {
        /// The unregistered type.
        provider_type: String,
    },

    /// No constructor is registered for a provisioner type.
    #[error("Unknown provisioner type \"{provisioner_type}\"")]
    UnknownProvisioner {
        /// The unregistered type.
        provisioner_type: String,
    },

    /// A resource needed a provider instance that has not been configured.
    #[error("{provider} has not been configured")]
    NotConfigured {
        /// Provider configuration address.
        provider: String,
    },
}

/// Graph construction errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency graph contains a cycle.
    #[error("Cycle: {}", vertices.join(", "))]
    Cycle {
        /// Keys of the vertices on the cycle.
        vertices: Vec<String>,
    },

    /// A vertex depends on itself.
    #[error("Self reference: {vertex}")]
    SelfReference {
        /// Key of the vertex.
        vertex: String,
    },

    /// No provider configuration could be resolved for a resource.
    #[error("Provider configuration {provider} for {resource} is not available")]
    UnresolvedProvider {
        /// Resource instance address.
        resource: String,
        /// Provider the resource asked for.
        provider: String,
    },

    /// A `-target` or `-exclude` address matches nothing.
    #[error("Target {target} matches nothing in configuration or state")]
    UnmatchedTarget {
        /// The unmatched target.
        target: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A change would destroy a resource protected by `prevent_destroy`.
    #[error("Instance {addr} has lifecycle.prevent_destroy set, but the plan calls for this resource to be destroyed")]
    PreventDestroy {
        /// Resource instance address.
        addr: String,
    },

    /// A provider produced a plan the orchestrator cannot act on.
    #[error("Provider produced an invalid plan for {addr}: {message}")]
    InvalidPlan {
        /// Resource instance address.
        addr: String,
        /// Description of the problem.
        message: String,
    },

    /// An apply vertex found no planned change for its instance.
    #[error("No planned change recorded for {addr}")]
    MissingChange {
        /// Resource instance address.
        addr: String,
    },

    /// Stored state changed after the plan was made.
    #[error("Saved plan is stale: it was made against state {expected}, but the stored state is now {found}")]
    StaleState {
        /// State the plan was made against.
        expected: String,
        /// State currently stored.
        found: String,
    },

    /// An output expression could not be evaluated.
    #[error("Failed to evaluate {addr}: {message}")]
    OutputEvaluation {
        /// Output address.
        addr: String,
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised by the walker rather than by a vertex.
#[derive(Debug, Error)]
pub enum WalkError {
    /// A vertex task panicked.
    #[error("Vertex {vertex} panicked: {message}")]
    TaskPanicked {
        /// Key of the vertex.
        vertex: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The walk was stopped before all vertices ran.
    #[error("Operation cancelled")]
    Cancelled,

    /// The walk was abandoned with operations still in flight.
    #[error("Operation abandoned after a second interrupt")]
    FatalInterrupt,
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates an address parse error.
    #[must_use]
    pub fn invalid_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an error reported by the named provider.
    #[must_use]
    pub fn reported(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reported {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a transport-level error for the named provider.
    #[must_use]
    pub fn unreachable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns true if the call failed in transit and may succeed if made
    /// again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}
