//! Accumulated errors and warnings.
//!
//! Graph construction and the walk keep going after individual failures, so
//! their results are a list of [`Diagnostic`] values rather than a single
//! error. A [`Diagnostics`] value with at least one error-severity entry means
//! the operation failed.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::OrchestratorError;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The operation cannot succeed.
    Error,
    /// Worth reporting, but not fatal.
    Warning,
}

/// A single error or warning.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: Severity,
    summary: String,
    detail: Option<String>,
    address: Option<String>,
    error: Option<Arc<OrchestratorError>>,
}

impl Diagnostic {
    /// Creates an error diagnostic from a typed error.
    #[must_use]
    pub fn error(err: impl Into<OrchestratorError>) -> Self {
        let err = err.into();
        Self {
            severity: Severity::Error,
            summary: err.to_string(),
            detail: None,
            address: None,
            error: Some(Arc::new(err)),
        }
    }

    /// Creates a warning with a summary and optional detail.
    #[must_use]
    pub fn warning(summary: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail,
            address: None,
            error: None,
        }
    }

    /// Attaches the address of the object the diagnostic is about.
    #[must_use]
    pub fn with_address(mut self, address: impl fmt::Display) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Attaches extra detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Severity of the diagnostic.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Optional detail text.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Address of the vertex or block the diagnostic concerns.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// The typed error behind an error diagnostic.
    #[must_use]
    pub fn source_error(&self) -> Option<&OrchestratorError> {
        self.error.as_deref()
    }

    /// Returns true for error-severity diagnostics.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        };
        write!(f, "{label}: {}", self.summary)?;
        if let Some(address) = &self.address {
            write!(f, " (at {address})")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n  {detail}")?;
        }
        Ok(())
    }
}

/// An ordered collection of diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends one diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    /// Appends an error diagnostic built from a typed error.
    pub fn push_error(&mut self, err: impl Into<OrchestratorError>) {
        self.0.push(Diagnostic::error(err));
    }

    /// Moves every diagnostic of `other` into `self`.
    pub fn append(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Returns true if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Iterates over error diagnostics only.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Iterates over warning diagnostics only.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    /// Iterates over all diagnostics.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Number of diagnostics.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no diagnostics.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sets `address` on every diagnostic that has none yet.
    #[must_use]
    pub fn in_context(mut self, address: &str) -> Self {
        for diagnostic in &mut self.0 {
            if diagnostic.address.is_none() {
                diagnostic.address = Some(address.to_string());
            }
        }
        self
    }

    /// Returns true if any error diagnostic satisfies `predicate`.
    pub fn any_error(&self, predicate: impl Fn(&OrchestratorError) -> bool) -> bool {
        self.errors()
            .filter_map(Diagnostic::source_error)
            .any(predicate)
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl From<OrchestratorError> for Diagnostics {
    fn from(err: OrchestratorError) -> Self {
        Self(vec![Diagnostic::error(err)])
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<T: IntoIterator<Item = Diagnostic>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}
