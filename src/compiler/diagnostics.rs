//! Diagnostic accumulation
//!
//! Problems attributable to the program being compiled are reported here
//! and never abort the reporting thread. The build checks the sink at the
//! end of each whole-program phase.

use crate::compiler::graph::NodeInfo;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fails the build at the next check
    Error,
    /// Informational
    Warning,
}

/// One reported problem
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Offending method, class or symbol
    pub element: String,
    /// Source position of the offending node, if any
    pub location: Option<NodeInfo>,
    /// Message
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.location {
            Some(location) => write!(
                f,
                "{}: {} ({}): {}",
                severity, self.element, location, self.message
            ),
            None => write!(f, "{}: {}: {}", severity, self.element, self.message),
        }
    }
}

/// Thread-safe diagnostic sink
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an error against `element`
    pub fn report(&self, element: &str, location: Option<&NodeInfo>, message: impl Into<String>) {
        self.push(Severity::Error, element, location, message.into());
    }

    /// Report a warning against `element`
    pub fn warn(&self, element: &str, location: Option<&NodeInfo>, message: impl Into<String>) {
        self.push(Severity::Warning, element, location, message.into());
    }

    fn push(
        &self,
        severity: Severity,
        element: &str,
        location: Option<&NodeInfo>,
        message: String,
    ) {
        let diagnostic = Diagnostic {
            severity,
            element: element.to_string(),
            location: location.cloned(),
            message,
        };
        match severity {
            Severity::Error => tracing::error!(target: "kiln::diagnostics", "{}", diagnostic),
            Severity::Warning => tracing::warn!(target: "kiln::diagnostics", "{}", diagnostic),
        }
        self.entries.lock().push(diagnostic);
    }

    /// Number of reported errors
    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Snapshot of everything reported so far
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Messages of reported errors
    pub fn error_messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.message.clone())
            .collect()
    }

    /// Fail when any error has been reported
    pub fn check(&self) -> Result<()> {
        match self.error_count() {
            0 => Ok(()),
            errors => Err(Error::CompilationFailed { errors }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_counts_only_errors() {
        let diagnostics = Diagnostics::new();
        diagnostics.warn("A", None, "unused");
        assert!(diagnostics.check().is_ok());

        let info = NodeInfo {
            call_site: None,
            line: 12,
            bci: 4,
        };
        diagnostics.report("A.f()V", Some(&info), "bad node");
        diagnostics.report("B", None, "missing");
        assert!(matches!(
            diagnostics.check(),
            Err(Error::CompilationFailed { errors: 2 })
        ));
        assert_eq!(diagnostics.entries().len(), 3);
        assert_eq!(
            diagnostics.entries()[1].to_string(),
            "error: A.f()V (line 12, bci 4): bad node"
        );
    }
}
