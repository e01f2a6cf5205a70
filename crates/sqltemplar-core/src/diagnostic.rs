//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Templating failures (1xxx)
    /// A declared macro or library path does not exist
    TemplateConfigurationError,

    /// Malformed template syntax in a macro file or the main file
    TemplateSyntaxError,

    /// A template variable was used without being defined
    TemplateUndefinedVariable,

    /// Runtime evaluation failure not attributable to a specific name
    TemplateRenderError,

    /// File exceeds the configured size limit and was not rendered
    TemplateFileTooLarge,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateConfigurationError => "TEMPLATE_CONFIGURATION_ERROR",
            Self::TemplateSyntaxError => "TEMPLATE_SYNTAX_ERROR",
            Self::TemplateUndefinedVariable => "TEMPLATE_UNDEFINED_VARIABLE",
            Self::TemplateRenderError => "TEMPLATE_RENDER_ERROR",
            Self::TemplateFileTooLarge => "TEMPLATE_FILE_TOO_LARGE",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - blocking issue that should fail CI
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path as given to the templater
    pub file: String,

    /// Optional line number (1-indexed)
    pub line: Option<usize>,

    /// Optional column number (1-indexed)
    pub column: Option<usize>,
}

impl Location {
    /// Create a location with file, line, and column
    pub fn with_position(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn line(&self) -> Option<usize> {
        self.location.as_ref().and_then(|l| l.line)
    }

    pub fn column(&self) -> Option<usize> {
        self.location.as_ref().and_then(|l| l.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        // Ensure codes are stable strings
        assert_eq!(DiagnosticCode::TemplateSyntaxError.as_str(), "TEMPLATE_SYNTAX_ERROR");
        assert_eq!(
            DiagnosticCode::TemplateUndefinedVariable.as_str(),
            "TEMPLATE_UNDEFINED_VARIABLE"
        );
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::new(
            DiagnosticCode::TemplateUndefinedVariable,
            Severity::Error,
            "Undefined jinja template variable: 'foo'",
        )
        .with_location(Location::with_position("models/users.sql", 3, 8));

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("TEMPLATE_UNDEFINED_VARIABLE"));
        assert!(json.contains("error"));
        assert_eq!(diag.line(), Some(3));
        assert_eq!(diag.column(), Some(8));
    }

    #[test]
    fn diagnostic_without_location() {
        let diag = Diagnostic::new(DiagnosticCode::TemplateRenderError, Severity::Error, "render failed");
        assert_eq!(diag.line(), None);
        assert_eq!(diag.column(), None);
    }
}
