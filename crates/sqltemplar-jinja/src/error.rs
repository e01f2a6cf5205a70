//! Templater errors and their diagnostic form

use sqltemplar_core::{Diagnostic, DiagnosticCode, Location, Severity};
use std::path::{Path, PathBuf};

/// Error raised while building the context, rendering or tracing a template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplaterError {
    /// A declared macro or library path is unusable
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        path: Option<PathBuf>,
    },

    /// Malformed template syntax
    #[error("{message}")]
    TemplateSyntax {
        message: String,
        path: Option<PathBuf>,
        line: usize,
        column: usize,
    },

    /// A name resolved as undefined during rendering
    #[error("Undefined jinja template variable: '{name}'")]
    UndefinedVariable {
        name: String,
        line: usize,
        column: usize,
    },

    /// Runtime failure not attributable to one name
    #[error(
        "Unrecoverable failure in Jinja templating: {message}. \
         Have you configured your variables?"
    )]
    Render { message: String },

    /// File refused before rendering started
    #[error("File is {size} bytes, over the {limit} byte limit for templating")]
    FileTooLarge { size: usize, limit: usize },
}

impl TemplaterError {
    pub fn configuration(message: impl Into<String>, path: Option<&Path>) -> Self {
        Self::Configuration {
            message: message.into(),
            path: path.map(Path::to_path_buf),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    /// Build a syntax error from a minijinja error
    ///
    /// The column is derived from the error's byte range when `source` is
    /// given and defaults to 1 otherwise.
    pub fn from_syntax_error(
        error: &minijinja::Error,
        prefix: &str,
        path: Option<&Path>,
        source: Option<&str>,
    ) -> Self {
        let line = error.line().unwrap_or(1);
        let column = source
            .zip(error.range())
            .map(|(source, range)| column_of_offset(source, range.start))
            .unwrap_or(1);
        let detail = error.detail().unwrap_or("syntax error");

        Self::TemplateSyntax {
            message: format!("{prefix}: {detail}"),
            path: path.map(Path::to_path_buf),
            line,
            column,
        }
    }

    /// 1-based (line, column) where the error applies
    pub fn position(&self) -> (usize, usize) {
        match self {
            Self::TemplateSyntax { line, column, .. }
            | Self::UndefinedVariable { line, column, .. } => (*line, *column),
            // No precise location; line 1 so it can still be suppressed
            Self::Configuration { .. } | Self::Render { .. } | Self::FileTooLarge { .. } => (1, 1),
        }
    }

    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::Configuration { .. } => DiagnosticCode::TemplateConfigurationError,
            Self::TemplateSyntax { .. } => DiagnosticCode::TemplateSyntaxError,
            Self::UndefinedVariable { .. } => DiagnosticCode::TemplateUndefinedVariable,
            Self::Render { .. } => DiagnosticCode::TemplateRenderError,
            Self::FileTooLarge { .. } => DiagnosticCode::TemplateFileTooLarge,
        }
    }

    /// Convert to a core diagnostic for `fname`
    pub fn to_diagnostic(&self, fname: &str) -> Diagnostic {
        let severity = match self {
            Self::FileTooLarge { .. } => Severity::Warn,
            _ => Severity::Error,
        };
        let (line, column) = self.position();

        Diagnostic::new(self.code(), severity, self.to_string())
            .with_location(Location::with_position(fname, line, column))
    }
}

fn column_of_offset(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |p| p + 1);
    offset - line_start + 1
}
