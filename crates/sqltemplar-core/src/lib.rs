//! sqltemplar Core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod templated_file;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use templated_file::{
    RawFileSlice, RawSliceKind, TemplatedFile, TemplatedFileError, TemplatedFileSlice,
    TemplatedSliceKind,
};
pub use config::{Config, ConfigError, JinjaConfig, TemplaterSection};
