//! Configuration schema (sqltemplar.toml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default byte limit above which files are refused before rendering
pub const DEFAULT_LARGE_FILE_SKIP_BYTE_LIMIT: usize = 20_000;

/// Settings for the Jinja templater (`[templater.jinja]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JinjaConfig {
    /// Inject emulations of dbt builtins (ref, source, config, ...)
    #[serde(default)]
    pub apply_dbt_builtins: bool,

    /// Comma-separated list of macro files or directories
    #[serde(default)]
    pub load_macros_from_path: Option<String>,

    /// Directory holding library namespaces
    #[serde(default)]
    pub library_path: Option<PathBuf>,

    /// Inline macro definitions, keyed by an arbitrary name
    #[serde(default)]
    pub macros: BTreeMap<String, String>,

    /// File-local base variables
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl JinjaConfig {
    /// Macro paths, split on commas with blanks dropped
    pub fn macro_paths(&self) -> Vec<PathBuf> {
        self.load_macros_from_path
            .as_deref()
            .map(|paths| {
                paths
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Templater settings (`[templater]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplaterSection {
    #[serde(default)]
    pub jinja: JinjaConfig,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Error categories to ignore (e.g. "templating")
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Files above this many bytes are not templated (0 disables the check)
    #[serde(default = "default_large_file_limit")]
    pub large_file_skip_byte_limit: usize,

    /// Templater settings
    #[serde(default)]
    pub templater: TemplaterSection,
}

fn default_large_file_limit() -> usize {
    DEFAULT_LARGE_FILE_SKIP_BYTE_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            large_file_skip_byte_limit: DEFAULT_LARGE_FILE_SKIP_BYTE_LIMIT,
            templater: TemplaterSection::default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Jinja templater settings
    pub fn jinja(&self) -> &JinjaConfig {
        &self.templater.jinja
    }

    /// Whether an error category is listed under `ignore`
    pub fn is_ignored(&self, category: &str) -> bool {
        self.ignore.iter().any(|c| c.trim() == category)
    }

    /// Whether templating errors should be hidden from the linter
    pub fn ignore_templating(&self) -> bool {
        self.is_ignored("templating")
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}
