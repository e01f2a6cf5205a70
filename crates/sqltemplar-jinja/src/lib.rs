//! Jinja templating for SQL files
//!
//! This crate handles:
//! - Building the live context (config variables, libraries, dbt builtins, macros)
//! - Rendering templates in a sandboxed minijinja environment
//! - Capturing and locating undefined variables
//! - Tracing how each span of the rendered SQL maps back to the source

pub mod analyzer;
pub mod context;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod library;
pub mod macros;
pub mod renderer;
pub mod templater;
pub mod tracer;
pub mod undefined;

pub use context::{ContextBuilder, LiveContext};
pub use error::TemplaterError;
pub use functions::{config_function, dbt_builtins, ref_function, source_function, var_function};
pub use library::{load_libraries, LibraryNode};
pub use macros::TemplateMacro;
pub use renderer::{build_environment, BoundTemplateFactory, RenderOutput, SandboxedRenderer};
pub use templater::{JinjaTemplater, ProcessResult};
pub use tracer::{slice_file, SliceResult, TemplateFactory};
pub use undefined::{UndefinedPlaceholder, UndefinedPolicy, UndefinedSink};
