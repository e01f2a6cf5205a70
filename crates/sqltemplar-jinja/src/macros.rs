//! Macro extraction
//!
//! Macro sources (inline config entries, files under the configured macro
//! paths, `.sql` files in a library) are registered as named templates in the
//! environment. Each top-level `{% macro %}` becomes a [`TemplateMacro`]
//! value that can be placed into the live context of another template.

use crate::analyzer;
use crate::context::LiveContext;
use crate::error::TemplaterError;
use minijinja::machinery::ast;
use minijinja::value::{Object, ObjectRepr};
use minijinja::{Captured, Environment, Error, ErrorKind, State, Template, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// A macro defined in another registered template
///
/// minijinja macros are bound to the state that defined them, so the macro
/// is resolved lazily: calling it evaluates its template against the globals
/// captured at extraction time and invokes the macro found there.
#[derive(Debug, Clone)]
pub struct TemplateMacro {
    template: String,
    name: String,
    globals: Value,
}

impl TemplateMacro {
    pub fn new(template: impl Into<String>, name: impl Into<String>, globals: Value) -> Self {
        Self {
            template: template.into(),
            name: name.into(),
            globals,
        }
    }

    pub fn value(template: &str, name: &str, globals: Value) -> Value {
        Value::from_object(Self::new(template, name, globals))
    }
}

/// Evaluate `template` for its state, discarding the top-level output
fn evaluate<'env>(template: &Template<'env, 'env>, globals: &Value) -> Result<Captured<'env>, Error> {
    template.render_captured_to(globals, io::sink())
}

impl Object for TemplateMacro {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call(self: &Arc<Self>, state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let template = state.env().get_template(&self.template)?;
        let module = evaluate(&template, &self.globals)?;
        let callable = module.state().lookup(&self.name).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownFunction,
                format!("macro '{}' is not defined in '{}'", self.name, self.template),
            )
        })?;
        callable.call(module.state(), args)
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<macro {}>", self.name)
    }
}

/// Names of the top-level `{% macro %}` definitions in `source`
pub fn macro_names(source: &str, template_name: &str) -> Result<Vec<String>, Error> {
    let tree = analyzer::parse_named(source, template_name)?;
    let mut names = Vec::new();
    if let ast::Stmt::Template(template) = &tree {
        for child in &template.children {
            if let ast::Stmt::Macro(macro_stmt) = child {
                names.push(macro_stmt.name.to_string());
            }
        }
    }
    Ok(names)
}

/// Register `source` as `template_name` and harvest its macros
///
/// The template is evaluated once against `context` so that errors surface
/// early. A file whose top-level code uses an undefined name contributes no
/// macros: the error is logged and the names it would have defined stay
/// undefined for the real render to report.
pub fn extract_from_source(
    env: &mut Environment<'static>,
    template_name: &str,
    source: &str,
    context: &LiveContext,
    origin: Option<&Path>,
) -> Result<BTreeMap<String, Value>, TemplaterError> {
    let prefix = match origin {
        Some(path) => format!("Error in Jinja macro file {}", path.display()),
        None => format!("Error in Jinja macro '{template_name}'"),
    };

    env.add_template_owned(template_name.to_string(), source.to_string())
        .map_err(|e| TemplaterError::from_syntax_error(&e, &prefix, origin, None))?;
    let names = macro_names(source, template_name)
        .map_err(|e| TemplaterError::from_syntax_error(&e, &prefix, origin, None))?;

    let globals = context.to_value();
    let template = env
        .get_template(template_name)
        .map_err(|e| TemplaterError::from_syntax_error(&e, &prefix, origin, None))?;
    if let Err(err) = evaluate(&template, &globals) {
        if err.kind() == ErrorKind::UndefinedError {
            tracing::debug!(template = template_name, error = %err, "undefined name while loading macros");
            return Ok(BTreeMap::new());
        }
        return Err(TemplaterError::render(format!("{prefix}: {err}")));
    }

    tracing::debug!(template = template_name, count = names.len(), "extracted macros");
    Ok(names
        .into_iter()
        .map(|name| {
            let value = TemplateMacro::value(template_name, &name, globals.clone());
            (name, value)
        })
        .collect())
}

/// Load macros from every `.sql` file under `paths`
///
/// Directories are walked recursively and the collected files are processed
/// in sorted order, so a later file overwrites an earlier one defining the
/// same macro name.
pub fn extract_from_path(
    env: &mut Environment<'static>,
    paths: &[PathBuf],
    context: &LiveContext,
) -> Result<BTreeMap<String, Value>, TemplaterError> {
    let mut macros = BTreeMap::new();

    for path in paths {
        if !path.exists() {
            return Err(TemplaterError::configuration(
                format!("Path does not exist: {}", path.display()),
                Some(path),
            ));
        }

        for file in macro_files(path)? {
            let source = fs::read_to_string(&file).map_err(|e| {
                TemplaterError::configuration(
                    format!("Failed to read macro file {}: {e}", file.display()),
                    Some(&file),
                )
            })?;
            let template_name = file.display().to_string();
            tracing::debug!(path = %file.display(), "loading macros from file");
            macros.extend(extract_from_source(env, &template_name, &source, context, Some(&file))?);
        }
    }

    Ok(macros)
}

/// Load inline macros from `[templater.jinja.macros]`
pub fn extract_from_config(
    env: &mut Environment<'static>,
    macros: &BTreeMap<String, String>,
    context: &LiveContext,
) -> Result<BTreeMap<String, Value>, TemplaterError> {
    let mut extracted = BTreeMap::new();
    for (key, source) in macros {
        let template_name = format!("config_macro/{key}");
        extracted.extend(extract_from_source(env, &template_name, source, context, None)?);
    }
    Ok(extracted)
}

fn macro_files(path: &Path) -> Result<Vec<PathBuf>, TemplaterError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            TemplaterError::configuration(format!("Failed to walk {}: {e}", path.display()), Some(path))
        })?;
        let is_sql = entry.path().extension().is_some_and(|ext| ext == "sql");
        if entry.file_type().is_file() && is_sql {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
