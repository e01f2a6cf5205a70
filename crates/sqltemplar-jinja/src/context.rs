//! Live context for Jinja rendering
//!
//! The live context is the mapping of names visible to a template. It is
//! assembled fresh for every file by [`ContextBuilder`]; nothing in it is
//! shared with other files or with the caller's configuration.

use crate::error::TemplaterError;
use crate::functions::dbt_builtins;
use crate::library::load_libraries;
use crate::macros::{extract_from_config, extract_from_path};
use minijinja::{Environment, Value};
use sqltemplar_core::Config;
use std::collections::BTreeMap;

/// Mapping of names to template values
#[derive(Debug, Clone, Default)]
pub struct LiveContext {
    values: BTreeMap<String, Value>,
}

impl LiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Insert a value, returning the one it replaced
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }

    /// Insert only when `name` is not bound yet
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if self.values.contains_key(&name) {
            return false;
        }
        self.values.insert(name, value);
        true
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert to a MiniJinja map value for rendering
    pub fn to_value(&self) -> Value {
        Value::from_iter(self.values.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

impl Extend<(String, Value)> for LiveContext {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}

impl FromIterator<(String, Value)> for LiveContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Builder for the live context of one file
///
/// Sources are layered in this order, later ones overwriting earlier ones:
/// config variables, libraries, dbt builtins (only names still unbound),
/// macros from the macro paths, then inline config macros.
pub struct ContextBuilder<'a> {
    config: &'a Config,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Build the live context for `fname`, registering macro templates in `env`
    pub fn build(&self, fname: &str, env: &mut Environment<'static>) -> Result<LiveContext, TemplaterError> {
        let jinja = self.config.jinja();
        let mut context = LiveContext::new();

        for (name, value) in &jinja.context {
            context.insert(name.clone(), Value::from_serialize(value));
        }

        if let Some(library_path) = &jinja.library_path {
            tracing::debug!(fname, path = %library_path.display(), "loading library");
            let libraries = load_libraries(library_path, env, &context)?;
            context.extend(libraries);
        }

        if jinja.apply_dbt_builtins {
            for (name, value) in dbt_builtins() {
                context.insert_if_absent(name, value);
            }
        }

        let macro_paths = jinja.macro_paths();
        if !macro_paths.is_empty() {
            // The second pass sees the first pass's macros, so a macro may
            // call one defined in a sibling file.
            let first_pass = extract_from_path(env, &macro_paths, &context)?;
            let mut with_first_pass = context.clone();
            with_first_pass.extend(first_pass);
            let second_pass = extract_from_path(env, &macro_paths, &with_first_pass)?;
            context.extend(second_pass);
        }

        if !jinja.macros.is_empty() {
            let inline = extract_from_config(env, &jinja.macros, &context)?;
            context.extend(inline);
        }

        tracing::debug!(fname, names = context.len(), "built live context");
        Ok(context)
    }
}
