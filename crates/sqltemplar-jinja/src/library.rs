//! Library namespaces loaded from a directory
//!
//! A library directory is turned into an explicit tree of namespaces:
//!
//! ```text
//! libs/
//!   __init__.toml      -> entries at the root of the `libs` namespace
//!   dates.toml         -> dates.start, dates.end, ...
//!   helpers.sql        -> helpers.my_macro(...)
//!   warehouse/
//!     schemas.json     -> warehouse.schemas.raw, ...
//! ```
//!
//! Every top-level entry of the library directory becomes a name in the
//! live context. Names starting with `_` are hidden from templates.

use crate::context::LiveContext;
use crate::error::TemplaterError;
use crate::macros::extract_from_source;
use minijinja::value::{Enumerator, Object, ObjectRepr};
use minijinja::{Environment, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const PACKAGE_STEM: &str = "__init__";

/// One node of a loaded library
#[derive(Debug, Clone)]
pub enum LibraryNode {
    /// A constant or a callable macro
    Value(Value),

    /// A nested namespace
    Namespace(BTreeMap<String, LibraryNode>),
}

impl LibraryNode {
    /// Convert to a template value
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Namespace(entries) => Value::from_object(LibraryNamespace::new(entries)),
        }
    }

    /// Resolve a dotted path (`a.b.c`) below this node
    pub fn resolve(&self, dotted: &str) -> Option<&LibraryNode> {
        dotted.split('.').try_fold(self, |node, part| match node {
            Self::Namespace(entries) => entries.get(part),
            Self::Value(_) => None,
        })
    }
}

/// Namespace object exposed to templates
#[derive(Debug)]
pub struct LibraryNamespace {
    entries: BTreeMap<String, Value>,
}

impl LibraryNamespace {
    fn new(entries: &BTreeMap<String, LibraryNode>) -> Self {
        Self {
            entries: entries
                .iter()
                .filter(|(name, _)| is_public(name))
                .map(|(name, node)| (name.clone(), node.to_value()))
                .collect(),
        }
    }
}

impl Object for LibraryNamespace {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        if !is_public(key) {
            return None;
        }
        self.entries.get(key).cloned()
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let keys = self.entries.keys().map(|k| Value::from(k.as_str())).collect();
        Enumerator::Values(keys)
    }
}

fn is_public(name: &str) -> bool {
    !name.starts_with('_')
}

/// Load the library at `path` into a map of top-level context values
///
/// `.sql` macro files are evaluated against `context`, the variables bound
/// before libraries are loaded.
pub fn load_libraries(
    path: &Path,
    env: &mut Environment<'static>,
    context: &LiveContext,
) -> Result<BTreeMap<String, Value>, TemplaterError> {
    let tree = load_tree(path, env, context)?;
    Ok(tree
        .iter()
        .filter(|(name, _)| is_public(name))
        .map(|(name, node)| (name.clone(), node.to_value()))
        .collect())
}

/// Load the library at `path` as a tree of nodes
pub fn load_tree(
    path: &Path,
    env: &mut Environment<'static>,
    context: &LiveContext,
) -> Result<BTreeMap<String, LibraryNode>, TemplaterError> {
    if !path.is_dir() {
        return Err(TemplaterError::configuration(
            format!("Library path does not exist: {}", path.display()),
            Some(path),
        ));
    }
    load_dir(path, env, context)
}

fn load_dir(
    dir: &Path,
    env: &mut Environment<'static>,
    context: &LiveContext,
) -> Result<BTreeMap<String, LibraryNode>, TemplaterError> {
    let read_error = |e: std::io::Error| {
        TemplaterError::configuration(format!("Failed to read {}: {e}", dir.display()), Some(dir))
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        paths.push(entry.map_err(read_error)?.path());
    }
    paths.sort();

    let mut entries = BTreeMap::new();
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        if path.is_dir() {
            if stem.starts_with('.') {
                continue;
            }
            tracing::debug!(path = %path.display(), "loading library namespace");
            let nested = load_dir(&path, env, context)?;
            entries.insert(stem, LibraryNode::Namespace(nested));
            continue;
        }

        let Some(module) = load_module(&path, env, context)? else {
            continue;
        };
        if stem == PACKAGE_STEM {
            entries.extend(module);
        } else {
            entries.insert(stem, LibraryNode::Namespace(module));
        }
    }

    Ok(entries)
}

/// Load one library file, or `None` when its type is not a library type
fn load_module(
    path: &Path,
    env: &mut Environment<'static>,
    context: &LiveContext,
) -> Result<Option<BTreeMap<String, LibraryNode>>, TemplaterError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if !matches!(extension, "toml" | "json" | "sql") {
        return Ok(None);
    }

    let source = fs::read_to_string(path).map_err(|e| {
        TemplaterError::configuration(format!("Failed to read {}: {e}", path.display()), Some(path))
    })?;
    let parse_error = |e: String| {
        TemplaterError::configuration(format!("Invalid library file {}: {e}", path.display()), Some(path))
    };

    let values: BTreeMap<String, Value> = match extension {
        "toml" => {
            let table: toml::Table = toml::from_str(&source).map_err(|e| parse_error(e.to_string()))?;
            table.iter().map(|(k, v)| (k.clone(), Value::from_serialize(v))).collect()
        }
        "json" => {
            let map: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&source).map_err(|e| parse_error(e.to_string()))?;
            map.iter().map(|(k, v)| (k.clone(), Value::from_serialize(v))).collect()
        }
        _ => {
            let template_name = format!("library/{}", path.display());
            extract_from_source(env, &template_name, &source, context, Some(path))?
        }
    };

    tracing::debug!(path = %path.display(), entries = values.len(), "loaded library module");
    Ok(Some(
        values
            .into_iter()
            .map(|(k, v)| (k, LibraryNode::Value(v)))
            .collect(),
    ))
}
