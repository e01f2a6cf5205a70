//! dbt builtin emulation
//!
//! Stand-ins for dbt-specific Jinja functions like ref(), source(), var(), etc.
//! They only exist so that dbt models can be rendered without dbt; the values
//! they return are placeholders, not what dbt would produce.

use minijinja::value::{Enumerator, Object, ObjectRepr, Rest};
use minijinja::{Error, ErrorKind, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// ref() function - references another dbt model
///
/// Usage in Jinja: {{ ref('model_name') }} or {{ ref('package', 'model_name') }}
/// Returns: model_name
pub fn ref_function(model_or_package: Value, model_name: Option<Value>) -> Result<Value, Error> {
    if let Some(model) = model_name {
        // Two-argument form: ref('package', 'model')
        let _package = model_or_package.as_str().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "ref() package must be a string")
        })?;

        let model_str = model.as_str().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "ref() model name must be a string")
        })?;

        Ok(Value::from(model_str))
    } else {
        let model_str = model_or_package.as_str().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "ref() model name must be a string")
        })?;

        Ok(Value::from(model_str))
    }
}

/// source() function - references a source table
///
/// Usage in Jinja: {{ source('source_name', 'table_name') }}
/// Returns: source_name_table_name
pub fn source_function(source_name: Value, table_name: Value) -> Result<Value, Error> {
    let source_str = source_name.as_str().ok_or_else(|| {
        Error::new(ErrorKind::InvalidOperation, "source() source name must be a string")
    })?;

    let table_str = table_name.as_str().ok_or_else(|| {
        Error::new(ErrorKind::InvalidOperation, "source() table name must be a string")
    })?;

    Ok(Value::from(format!("{}_{}", source_str, table_str)))
}

/// var() function - accesses project variables
///
/// Usage in Jinja: {{ var('variable_name') }} or {{ var('variable_name', 'default') }}
/// Returns: the default when given, otherwise the literal "item"
pub fn var_function(_var_name: Value, default: Option<Value>) -> Value {
    default.unwrap_or_else(|| Value::from("item"))
}

/// config() function - model configuration
///
/// Usage in Jinja: {{ config(materialized='table') }}
/// Returns: empty string (config is metadata, not SQL). Keyword arguments
/// arrive as one trailing map value and are ignored with the rest.
pub fn config_function(_args: Rest<Value>) -> Value {
    Value::from("")
}

/// set_sql_header() function - renders nothing
pub fn set_sql_header_function(_args: Rest<Value>) -> Value {
    Value::from("")
}

/// is_incremental() function
///
/// Always true: branches only reachable in full-refresh mode are never
/// rendered, so they are never linted.
pub fn is_incremental_function() -> bool {
    true
}

/// Emulates dbt's `this` relation
#[derive(Debug, Clone, Copy, Default)]
pub struct ThisEmulator;

impl ThisEmulator {
    const NAME: &'static str = "this_model";
    const SCHEMA: &'static str = "this_schema";
    const DATABASE: &'static str = "this_database";
}

impl Object for ThisEmulator {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "name" => Some(Value::from(Self::NAME)),
            "schema" => Some(Value::from(Self::SCHEMA)),
            "database" => Some(Value::from(Self::DATABASE)),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["name", "schema", "database"])
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

/// The builtin table injected when `apply_dbt_builtins` is set
pub fn dbt_builtins() -> BTreeMap<String, Value> {
    let mut builtins = BTreeMap::new();
    builtins.insert("set_sql_header".to_string(), Value::from_function(set_sql_header_function));
    builtins.insert("ref".to_string(), Value::from_function(ref_function));
    builtins.insert("source".to_string(), Value::from_function(source_function));
    builtins.insert("config".to_string(), Value::from_function(config_function));
    builtins.insert("var".to_string(), Value::from_function(var_function));
    builtins.insert("is_incremental".to_string(), Value::from_function(is_incremental_function));
    builtins.insert("this".to_string(), Value::from_object(ThisEmulator));
    builtins
}
