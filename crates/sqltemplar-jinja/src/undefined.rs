//! Placeholders for names missing from the live context
//!
//! Any name the static analysis found but the context does not define is
//! bound to an [`UndefinedPlaceholder`] before rendering. The placeholder
//! keeps rendering alive through attribute chains and calls, and (under the
//! record policy) remembers every name that was actually used.

use minijinja::value::{Enumerator, Object, ObjectRepr, Rest};
use minijinja::{Environment, Error, ErrorKind, State, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

/// How undefined names behave during rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedPolicy {
    /// Render as empty and record the name for diagnostics
    #[default]
    Record,

    /// Render as the sanitized name and record nothing
    Ignore,
}

/// Shared set of undefined names observed during one render
#[derive(Debug, Clone, Default)]
pub struct UndefinedSink {
    names: Arc<Mutex<BTreeSet<String>>>,
}

impl UndefinedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) {
        // A poisoned lock only means another render thread panicked; the
        // set itself is still usable.
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        if !names.contains(name) {
            tracing::debug!(name, "recording undefined template variable");
            names.insert(name.to_string());
        }
    }

    /// Snapshot of the names recorded so far
    pub fn names(&self) -> BTreeSet<String> {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Stand-in value for an undefined (possibly dotted) name
#[derive(Debug, Clone)]
pub struct UndefinedPlaceholder {
    name: String,
    policy: UndefinedPolicy,
    sink: UndefinedSink,
}

impl UndefinedPlaceholder {
    pub fn new(name: impl Into<String>, policy: UndefinedPolicy, sink: UndefinedSink) -> Self {
        let name = name.into();
        if policy == UndefinedPolicy::Ignore {
            tracing::debug!(name = %name, "providing dummy value for undefined template variable");
        }
        Self { name, policy, sink }
    }

    /// Wrap a new placeholder as a template value
    pub fn value(name: impl Into<String>, policy: UndefinedPolicy, sink: UndefinedSink) -> Value {
        Value::from_object(Self::new(name, policy, sink))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The text this placeholder renders as under the ignore policy
    pub fn sanitized_name(&self) -> String {
        self.name.replace('.', "_")
    }

    fn child(&self, name: String) -> Value {
        Self::value(name, self.policy, self.sink.clone())
    }

    fn record_self(&self) {
        if self.policy == UndefinedPolicy::Record {
            self.sink.record(&self.name);
        }
    }
}

/// Whether `value` stands for a missing name
///
/// True for minijinja's own undefined value and for placeholders.
pub fn is_missing(value: &Value) -> bool {
    value.is_undefined() || value.downcast_object_ref::<UndefinedPlaceholder>().is_some()
}

/// `default` filter that also treats placeholders as missing
fn default_filter(state: &State<'_, '_>, value: &Value, args: Rest<Value>) -> Result<Value, Error> {
    if value.downcast_object_ref::<UndefinedPlaceholder>().is_some() {
        if args.len() > 2 {
            return Err(Error::from(ErrorKind::TooManyArguments));
        }
        return Ok(args.first().cloned().unwrap_or_else(|| Value::from("")));
    }
    minijinja::filters::default(state, value, args)
}

/// Register filters and tests that see through placeholders
pub fn register_missing_checks(env: &mut Environment<'_>) {
    env.add_filter("default", default_filter);
    env.add_filter("d", default_filter);
    env.add_test("defined", is_defined);
    env.add_test("undefined", is_missing);
}

fn is_defined(value: &Value) -> bool {
    !is_missing(value)
}

impl Object for UndefinedPlaceholder {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.record_self();
        let attr = match key.as_str() {
            Some(attr) => attr.to_string(),
            None => key.to_string(),
        };
        Some(self.child(format!("{}.{}", self.name, attr)))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        match self.policy {
            UndefinedPolicy::Ignore => Enumerator::Values(vec![self.child(self.name.clone())]),
            UndefinedPolicy::Record => Enumerator::NonEnumerable,
        }
    }

    fn is_true(self: &Arc<Self>) -> bool {
        true
    }

    fn call(self: &Arc<Self>, _state: &State<'_, '_>, _args: &[Value]) -> Result<Value, Error> {
        self.record_self();
        Ok(match self.policy {
            UndefinedPolicy::Record => self.child(format!("{}()", self.name)),
            UndefinedPolicy::Ignore => self.child(self.name.clone()),
        })
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        _args: &[Value],
    ) -> Result<Value, Error> {
        self.record_self();
        let attr = format!("{}.{}", self.name, method);
        Ok(match self.policy {
            UndefinedPolicy::Record => self.child(format!("{attr}()")),
            UndefinedPolicy::Ignore => self.child(attr),
        })
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.policy {
            UndefinedPolicy::Record => {
                self.sink.record(&self.name);
                Ok(())
            }
            UndefinedPolicy::Ignore => f.write_str(&self.sanitized_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(template: &str, name: &str, policy: UndefinedPolicy) -> (String, BTreeSet<String>) {
        let mut env = Environment::new();
        register_missing_checks(&mut env);
        let sink = UndefinedSink::new();
        let ctx = Value::from_iter([(name, UndefinedPlaceholder::value(name, policy, sink.clone()))]);
        let out = env.render_str(template, ctx).unwrap();
        (out, sink.names())
    }

    #[test]
    fn record_renders_empty_and_remembers() {
        let (out, names) = render("SELECT {{ foo }}", "foo", UndefinedPolicy::Record);
        assert_eq!(out, "SELECT ");
        assert_eq!(names, BTreeSet::from(["foo".to_string()]));
    }

    #[test]
    fn record_attribute_chain() {
        let (out, names) = render("{{ foo.bar.baz }}", "foo", UndefinedPolicy::Record);
        assert_eq!(out, "");
        assert!(names.contains("foo"));
        assert!(names.contains("foo.bar"));
        assert!(names.contains("foo.bar.baz"));
    }

    #[test]
    fn record_call_result() {
        let (out, names) = render("{{ foo(1, 2) }}", "foo", UndefinedPolicy::Record);
        assert_eq!(out, "");
        assert!(names.contains("foo"));
        assert!(names.contains("foo()"));
    }

    #[test]
    fn record_unused_name_is_not_recorded() {
        let (out, names) = render("SELECT 1", "foo", UndefinedPolicy::Record);
        assert_eq!(out, "SELECT 1");
        assert!(names.is_empty());
    }

    #[test]
    fn ignore_renders_sanitized_name() {
        let (out, names) = render("SELECT {{ foo }}, {{ foo.bar }}", "foo", UndefinedPolicy::Ignore);
        assert_eq!(out, "SELECT foo, foo_bar");
        assert!(names.is_empty());
    }

    #[test]
    fn ignore_call_and_method_keep_rendering() {
        let (out, _) = render("{{ foo() }} {{ foo.upper() }}", "foo", UndefinedPolicy::Ignore);
        assert_eq!(out, "foo foo_upper");
    }

    #[test]
    fn ignore_is_truthy_and_iterable() {
        let (out, _) = render(
            "{% if foo %}yes{% endif %}{% for x in foo %}[{{ x }}]{% endfor %}",
            "foo",
            UndefinedPolicy::Ignore,
        );
        assert_eq!(out, "yes[foo]");
    }

    #[test]
    fn default_filter_replaces_placeholder() {
        for policy in [UndefinedPolicy::Ignore, UndefinedPolicy::Record] {
            let (out, names) = render("{{ foo | default('dflt') }} {{ foo | d }}.", "foo", policy);
            assert_eq!(out, "dflt .");
            assert!(names.is_empty());
        }
    }

    #[test]
    fn default_filter_keeps_defined_values() {
        let (out, _) = render("{{ 'x' | default('dflt') }}{{ bar | default('b') }}", "foo", UndefinedPolicy::Ignore);
        assert_eq!(out, "xb");
    }

    #[test]
    fn placeholder_is_not_defined() {
        let (out, _) = render(
            "{{ foo is defined }} {{ foo is undefined }} {{ bar is defined }}",
            "foo",
            UndefinedPolicy::Ignore,
        );
        assert_eq!(out, "false true false");
    }

    #[test]
    fn sink_is_shared_between_clones() {
        let sink = UndefinedSink::new();
        let clone = sink.clone();
        clone.record("a");
        assert!(!sink.is_empty());
        assert_eq!(sink.names().len(), 1);
    }
}
