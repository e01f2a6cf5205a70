//! Sandboxed rendering
//!
//! Templates render in a minijinja environment that only sees what the live
//! context registers. Names the template uses but the context does not
//! define are seeded with placeholders (see [`crate::undefined`]) before
//! rendering starts.

use crate::analyzer;
use crate::context::LiveContext;
use crate::error::TemplaterError;
use crate::tracer::TemplateFactory;
use crate::undefined::{register_missing_checks, UndefinedPlaceholder, UndefinedPolicy, UndefinedSink};
use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior, Value};
use sqltemplar_core::Config;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Suffix of names treated as table references when undefined
pub const TABLE_SUFFIX: &str = "_tbl";

/// Literal substituted for undefined table references
pub const TABLE_PLACEHOLDER: &str = "some_tbl";

/// Build the environment used for one file
///
/// `include`/`import` targets are looked up in the macro paths. When the
/// config ignores templating errors, a missing target renders as its file
/// stem instead of failing.
pub fn build_environment(config: &Config) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    register_missing_checks(&mut env);

    let search_paths: Vec<PathBuf> = config
        .jinja()
        .macro_paths()
        .into_iter()
        .map(|path| if path.is_file() { path.parent().map(Path::to_path_buf).unwrap_or_default() } else { path })
        .collect();
    let serve_missing = config.ignore_templating();
    env.set_loader(move |name: &str| load_template(&search_paths, name, serve_missing));

    env
}

fn load_template(search_paths: &[PathBuf], name: &str, serve_missing: bool) -> Result<Option<String>, Error> {
    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if !escapes {
        for dir in search_paths {
            let candidate = dir.join(relative);
            if candidate.is_file() {
                return fs::read_to_string(&candidate).map(Some).map_err(|e| {
                    Error::new(ErrorKind::InvalidOperation, format!("could not read template {name}"))
                        .with_source(e)
                });
            }
        }
    }

    if serve_missing {
        tracing::debug!(name, "providing dummy contents for missing template");
        let stem = relative.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        return Ok(Some(stem.to_string()));
    }
    Ok(None)
}

/// Result of rendering one template
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub rendered: String,

    /// Names (dotted for attribute chains) resolved as undefined
    pub undefined: BTreeSet<String>,

    /// The context the template was rendered with, placeholders included
    pub context: LiveContext,
}

/// Renders templates against a live context with undefined tracking
pub struct SandboxedRenderer<'env> {
    env: &'env Environment<'static>,
    policy: UndefinedPolicy,
}

impl<'env> SandboxedRenderer<'env> {
    pub fn new(env: &'env Environment<'static>, policy: UndefinedPolicy) -> Self {
        Self { env, policy }
    }

    /// Copy of `context` with every missing candidate seeded
    pub fn prepare_context(
        &self,
        context: &LiveContext,
        candidates: &BTreeSet<String>,
        sink: &UndefinedSink,
    ) -> LiveContext {
        let mut prepared = context.clone();
        for name in candidates {
            if prepared.contains(name) {
                continue;
            }
            let value = if name.ends_with(TABLE_SUFFIX) {
                Value::from(TABLE_PLACEHOLDER)
            } else {
                UndefinedPlaceholder::value(name.as_str(), self.policy, sink.clone())
            };
            prepared.insert(name.clone(), value);
        }
        prepared
    }

    /// Render `source` registered under `name`
    pub fn render(&self, name: &str, source: &str, context: &LiveContext) -> Result<RenderOutput, TemplaterError> {
        let template = self
            .env
            .template_from_named_str(name, source)
            .map_err(|e| TemplaterError::from_syntax_error(&e, "Failure to parse jinja template", None, Some(source)))?;

        let candidates = analyzer::undeclared_names(&template);
        let sink = UndefinedSink::new();
        let prepared = self.prepare_context(context, &candidates, &sink);

        let rendered = template.render(prepared.to_value()).map_err(|e| {
            if e.kind() == ErrorKind::SyntaxError {
                TemplaterError::from_syntax_error(&e, "Failure to parse jinja template", None, None)
            } else {
                tracing::info!(name, error = %e, "unrecoverable render failure");
                TemplaterError::render(e.to_string())
            }
        })?;

        Ok(RenderOutput {
            rendered,
            undefined: sink.names(),
            context: prepared,
        })
    }
}

/// Template factory bound to one environment and live context
pub struct BoundTemplateFactory<'env> {
    env: &'env Environment<'static>,
    name: String,
    context: Value,
}

impl<'env> BoundTemplateFactory<'env> {
    pub fn new(env: &'env Environment<'static>, name: impl Into<String>, context: &LiveContext) -> Self {
        Self {
            env,
            name: name.into(),
            context: context.to_value(),
        }
    }
}

impl TemplateFactory for BoundTemplateFactory<'_> {
    fn render_str(&self, source: &str) -> Result<String, TemplaterError> {
        let template = self
            .env
            .template_from_named_str(&self.name, source)
            .map_err(|e| TemplaterError::from_syntax_error(&e, "Failure to parse traced template", None, Some(source)))?;
        template.render(&self.context).map_err(|e| TemplaterError::render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn render_with(config: &Config, policy: UndefinedPolicy, source: &str) -> Result<RenderOutput, TemplaterError> {
        let env = build_environment(config);
        SandboxedRenderer::new(&env, policy).render("test.sql", source, &LiveContext::new())
    }

    #[test]
    fn test_record_policy_tracks_names() {
        let out = render_with(&Config::default(), UndefinedPolicy::Record, "SELECT {{ foo }}").unwrap();
        assert_eq!(out.rendered, "SELECT ");
        assert_eq!(out.undefined, BTreeSet::from(["foo".to_string()]));
    }

    #[test]
    fn test_ignore_policy_renders_names() {
        let out = render_with(&Config::default(), UndefinedPolicy::Ignore, "SELECT {{ foo }}").unwrap();
        assert_eq!(out.rendered, "SELECT foo");
        assert!(out.undefined.is_empty());
    }

    #[test]
    fn test_table_suffix_heuristic() {
        let out = render_with(&Config::default(), UndefinedPolicy::Record, "SELECT * FROM {{ my_tbl }}").unwrap();
        assert_eq!(out.rendered, "SELECT * FROM some_tbl");
        assert!(out.undefined.is_empty());
    }

    #[test]
    fn test_defined_names_are_not_seeded() {
        let env = build_environment(&Config::default());
        let mut context = LiveContext::new();
        context.insert("foo", Value::from("bar"));
        let out = SandboxedRenderer::new(&env, UndefinedPolicy::Record)
            .render("t", "{{ foo }}", &context)
            .unwrap();
        assert_eq!(out.rendered, "bar");
        assert!(out.undefined.is_empty());
    }

    #[test]
    fn test_builtin_globals_survive_seeding() {
        let out = render_with(
            &Config::default(),
            UndefinedPolicy::Record,
            "{% for i in range(3) %}{{ i }}{% endfor %}",
        )
        .unwrap();
        assert_eq!(out.rendered, "012");
    }

    #[test]
    fn test_trailing_newline_kept() {
        let out = render_with(&Config::default(), UndefinedPolicy::Record, "SELECT 1\n").unwrap();
        assert_eq!(out.rendered, "SELECT 1\n");
    }

    #[test]
    fn test_syntax_error_has_line() {
        let err = render_with(&Config::default(), UndefinedPolicy::Record, "SELECT\n{% if %}").unwrap_err();
        assert!(matches!(err, TemplaterError::TemplateSyntax { line: 2, .. }));
    }

    #[test]
    fn test_include_from_macro_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("part.sql"), "FROM t").unwrap();
        let mut config = Config::default();
        config.templater.jinja.load_macros_from_path = Some(dir.path().display().to_string());

        let out = render_with(&config, UndefinedPolicy::Record, "SELECT 1 {% include 'part.sql' %}").unwrap();
        assert_eq!(out.rendered, "SELECT 1 FROM t");
    }

    #[test]
    fn test_missing_include_served_as_stem_when_ignoring() {
        let mut config = Config::default();
        config.ignore = vec!["templating".to_string()];
        let out = render_with(&config, UndefinedPolicy::Ignore, "{% include 'macros/missing.sql' %}").unwrap();
        assert_eq!(out.rendered, "missing");
    }

    #[test]
    fn test_missing_include_fails_by_default() {
        let err = render_with(&Config::default(), UndefinedPolicy::Record, "{% include 'missing.sql' %}").unwrap_err();
        assert!(matches!(err, TemplaterError::Render { .. }));
    }

    #[test]
    fn test_loader_refuses_parent_paths() {
        let dir = TempDir::new().unwrap();
        let found = load_template(&[dir.path().to_path_buf()], "../etc/passwd", false).unwrap();
        assert!(found.is_none());
    }
}
