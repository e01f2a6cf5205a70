//! The Jinja templater
//!
//! [`JinjaTemplater::process`] takes one raw file through the whole
//! pipeline: size check, environment and context construction, sandboxed
//! rendering, tracing, and location of undefined variables.

use crate::analyzer;
use crate::context::{ContextBuilder, LiveContext};
use crate::error::TemplaterError;
use crate::renderer::{build_environment, BoundTemplateFactory, SandboxedRenderer};
use crate::tracer::{slice_file, TemplateFactory};
use crate::undefined::UndefinedPolicy;
use minijinja::Environment;
use sqltemplar_core::{Config, Diagnostic, TemplatedFile};
use std::collections::BTreeSet;

/// Result of processing one file
///
/// A missing `templated_file` together with at least one error means the
/// file could not be templated at all.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub templated_file: Option<TemplatedFile>,
    pub errors: Vec<TemplaterError>,
}

impl ProcessResult {
    fn failure(error: TemplaterError) -> Self {
        Self {
            templated_file: None,
            errors: vec![error],
        }
    }

    /// Whether a rendered file was produced
    pub fn is_rendered(&self) -> bool {
        self.templated_file.as_ref().is_some_and(TemplatedFile::is_rendered)
    }

    /// Errors converted to diagnostics for `fname`
    pub fn diagnostics(&self, fname: &str) -> Vec<Diagnostic> {
        self.errors.iter().map(|e| e.to_diagnostic(fname)).collect()
    }
}

/// Templater for Jinja-templated SQL
///
/// Stateless: every call to [`process`](Self::process) builds its own
/// environment, context and undefined-name sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct JinjaTemplater;

impl JinjaTemplater {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &'static str {
        "jinja"
    }

    /// Environment and live context for `fname`
    pub fn template_builder(
        &self,
        fname: &str,
        config: &Config,
    ) -> Result<(Environment<'static>, LiveContext), TemplaterError> {
        let mut env = build_environment(config);
        let context = ContextBuilder::new(config).build(fname, &mut env)?;
        Ok((env, context))
    }

    /// Render and trace `in_str`
    pub fn process(&self, in_str: &str, fname: &str, config: &Config) -> ProcessResult {
        let limit = config.large_file_skip_byte_limit;
        if limit > 0 && in_str.len() > limit {
            tracing::warn!(fname, size = in_str.len(), limit, "skipping large file");
            return ProcessResult::failure(TemplaterError::FileTooLarge {
                size: in_str.len(),
                limit,
            });
        }

        let (env, context) = match self.template_builder(fname, config) {
            Ok(built) => built,
            Err(err) => {
                tracing::info!(fname, error = %err, "could not build template context");
                return ProcessResult::failure(err);
            }
        };

        let policy = if config.ignore_templating() {
            UndefinedPolicy::Ignore
        } else {
            UndefinedPolicy::Record
        };
        let renderer = SandboxedRenderer::new(&env, policy);

        tracing::debug!(fname, ?policy, "rendering template");
        let output = match renderer.render(fname, in_str, &context) {
            Ok(output) => output,
            Err(err @ TemplaterError::TemplateSyntax { .. }) => {
                tracing::debug!(fname, error = %err, "template syntax error");
                return ProcessResult {
                    templated_file: Some(TemplatedFile::from_source(in_str, fname)),
                    errors: vec![err],
                };
            }
            Err(err) => return ProcessResult::failure(err),
        };

        let factory = BoundTemplateFactory::new(&env, fname, &output.context);
        let templated_file = match build_templated_file(in_str, fname, &output.rendered, Some(&factory)) {
            Ok(file) => file,
            Err(err) => return ProcessResult::failure(err),
        };

        let errors = match policy {
            UndefinedPolicy::Record if !output.undefined.is_empty() => locate_undefined(in_str, &output.undefined),
            _ => Vec::new(),
        };

        tracing::debug!(fname, slices = templated_file.sliced_file.len(), errors = errors.len(), "templated file");
        ProcessResult {
            templated_file: Some(templated_file),
            errors,
        }
    }
}

fn build_templated_file(
    in_str: &str,
    fname: &str,
    rendered: &str,
    factory: Option<&BoundTemplateFactory<'_>>,
) -> Result<TemplatedFile, TemplaterError> {
    let sliced = slice_file(in_str, rendered, factory.map(|f| f as &dyn TemplateFactory));
    match TemplatedFile::new(in_str, fname, sliced.templated_str, sliced.sliced_file, sliced.raw_sliced) {
        Ok(file) => Ok(file),
        Err(err) if factory.is_some() => {
            tracing::warn!(fname, error = %err, "inconsistent slices, using a single slice");
            build_templated_file(in_str, fname, rendered, None)
        }
        Err(err) => Err(TemplaterError::render(err.to_string())),
    }
}

fn locate_undefined(source: &str, undefined: &BTreeSet<String>) -> Vec<TemplaterError> {
    match analyzer::parse(source) {
        Ok(tree) => analyzer::locate(&tree, undefined, source),
        Err(err) => {
            tracing::debug!(error = %err, "could not parse template to locate undefined names");
            Vec::new()
        }
    }
}
