//! Position tracing between the raw template and its rendered output
//!
//! The raw source is tokenized (see [`crate::lexer`]) and an instrumented
//! copy of the template is rendered in which every raw token emits a marker
//! (`\0<index>\x01`) when it executes. The marker stream is an execution
//! trace: the text between two markers is the output of the first one's
//! token. Loop bodies emit their markers once per iteration, and tokens that
//! never execute emit nothing and are filled in as zero-length slices.
//!
//! Regions whose output cannot be split per token (`macro`, `call`,
//! `filter`, block `set`) are copied unchanged and attributed as a whole to
//! their opening tag.
//!
//! When the trace does not reproduce the plain render exactly, or the
//! template cannot be instrumented, the file gets a single coarse slice.

use crate::error::TemplaterError;
use crate::lexer::{self, RawToken, TagKind};
use sqltemplar_core::{RawFileSlice, RawSliceKind, TemplatedFileSlice, TemplatedSliceKind};

const MARKER_START: char = '\0';
const MARKER_END: char = '\x01';

/// Renders template source against a fixed live context
pub trait TemplateFactory {
    fn render_str(&self, source: &str) -> Result<String, TemplaterError>;
}

/// Output of slicing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceResult {
    pub raw_sliced: Vec<RawFileSlice>,
    pub sliced_file: Vec<TemplatedFileSlice>,
    pub templated_str: String,
}

/// Why a file falls back to a single coarse slice
#[derive(Debug, thiserror::Error)]
enum TraceFallback {
    #[error("template extends another template")]
    Extends,

    #[error("source contains the trace marker byte")]
    MarkerInSource,

    #[error("unbalanced block starting at raw slice {0}")]
    UnclosedBlock(usize),

    #[error("instrumented render failed: {0}")]
    Render(TemplaterError),

    #[error("malformed execution trace")]
    MalformedTrace,

    #[error("literal raw slice {0} was not reproduced verbatim")]
    LiteralMismatch(usize),

    #[error("traced output differs from the rendered output")]
    OutputMismatch,
}

/// Slice `raw` against its rendered output
///
/// Without a factory the whole file is one slice.
pub fn slice_file(raw: &str, rendered: &str, factory: Option<&dyn TemplateFactory>) -> SliceResult {
    let Some(factory) = factory else {
        return whole_file(raw, rendered);
    };

    let tokens = lexer::lex(raw);
    let raw_sliced = lexer::raw_slices(raw, &tokens);
    let tracer = JinjaTracer::new(raw, &tokens);

    let sliced_file = match tracer.trace(factory, rendered) {
        Ok(sliced_file) => sliced_file,
        Err(reason) => {
            tracing::warn!(%reason, "could not trace template, using a single slice");
            coarse_slices(raw, &raw_sliced, rendered)
        }
    };

    SliceResult {
        raw_sliced,
        sliced_file,
        templated_str: rendered.to_string(),
    }
}

fn whole_file(raw: &str, rendered: &str) -> SliceResult {
    if raw.is_empty() {
        return SliceResult {
            raw_sliced: Vec::new(),
            sliced_file: Vec::new(),
            templated_str: rendered.to_string(),
        };
    }

    let kind = if raw == rendered {
        TemplatedSliceKind::Literal
    } else {
        TemplatedSliceKind::Templated
    };
    SliceResult {
        raw_sliced: vec![RawFileSlice::new(raw, RawSliceKind::Literal, 0, 0)],
        sliced_file: vec![TemplatedFileSlice::new(kind, 0..raw.len(), 0..rendered.len(), vec![0])],
        templated_str: rendered.to_string(),
    }
}

fn coarse_slices(raw: &str, raw_sliced: &[RawFileSlice], rendered: &str) -> Vec<TemplatedFileSlice> {
    if raw_sliced.is_empty() {
        return Vec::new();
    }
    vec![TemplatedFileSlice::new(
        TemplatedSliceKind::Templated,
        0..raw.len(),
        0..rendered.len(),
        (0..raw_sliced.len()).collect(),
    )]
}

/// Where a token's marker goes relative to its text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Before,
    After,
}

struct JinjaTracer<'a> {
    source: &'a str,
    tokens: &'a [RawToken],
}

impl<'a> JinjaTracer<'a> {
    fn new(source: &'a str, tokens: &'a [RawToken]) -> Self {
        Self { source, tokens }
    }

    fn trace(&self, factory: &dyn TemplateFactory, rendered: &str) -> Result<Vec<TemplatedFileSlice>, TraceFallback> {
        let instrumented = self.instrument()?;
        let output = factory.render_str(&instrumented).map_err(TraceFallback::Render)?;
        let trace = parse_trace(&output, self.tokens.len())?;
        self.build_slices(&trace, rendered)
    }

    fn instrument(&self) -> Result<String, TraceFallback> {
        if self.source.contains(MARKER_START) {
            return Err(TraceFallback::MarkerInSource);
        }

        let source = self.source;
        let mut out = String::with_capacity(source.len() * 2);
        let mut i = 0;

        while i < self.tokens.len() {
            let token = &self.tokens[i];
            let Some(tag) = &token.tag else {
                if !token.trimmed {
                    push_marker(&mut out, i);
                    push_literal(&mut out, token.text(source));
                }
                i += 1;
                continue;
            };

            match tag.kind {
                TagKind::Comment => {}
                TagKind::Expression => {
                    push_marker(&mut out, i);
                    out.push_str(&tag.without_modifiers(source));
                }
                TagKind::Statement if tag.keyword == "extends" => return Err(TraceFallback::Extends),
                TagKind::Statement if is_opaque(token) => {
                    let close = self.matching_end(i)?;
                    let close_tag = self.tokens[close].tag.as_ref().ok_or(TraceFallback::UnclosedBlock(i))?;
                    push_marker(&mut out, i);
                    out.push_str(&tag.without_left_modifier(source));
                    out.push_str(&source[token.span.end..self.tokens[close].span.start]);
                    out.push_str(&close_tag.without_right_modifier(source));
                    i = close + 1;
                    continue;
                }
                TagKind::Statement if tag.keyword == "raw" => {
                    i = self.instrument_raw(i, &mut out)?;
                    continue;
                }
                TagKind::Statement => match placement(token) {
                    Placement::Before => {
                        push_marker(&mut out, i);
                        out.push_str(&tag.without_modifiers(source));
                    }
                    Placement::After => {
                        out.push_str(&tag.without_modifiers(source));
                        push_marker(&mut out, i);
                    }
                },
            }
            i += 1;
        }

        Ok(out)
    }

    /// Markers inside a raw block are plain text, so the content can carry
    /// its own marker; returns the index after `endraw`
    fn instrument_raw(&self, start: usize, out: &mut String) -> Result<usize, TraceFallback> {
        let source = self.source;
        let close = self.matching_end(start)?;
        let open_tag = self.tokens[start].tag.as_ref().ok_or(TraceFallback::UnclosedBlock(start))?;
        let close_tag = self.tokens[close].tag.as_ref().ok_or(TraceFallback::UnclosedBlock(start))?;

        out.push_str(&open_tag.without_modifiers(source));
        for idx in start + 1..close {
            let token = &self.tokens[idx];
            if !token.trimmed {
                push_marker(out, idx);
                out.push_str(token.text(source));
            }
        }
        out.push_str(&close_tag.without_modifiers(source));
        push_marker(out, close);
        Ok(close + 1)
    }

    /// Index of the tag closing the block opened at `start`
    fn matching_end(&self, start: usize) -> Result<usize, TraceFallback> {
        let mut depth = 0usize;
        for (idx, token) in self.tokens.iter().enumerate().skip(start + 1) {
            match token.kind {
                RawSliceKind::BlockStart => depth += 1,
                RawSliceKind::BlockEnd if depth == 0 => return Ok(idx),
                RawSliceKind::BlockEnd => depth -= 1,
                _ => {}
            }
        }
        Err(TraceFallback::UnclosedBlock(start))
    }

    fn build_slices(&self, trace: &[(usize, &str)], rendered: &str) -> Result<Vec<TemplatedFileSlice>, TraceFallback> {
        let mut slices = Vec::with_capacity(trace.len() + self.tokens.len());
        let mut seen = vec![false; self.tokens.len()];
        let mut pos = 0;
        let mut next_raw = 0;

        for &(idx, content) in trace {
            // Jumping forward skips tokens that did not execute; jumping
            // backward is a new loop iteration.
            if idx > next_raw {
                self.push_skipped(&mut slices, next_raw..idx, pos);
            }

            let token = &self.tokens[idx];
            if token.tag.is_none() && content != token.text(self.source) {
                return Err(TraceFallback::LiteralMismatch(idx));
            }
            if rendered.get(pos..pos + content.len()) != Some(content) {
                return Err(TraceFallback::OutputMismatch);
            }

            let kind = slice_kind(token, content, seen[idx]);
            slices.push(TemplatedFileSlice::new(
                kind,
                token.span.clone(),
                pos..pos + content.len(),
                vec![idx],
            ));
            pos += content.len();
            seen[idx] = true;
            next_raw = idx + 1;

            if is_opaque(token) {
                let close = self.matching_end(idx)?;
                self.push_skipped(&mut slices, idx + 1..close + 1, pos);
                next_raw = close + 1;
            }
        }

        self.push_skipped(&mut slices, next_raw..self.tokens.len(), pos);

        if pos != rendered.len() {
            return Err(TraceFallback::OutputMismatch);
        }
        Ok(slices)
    }

    fn push_skipped(&self, slices: &mut Vec<TemplatedFileSlice>, indices: std::ops::Range<usize>, pos: usize) {
        for idx in indices {
            slices.push(TemplatedFileSlice::new(
                TemplatedSliceKind::Block,
                self.tokens[idx].span.clone(),
                pos..pos,
                vec![idx],
            ));
        }
    }
}

fn is_opaque(token: &RawToken) -> bool {
    token.kind == RawSliceKind::BlockStart
        && matches!(token.keyword(), Some("macro" | "call" | "filter" | "set"))
}

/// Block tags whose marker would otherwise fire before execution enters them
/// mark after themselves; `endfor` marks before itself so it fires on every
/// iteration.
fn placement(token: &RawToken) -> Placement {
    match (token.kind, token.keyword()) {
        (RawSliceKind::BlockMid, _) => Placement::After,
        (RawSliceKind::BlockEnd, Some("endfor")) => Placement::Before,
        (RawSliceKind::BlockEnd, _) => Placement::After,
        _ => Placement::Before,
    }
}

fn slice_kind(token: &RawToken, content: &str, seen: bool) -> TemplatedSliceKind {
    if seen && !content.is_empty() {
        return TemplatedSliceKind::Repeated;
    }
    match token.kind {
        RawSliceKind::Literal => TemplatedSliceKind::Literal,
        _ if content.is_empty() => TemplatedSliceKind::Block,
        _ => TemplatedSliceKind::Templated,
    }
}

fn push_marker(out: &mut String, idx: usize) {
    out.push(MARKER_START);
    out.push_str(&idx.to_string());
    out.push(MARKER_END);
}

/// A trailing `{` could join the next tag's delimiter, so it is emitted
/// through an expression instead
fn push_literal(out: &mut String, text: &str) {
    match text.strip_suffix('{') {
        Some(head) => {
            out.push_str(head);
            out.push_str("{{ \"{\" }}");
        }
        None => out.push_str(text),
    }
}

fn parse_trace(output: &str, token_count: usize) -> Result<Vec<(usize, &str)>, TraceFallback> {
    let mut chunks = output.split(MARKER_START);
    if chunks.next().is_some_and(|head| !head.is_empty()) {
        return Err(TraceFallback::MalformedTrace);
    }

    chunks
        .map(|chunk| {
            let (id, content) = chunk.split_once(MARKER_END).ok_or(TraceFallback::MalformedTrace)?;
            let idx: usize = id.parse().map_err(|_| TraceFallback::MalformedTrace)?;
            if idx >= token_count {
                return Err(TraceFallback::MalformedTrace);
            }
            Ok((idx, content))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LiveContext;
    use crate::renderer::BoundTemplateFactory;
    use minijinja::{Environment, Value};
    use pretty_assertions::assert_eq;
    use sqltemplar_core::TemplatedFile;

    fn trace_with(source: &str, context: LiveContext) -> SliceResult {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        let rendered = env.render_str(source, context.to_value()).unwrap();
        let factory = BoundTemplateFactory::new(&env, "test.sql", &context);
        let result = slice_file(source, &rendered, Some(&factory));

        // Every result must form a valid templated file
        TemplatedFile::new(
            source,
            "test.sql",
            result.templated_str.clone(),
            result.sliced_file.clone(),
            result.raw_sliced.clone(),
        )
        .unwrap();
        result
    }

    fn trace(source: &str) -> SliceResult {
        trace_with(source, LiveContext::new())
    }

    fn kinds(result: &SliceResult) -> Vec<(TemplatedSliceKind, Vec<usize>)> {
        result
            .sliced_file
            .iter()
            .map(|s| (s.slice_type, s.raw_indices.clone()))
            .collect()
    }

    struct GarbageFactory;

    impl TemplateFactory for GarbageFactory {
        fn render_str(&self, _source: &str) -> Result<String, TemplaterError> {
            Ok("\0 0\x01nonsense".to_string())
        }
    }

    #[test]
    fn test_plain_literal() {
        let result = trace("SELECT 1\n");
        assert_eq!(kinds(&result), vec![(TemplatedSliceKind::Literal, vec![0])]);
        assert_eq!(result.templated_str, "SELECT 1\n");
    }

    #[test]
    fn test_expression_between_literals() {
        let mut context = LiveContext::new();
        context.insert("col", Value::from("amount"));
        let result = trace_with("SELECT {{ col }} FROM t", context);

        use TemplatedSliceKind::*;
        assert_eq!(kinds(&result), vec![(Literal, vec![0]), (Templated, vec![1]), (Literal, vec![2])]);
        assert_eq!(result.sliced_file[1].templated_slice, 7..13);
        assert_eq!(result.sliced_file[1].source_slice, 7..16);
    }

    #[test]
    fn test_false_branch_is_zero_length_block() {
        let result = trace("a{% if false %}b{% endif %}c");
        use TemplatedSliceKind::*;
        assert_eq!(
            kinds(&result),
            vec![
                (Literal, vec![0]),
                (Block, vec![1]),
                (Block, vec![2]),
                (Block, vec![3]),
                (Literal, vec![4]),
            ]
        );
        assert!(result.sliced_file[2].is_zero_length());
    }

    #[test]
    fn test_else_branch() {
        let result = trace("{% if false %}x{% else %}y{% endif %}");
        assert_eq!(result.templated_str, "y");
        let y = result.sliced_file.iter().find(|s| !s.is_zero_length()).unwrap();
        assert_eq!(y.raw_indices, vec![3]);
        assert_eq!(y.slice_type, TemplatedSliceKind::Literal);
    }

    #[test]
    fn test_loop_unrolls_per_iteration() {
        let result = trace("{% for i in [1, 2, 3] %}{{ i }}{% endfor %}");
        let body: Vec<_> = result.sliced_file.iter().filter(|s| s.raw_indices == vec![1]).collect();

        assert_eq!(body.len(), 3);
        assert_eq!(body[0].slice_type, TemplatedSliceKind::Templated);
        assert_eq!(body[1].slice_type, TemplatedSliceKind::Repeated);
        assert_eq!(body[2].slice_type, TemplatedSliceKind::Repeated);
        assert_eq!(
            body.iter().map(|s| s.templated_slice.clone()).collect::<Vec<_>>(),
            vec![0..1, 1..2, 2..3]
        );
    }

    #[test]
    fn test_zero_iteration_loop() {
        let result = trace("{% for i in [] %}x{% endfor %}y");
        use TemplatedSliceKind::*;
        assert_eq!(
            kinds(&result),
            vec![(Block, vec![0]), (Block, vec![1]), (Block, vec![2]), (Literal, vec![3])]
        );
    }

    #[test]
    fn test_whitespace_control() {
        let result = trace("a\n{%- if true -%}\nb\n{%- endif %}");
        assert_eq!(result.templated_str, "ab");
        let emitted: Vec<_> = result
            .sliced_file
            .iter()
            .filter(|s| !s.is_zero_length())
            .map(|s| s.raw_indices[0])
            .collect();
        assert_eq!(emitted, vec![0, 4]);
        // the trimmed newlines are still covered
        let covered: Vec<usize> = result.sliced_file.iter().map(|s| s.raw_indices[0]).collect();
        assert_eq!(covered, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_macro_is_opaque() {
        let result = trace("{% macro m() %}x{% endmacro %}{{ m() }}");
        use TemplatedSliceKind::*;
        assert_eq!(
            kinds(&result),
            vec![(Block, vec![0]), (Block, vec![1]), (Block, vec![2]), (Templated, vec![3])]
        );
    }

    #[test]
    fn test_filter_block_attributed_to_opening_tag() {
        let result = trace("a{% filter upper %}b{% endfilter %}");
        assert_eq!(result.templated_str, "aB");
        assert_eq!(result.sliced_file[1].slice_type, TemplatedSliceKind::Templated);
        assert_eq!(result.sliced_file[1].raw_indices, vec![1]);
        assert_eq!(result.sliced_file[1].templated_slice, 1..2);
    }

    #[test]
    fn test_raw_block() {
        let result = trace("{% raw %}{{ x }}{% endraw %}!");
        assert_eq!(result.templated_str, "{{ x }}!");
        use TemplatedSliceKind::*;
        assert_eq!(
            kinds(&result),
            vec![(Block, vec![0]), (Literal, vec![1]), (Block, vec![2]), (Literal, vec![3])]
        );
    }

    #[test]
    fn test_literal_ending_with_brace() {
        let result = trace("{% if true %}a{ {%- endif %}");
        assert_eq!(result.templated_str, "a{");
        let literal = result.sliced_file.iter().find(|s| s.slice_type == TemplatedSliceKind::Literal).unwrap();
        assert_eq!(literal.templated_slice, 0..2);
    }

    #[test]
    fn test_comment_is_block() {
        let result = trace("a{# hidden #}b");
        use TemplatedSliceKind::*;
        assert_eq!(kinds(&result), vec![(Literal, vec![0]), (Block, vec![1]), (Literal, vec![2])]);
    }

    #[test]
    fn test_marker_byte_in_source_falls_back() {
        let result = trace("a\0b {{ 1 }}");
        assert_eq!(result.sliced_file.len(), 1);
        assert_eq!(result.sliced_file[0].raw_indices, vec![0, 1]);
    }

    #[test]
    fn test_mismatched_trace_falls_back() {
        let source = "SELECT {{ 1 }}";
        let result = slice_file(source, "SELECT 1", Some(&GarbageFactory));
        assert_eq!(result.sliced_file.len(), 1);
        assert_eq!(result.sliced_file[0].slice_type, TemplatedSliceKind::Templated);
        assert_eq!(result.sliced_file[0].templated_slice, 0..8);
        assert_eq!(result.sliced_file[0].raw_indices, vec![0, 1]);
    }

    #[test]
    fn test_without_factory() {
        let result = slice_file("SELECT {{ 1 }}", "SELECT 1", None);
        assert_eq!(result.raw_sliced.len(), 1);
        assert_eq!(kinds(&result), vec![(TemplatedSliceKind::Templated, vec![0])]);

        let same = slice_file("SELECT 1", "SELECT 1", None);
        assert_eq!(kinds(&same), vec![(TemplatedSliceKind::Literal, vec![0])]);
    }

    #[test]
    fn test_empty_source() {
        let result = trace("");
        assert!(result.raw_sliced.is_empty());
        assert!(result.sliced_file.is_empty());
    }
}
