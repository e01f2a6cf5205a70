//! Raw tokenization of template source
//!
//! Splits the source into literal text, comments, `{{ expression }}` tags and
//! `{% statement %}` tags. The tokens tile the source exactly. Whitespace
//! removed by a `-` modifier (`{%- ... -%}`) becomes its own literal token
//! marked as trimmed, because it never reaches the output.

use regex::Regex;
use sqltemplar_core::{RawFileSlice, RawSliceKind};
use std::ops::Range;
use std::sync::OnceLock;

/// Statements that open a block
const BLOCK_START_KEYWORDS: &[&str] = &[
    "if", "for", "macro", "call", "filter", "with", "block", "autoescape", "raw",
];

/// Delimiter family of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Expression,
    Statement,
    Comment,
}

impl TagKind {
    pub fn open(self) -> &'static str {
        match self {
            Self::Expression => "{{",
            Self::Statement => "{%",
            Self::Comment => "{#",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Self::Expression => "}}",
            Self::Statement => "%}",
            Self::Comment => "#}",
        }
    }

    fn from_opening(byte: u8) -> Option<Self> {
        match byte {
            b'{' => Some(Self::Expression),
            b'%' => Some(Self::Statement),
            b'#' => Some(Self::Comment),
            _ => None,
        }
    }
}

/// A tag as written in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub kind: TagKind,

    /// Body between the delimiters, modifiers excluded
    pub inner: Range<usize>,

    /// Whitespace-control modifier after the opening delimiter (`-` or `+`)
    pub left_modifier: Option<char>,

    /// Whitespace-control modifier before the closing delimiter
    pub right_modifier: Option<char>,

    /// First word of a statement body (`if`, `endfor`, `set`, ...)
    pub keyword: String,
}

impl Tag {
    pub fn trims_before(&self) -> bool {
        self.left_modifier == Some('-')
    }

    pub fn trims_after(&self) -> bool {
        self.right_modifier == Some('-')
    }

    /// The tag rewritten without its whitespace-control modifiers
    pub fn without_modifiers(&self, source: &str) -> String {
        format!("{}{}{}", self.kind.open(), &source[self.inner.clone()], self.kind.close())
    }

    /// The tag with only its opening modifier removed
    pub fn without_left_modifier(&self, source: &str) -> String {
        let right = self.right_modifier.map(String::from).unwrap_or_default();
        format!("{}{}{right}{}", self.kind.open(), &source[self.inner.clone()], self.kind.close())
    }

    /// The tag with only its closing modifier removed
    pub fn without_right_modifier(&self, source: &str) -> String {
        let left = self.left_modifier.map(String::from).unwrap_or_default();
        format!("{}{left}{}{}", self.kind.open(), &source[self.inner.clone()], self.kind.close())
    }
}

/// One span of the raw source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    pub span: Range<usize>,
    pub kind: RawSliceKind,
    pub tag: Option<Tag>,

    /// Whitespace removed by an adjacent `-` modifier
    pub trimmed: bool,

    pub block_idx: usize,
}

impl RawToken {
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.span.clone()]
    }

    /// Keyword of a statement tag
    pub fn keyword(&self) -> Option<&str> {
        self.tag
            .as_ref()
            .filter(|tag| tag.kind == TagKind::Statement)
            .map(|tag| tag.keyword.as_str())
    }

    pub fn to_raw_slice(&self, source: &str) -> RawFileSlice {
        RawFileSlice::new(self.text(source), self.kind, self.span.start, self.block_idx)
    }
}

enum Piece {
    Text(Range<usize>),
    Tag(Range<usize>, Tag),
}

/// Tokenize `source`
pub fn lex(source: &str) -> Vec<RawToken> {
    let pieces = scan(source);
    let mut tokens = Vec::with_capacity(pieces.len());

    for (i, piece) in pieces.iter().enumerate() {
        match piece {
            Piece::Tag(span, tag) => tokens.push(RawToken {
                span: span.clone(),
                kind: classify(tag, source),
                tag: Some(tag.clone()),
                trimmed: false,
                block_idx: 0,
            }),
            Piece::Text(range) => {
                let strip_left = i > 0 && matches!(&pieces[i - 1], Piece::Tag(_, t) if t.trims_after());
                let strip_right = matches!(pieces.get(i + 1), Some(Piece::Tag(_, t)) if t.trims_before());
                push_text(&mut tokens, source, range.clone(), strip_left, strip_right);
            }
        }
    }

    let mut block_idx = 0;
    for token in &mut tokens {
        token.block_idx = block_idx;
        if matches!(
            token.kind,
            RawSliceKind::BlockStart | RawSliceKind::BlockMid | RawSliceKind::BlockEnd
        ) {
            block_idx += 1;
        }
    }

    tokens
}

/// Raw slices for `tokens`
pub fn raw_slices(source: &str, tokens: &[RawToken]) -> Vec<RawFileSlice> {
    tokens.iter().map(|token| token.to_raw_slice(source)).collect()
}

fn push_text(tokens: &mut Vec<RawToken>, source: &str, range: Range<usize>, strip_left: bool, strip_right: bool) {
    let text = &source[range.clone()];
    let mut keep = range.clone();
    if strip_left {
        keep.start = range.end - text.trim_start().len();
    }
    if strip_right {
        keep.end = range.start + text.trim_end().len();
    }

    let literal = |span: Range<usize>, trimmed: bool| RawToken {
        span,
        kind: RawSliceKind::Literal,
        tag: None,
        trimmed,
        block_idx: 0,
    };

    if keep.start >= keep.end {
        tokens.push(literal(range, true));
        return;
    }
    if range.start < keep.start {
        tokens.push(literal(range.start..keep.start, true));
    }
    tokens.push(literal(keep.clone(), false));
    if keep.end < range.end {
        tokens.push(literal(keep.end..range.end, true));
    }
}

fn scan(source: &str) -> Vec<Piece> {
    let bytes = source.as_bytes();
    let mut pieces = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    while pos + 1 < bytes.len() {
        let kind = match (bytes[pos], TagKind::from_opening(bytes[pos + 1])) {
            (b'{', Some(kind)) => kind,
            _ => {
                pos += 1;
                continue;
            }
        };
        // An unterminated tag leaves the rest of the source as text
        let Some((tag, end)) = scan_tag(source, pos, kind) else {
            break;
        };

        if text_start < pos {
            pieces.push(Piece::Text(text_start..pos));
        }
        let opens_raw = kind == TagKind::Statement && tag.keyword == "raw";
        pieces.push(Piece::Tag(pos..end, tag));
        pos = end;
        text_start = end;

        if opens_raw {
            let Some(found) = endraw_pattern().find(&source[end..]) else {
                break;
            };
            let close_start = end + found.start();
            let Some((close, close_end)) = scan_tag(source, close_start, TagKind::Statement) else {
                break;
            };
            if end < close_start {
                pieces.push(Piece::Text(end..close_start));
            }
            pieces.push(Piece::Tag(close_start..close_end, close));
            pos = close_end;
            text_start = close_end;
        }
    }

    if text_start < bytes.len() {
        pieces.push(Piece::Text(text_start..bytes.len()));
    }
    pieces
}

fn scan_tag(source: &str, start: usize, kind: TagKind) -> Option<(Tag, usize)> {
    let bytes = source.as_bytes();
    let mut i = start + 2;
    let left_modifier = match bytes.get(i) {
        Some(&b) if b == b'-' || b == b'+' => {
            i += 1;
            Some(b as char)
        }
        _ => None,
    };
    let inner_start = i;

    let close = match kind {
        TagKind::Comment => inner_start + source[inner_start..].find("#}")?,
        TagKind::Expression | TagKind::Statement => find_close(bytes, inner_start, kind)?,
    };

    let (inner_end, right_modifier) = match bytes[close - 1] {
        b @ (b'-' | b'+') if close > inner_start => (close - 1, Some(b as char)),
        _ => (close, None),
    };

    let keyword = if kind == TagKind::Statement {
        source[inner_start..inner_end]
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect()
    } else {
        String::new()
    };

    Some((
        Tag {
            kind,
            inner: inner_start..inner_end,
            left_modifier,
            right_modifier,
            keyword,
        },
        close + 2,
    ))
}

/// Byte offset of the closing delimiter, skipping string literals and
/// (for expressions) balanced brackets
fn find_close(bytes: &[u8], from: usize, kind: TagKind) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        match (kind, b) {
            (TagKind::Statement, b'%') if next == Some(b'}') => return Some(i),
            (TagKind::Expression, b'}') if depth == 0 && next == Some(b'}') => return Some(i),
            (_, b'\'' | b'"') => quote = Some(b),
            (_, b'(' | b'[' | b'{') => depth += 1,
            (_, b')' | b']' | b'}') => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    None
}

fn classify(tag: &Tag, source: &str) -> RawSliceKind {
    match tag.kind {
        TagKind::Comment => RawSliceKind::Comment,
        TagKind::Expression => RawSliceKind::Templated,
        TagKind::Statement => match tag.keyword.as_str() {
            "set" if is_block_set(&source[tag.inner.clone()]) => RawSliceKind::BlockStart,
            "elif" | "else" => RawSliceKind::BlockMid,
            k if BLOCK_START_KEYWORDS.contains(&k) => RawSliceKind::BlockStart,
            k if k.starts_with("end") => RawSliceKind::BlockEnd,
            _ => RawSliceKind::Templated,
        },
    }
}

/// Whether a `set` statement body opens a block (`{% set x %}...{% endset %}`)
fn is_block_set(body: &str) -> bool {
    static INLINE_SET: OnceLock<Regex> = OnceLock::new();
    let inline = INLINE_SET.get_or_init(|| {
        Regex::new(r"^\s*set\s+\(?\s*[A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*\s*,?\s*\)?\s*=")
            .expect("valid regex")
    });
    !inline.is_match(body)
}

fn endraw_pattern() -> &'static Regex {
    static ENDRAW: OnceLock<Regex> = OnceLock::new();
    ENDRAW.get_or_init(|| Regex::new(r"\{%[-+]?\s*endraw\s*[-+]?%\}").expect("valid regex"))
}
