//! Source Files - Kinds, Reading and Scanning
//!
//! Structured-config text is scanned line by line into text, inline
//! expressions and directives. Key/value text is scanned into sections,
//! entries and directives. Nothing is evaluated here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use logos::{Lexer, Logos};
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Script,
    StructuredConfig,
    KeyValue,
}

impl FileKind {
    /// `.lua` is a script, `.reapertheme`/`.ini` key/value text, anything else
    /// structured config.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("lua") => Self::Script,
            Some("reapertheme") | Some("ini") => Self::KeyValue,
            _ => Self::StructuredConfig,
        }
    }
}

/// Filesystem access used by the resolver and the package emitter
pub trait SourceReader {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskReader;

impl SourceReader for DiskReader {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: FileKind,
    pub text: String,
}

impl SourceFile {
    pub fn load<R: SourceReader + ?Sized>(
        reader: &R,
        path: &Path,
        referenced_from: Option<&Origin>,
    ) -> Result<Self, CompileError> {
        let bytes = reader
            .read(path)
            .map_err(|err| CompileError::read(path, err, referenced_from))?;
        let text = String::from_utf8(bytes).map_err(|err| {
            CompileError::parse(Origin::file(path), format!("not valid UTF-8: {}", err))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            kind: FileKind::from_path(path),
            text,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub prefix: Option<String>,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Include(String),
    Resource(ResourceSpec),
    /// Any other `#name` line, kept verbatim without leading blanks
    Unknown { name: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveLine {
    pub directive: Directive,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineExpr {
    pub code: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Expression(InlineExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Inline(Inline),
    Directive(DirectiveLine),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValueLine {
    Section { name: String, line: usize },
    Entry {
        key: String,
        value: Vec<Inline>,
        line: usize,
    },
    Directive(DirectiveLine),
}

#[derive(Logos, Debug, PartialEq)]
enum InlineToken<'s> {
    #[token("#{", expression_body)]
    Expression(&'s str),

    #[token(";")]
    Semicolon,

    #[token("#")]
    Hash,

    #[regex(r"[^#;]+")]
    Text,
}

/// Consume up to the `}` closing the expression. Braces nest; quoted strings
/// are skipped. Expressions never span lines.
fn expression_body<'s>(lex: &mut Lexer<'s, InlineToken<'s>>) -> Option<&'s str> {
    let rest = lex.remainder();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in rest.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' => depth += 1,
            '}' if depth == 0 => {
                lex.bump(idx + 1);
                return Some(&rest[..idx]);
            }
            '}' => depth -= 1,
            '\n' => return None,
            _ => {}
        }
    }
    None
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum ArgToken {
    #[regex(r#""([^"\\]|\\.)*""#)]
    Str,

    #[token(":")]
    Colon,

    #[regex(r";[^\n]*", logos::skip)]
    Comment,
}

#[derive(Debug, PartialEq)]
enum Arg {
    Str(String),
    Colon,
}

fn column_of(line: &str, byte: usize) -> usize {
    line[..byte].chars().count() + 1
}

fn push_text(out: &mut Vec<Inline>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Inline::Text(last)) = out.last_mut() {
        last.push_str(text);
    } else {
        out.push(Inline::Text(text.to_string()));
    }
}

/// Split `text` into literal text and inline expressions. With `comments`,
/// everything from a `;` outside an expression is literal.
fn scan_inline(
    path: &Path,
    line: usize,
    column_offset: usize,
    text: &str,
    comments: bool,
) -> Result<Vec<Inline>, CompileError> {
    let mut out = Vec::new();
    let mut lexer = InlineToken::lexer(text);

    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let column = column_offset + column_of(text, span.start);
        match token {
            Ok(InlineToken::Expression(code)) => {
                let code = code.trim();
                if code.is_empty() {
                    return Err(CompileError::parse(
                        Origin::at(path, line, column),
                        "empty inline expression",
                    ));
                }
                out.push(Inline::Expression(InlineExpr {
                    code: code.to_string(),
                    line,
                    column,
                }));
            }
            Ok(InlineToken::Semicolon) if comments => {
                push_text(&mut out, &text[span.start..]);
                break;
            }
            Ok(_) => push_text(&mut out, lexer.slice()),
            Err(()) => {
                return Err(CompileError::parse(
                    Origin::at(path, line, column),
                    "unterminated inline expression, expected `}`",
                ))
            }
        }
    }

    Ok(out)
}

fn parse_arguments(args: &str) -> Result<Vec<(Arg, usize)>, (usize, String)> {
    let mut out = Vec::new();
    let mut lexer = ArgToken::lexer(args);

    while let Some(token) = lexer.next() {
        let start = lexer.span().start;
        match token {
            Ok(ArgToken::Str) => {
                let value: String = serde_json::from_str(lexer.slice())
                    .map_err(|err| (start, format!("invalid string literal: {}", err)))?;
                out.push((Arg::Str(value), start));
            }
            Ok(ArgToken::Colon) => out.push((Arg::Colon, start)),
            Ok(ArgToken::Comment) => {}
            Err(()) => return Err((start, format!("unexpected `{}`", lexer.slice()))),
        }
    }

    Ok(out)
}

/// Recognize `#name ...` lines. Returns `None` for anything else, including
/// lines starting with an inline expression.
fn directive_line(
    path: &Path,
    line_no: usize,
    line: &str,
) -> Result<Option<DirectiveLine>, CompileError> {
    let body = line.trim_start();
    let indent = line.len() - body.len();
    let Some(rest) = body.strip_prefix('#') else {
        return Ok(None);
    };
    if !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Ok(None);
    }

    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let name = &rest[..name_len];
    let args_start = indent + 1 + name_len;
    let args = &line[args_start..];

    let error = |offset: usize, message: String| {
        CompileError::parse(
            Origin::at(path, line_no, column_of(line, args_start + offset)),
            message,
        )
    };

    let directive = match name {
        "include" | "resource" => {
            let parsed = parse_arguments(args).map_err(|(offset, msg)| error(offset, msg))?;
            match (name, parsed.as_slice()) {
                ("include", [(Arg::Str(target), _)]) => Directive::Include(target.clone()),
                ("resource", [(Arg::Str(pattern), _)]) => Directive::Resource(ResourceSpec {
                    prefix: None,
                    pattern: pattern.clone(),
                }),
                ("resource", [(Arg::Str(prefix), _), (Arg::Colon, _), (Arg::Str(pattern), _)]) => {
                    Directive::Resource(ResourceSpec {
                        prefix: Some(prefix.clone()),
                        pattern: pattern.clone(),
                    })
                }
                ("include", _) => {
                    return Err(error(0, "expected `#include \"path\"`".to_string()))
                }
                _ => {
                    return Err(error(
                        0,
                        "expected `#resource \"pattern\"` or `#resource \"prefix\": \"pattern\"`"
                            .to_string(),
                    ))
                }
            }
        }
        _ => Directive::Unknown {
            name: name.to_string(),
            text: body.to_string(),
        },
    };

    Ok(Some(DirectiveLine {
        directive,
        line: line_no,
    }))
}

/// Scan structured-config text. Line terminators stay attached to the text
/// of their line; directive lines are dropped along with theirs.
pub fn parse_structured(path: &Path, text: &str) -> Result<Vec<Segment>, CompileError> {
    let mut segments = Vec::new();
    let mut pending: Vec<Inline> = Vec::new();

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        if let Some(directive) = directive_line(path, line_no, line)? {
            segments.extend(pending.drain(..).map(Segment::Inline));
            segments.push(Segment::Directive(directive));
            continue;
        }
        for inline in scan_inline(path, line_no, 0, line, true)? {
            match inline {
                Inline::Text(text) => push_text(&mut pending, &text),
                expr => pending.push(expr),
            }
        }
    }
    segments.extend(pending.into_iter().map(Segment::Inline));

    Ok(segments)
}

pub fn parse_key_value(path: &Path, text: &str) -> Result<Vec<KeyValueLine>, CompileError> {
    let mut lines = Vec::new();
    let mut in_section = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        if trimmed.starts_with('#') {
            match directive_line(path, line_no, raw)? {
                Some(DirectiveLine {
                    directive: Directive::Unknown { .. },
                    ..
                })
                | None => {}
                Some(directive) => lines.push(KeyValueLine::Directive(directive)),
            }
            continue;
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| {
                CompileError::parse(Origin::line(path, line_no), "unterminated section header")
            })?;
            in_section = true;
            lines.push(KeyValueLine::Section {
                name: name.trim().to_string(),
                line: line_no,
            });
            continue;
        }

        let Some(eq) = raw.find('=') else {
            return Err(CompileError::parse(
                Origin::line(path, line_no),
                "expected `key=value`",
            ));
        };
        let key = raw[..eq].trim();
        if key.is_empty() {
            return Err(CompileError::parse(Origin::line(path, line_no), "empty key"));
        }
        if !in_section {
            return Err(CompileError::parse(
                Origin::line(path, line_no),
                format!("key `{}` appears before any section", key),
            ));
        }

        let after = &raw[eq + 1..];
        let value_start = eq + 1 + (after.len() - after.trim_start().len());
        let value = raw[value_start..].trim_end();
        let column_offset = column_of(raw, value_start) - 1;

        lines.push(KeyValueLine::Entry {
            key: key.to_string(),
            value: scan_inline(path, line_no, column_offset, value, false)?,
            line: line_no,
        });
    }

    Ok(lines)
}
