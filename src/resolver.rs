//! Directive Resolver - Depth-First Include Walk
//!
//! The walk is iterative: an explicit frame stack, a visiting set mirroring it
//! for cycle detection, and a processed set so every file is read, executed and
//! contributed at most once per compile.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::EvaluationContext;
use crate::error::{CompileError, Origin};
use crate::source::{
    self, Directive, DirectiveLine, FileKind, Inline, KeyValueLine, ResourceSpec, Segment,
    SourceFile, SourceReader,
};

/// Part of a structured-config file after substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    /// Rendered output of another plan entry, placed where its `#include` was
    Nested(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValueSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanContent {
    Script,
    StructuredConfig(Vec<Piece>),
    KeyValue(Vec<KeyValueSection>),
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub path: PathBuf,
    pub kind: FileKind,
    pub content: PlanContent,
}

/// A `#resource` directive or `resource(...)` call, with the directory its
/// pattern is relative to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDirective {
    pub spec: ResourceSpec,
    pub base_dir: PathBuf,
    pub origin: Origin,
}

/// Files in the order they finished processing. The entry file is last.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    pub entries: Vec<PlanEntry>,
    pub resources: Vec<ResourceDirective>,
}

impl ResolutionPlan {
    pub fn root(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }
}

enum FrameBody {
    Structured(Vec<Segment>),
    KeyValue(Vec<KeyValueLine>),
}

struct Frame {
    file: PathBuf,
    body: FrameBody,
    cursor: usize,
    /// Segment index of an `#include` -> plan index of the file it pulled in
    nested: HashMap<usize, usize>,
    /// Segment index of the `#include` in the parent frame that opened this one
    parent_slot: Option<usize>,
}

impl Frame {
    fn kind(&self) -> FileKind {
        match self.body {
            FrameBody::Structured(_) => FileKind::StructuredConfig,
            FrameBody::KeyValue(_) => FileKind::KeyValue,
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.file.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    fn next_directive(&mut self) -> Option<(usize, DirectiveLine)> {
        loop {
            let index = self.cursor;
            let found = match &self.body {
                FrameBody::Structured(segments) => match segments.get(index)? {
                    Segment::Directive(directive) => Some(directive.clone()),
                    Segment::Inline(_) => None,
                },
                FrameBody::KeyValue(lines) => match lines.get(index)? {
                    KeyValueLine::Directive(directive) => Some(directive.clone()),
                    _ => None,
                },
            };
            self.cursor += 1;
            if let Some(directive) = found {
                return Some((index, directive));
            }
        }
    }
}

pub struct Resolver<'a, R: SourceReader + ?Sized> {
    reader: &'a R,
    context: &'a EvaluationContext,
    processed: HashSet<PathBuf>,
    visiting: IndexSet<PathBuf>,
    stack: Vec<Frame>,
    plan: ResolutionPlan,
}

impl<'a, R: SourceReader + ?Sized> Resolver<'a, R> {
    pub fn new(reader: &'a R, context: &'a EvaluationContext) -> Self {
        Self {
            reader,
            context,
            processed: HashSet::new(),
            visiting: IndexSet::new(),
            stack: Vec::new(),
            plan: ResolutionPlan::default(),
        }
    }

    /// Walk everything reachable from `entry`, running scripts and substituting
    /// inline expressions along the way.
    pub fn resolve(mut self, entry: &Path) -> Result<ResolutionPlan, CompileError> {
        let path = self.canonicalize(entry, None)?;
        self.enter(path, None, None)?;

        while let Some(frame) = self.stack.last_mut() {
            match frame.next_directive() {
                Some((slot, directive)) => self.apply(slot, directive)?,
                None => self.finish()?,
            }
        }

        Ok(self.plan)
    }

    fn canonicalize(
        &self,
        path: &Path,
        referenced_from: Option<&Origin>,
    ) -> Result<PathBuf, CompileError> {
        self.reader
            .canonicalize(path)
            .map_err(|err| CompileError::read(path, err, referenced_from))
    }

    fn apply(&mut self, slot: usize, directive: DirectiveLine) -> Result<(), CompileError> {
        let Some(frame) = self.stack.last() else {
            return Ok(());
        };
        let origin = Origin::line(&frame.file, directive.line);
        let base_dir = frame.base_dir();
        let includer = frame.kind();

        match directive.directive {
            Directive::Include(target) => self.include(slot, &base_dir.join(target), origin, includer),
            Directive::Resource(spec) => {
                debug!(pattern = %spec.pattern, at = %origin, "recorded resource directive");
                self.plan.resources.push(ResourceDirective {
                    spec,
                    base_dir,
                    origin,
                });
                Ok(())
            }
            Directive::Unknown { name, .. } => {
                warn!(directive = %name, at = %origin, "unknown directive, emitting it commented out");
                Ok(())
            }
        }
    }

    fn include(
        &mut self,
        slot: usize,
        target: &Path,
        origin: Origin,
        includer: FileKind,
    ) -> Result<(), CompileError> {
        let path = self.canonicalize(target, Some(&origin))?;

        if includer == FileKind::KeyValue && FileKind::from_path(&path) == FileKind::StructuredConfig {
            return Err(CompileError::parse(
                origin,
                "key/value files can only include scripts and key/value files",
            ));
        }

        if self.processed.contains(&path) {
            debug!(file = %path.display(), at = %origin, "already processed, skipping include");
            return Ok(());
        }

        if let Some(start) = self.visiting.get_index_of(&path) {
            let mut cycle: Vec<PathBuf> = self.visiting.iter().skip(start).cloned().collect();
            cycle.push(path);
            return Err(CompileError::CyclicInclude { cycle });
        }

        self.enter(path, Some(&origin), Some(slot))
    }

    /// Read a newly reached file. Scripts run immediately; documents get a frame.
    fn enter(
        &mut self,
        path: PathBuf,
        referenced_from: Option<&Origin>,
        parent_slot: Option<usize>,
    ) -> Result<(), CompileError> {
        let source = SourceFile::load(self.reader, &path, referenced_from)?;
        debug!(file = %path.display(), kind = ?source.kind, "resolving");

        let body = match source.kind {
            FileKind::Script => return self.run_script(source),
            FileKind::StructuredConfig => {
                FrameBody::Structured(source::parse_structured(&path, &source.text)?)
            }
            FileKind::KeyValue => FrameBody::KeyValue(source::parse_key_value(&path, &source.text)?),
        };

        self.visiting.insert(path.clone());
        self.stack.push(Frame {
            file: path,
            body,
            cursor: 0,
            nested: HashMap::new(),
            parent_slot,
        });
        Ok(())
    }

    fn run_script(&mut self, source: SourceFile) -> Result<(), CompileError> {
        self.context.exec(&source.text, &Origin::file(&source.path))?;
        self.collect_script_resources(&source.path);
        self.processed.insert(source.path.clone());
        self.plan.entries.push(PlanEntry {
            path: source.path,
            kind: FileKind::Script,
            content: PlanContent::Script,
        });
        Ok(())
    }

    fn collect_script_resources(&mut self, file: &Path) {
        let base_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        for spec in self.context.take_resources() {
            self.plan.resources.push(ResourceDirective {
                spec,
                base_dir: base_dir.clone(),
                origin: Origin::file(file),
            });
        }
    }

    /// All directives of the top frame are resolved: substitute its inline
    /// expressions and record it in the plan.
    fn finish(&mut self) -> Result<(), CompileError> {
        let Some(frame) = self.stack.pop() else {
            return Ok(());
        };
        let kind = frame.kind();

        let content = match frame.body {
            FrameBody::Structured(segments) => PlanContent::StructuredConfig(
                self.substitute_structured(&frame.file, segments, &frame.nested)?,
            ),
            FrameBody::KeyValue(lines) => {
                PlanContent::KeyValue(self.substitute_key_value(&frame.file, lines)?)
            }
        };
        self.collect_script_resources(&frame.file);

        self.visiting.pop();
        self.processed.insert(frame.file.clone());
        let index = self.plan.entries.len();
        self.plan.entries.push(PlanEntry {
            path: frame.file,
            kind,
            content,
        });

        if let (Some(parent), Some(slot)) = (self.stack.last_mut(), frame.parent_slot) {
            parent.nested.insert(slot, index);
        }
        Ok(())
    }

    fn substitute_structured(
        &self,
        file: &Path,
        segments: Vec<Segment>,
        nested: &HashMap<usize, usize>,
    ) -> Result<Vec<Piece>, CompileError> {
        let mut pieces = Vec::new();

        for (index, segment) in segments.into_iter().enumerate() {
            match segment {
                Segment::Inline(Inline::Text(text)) => push_text(&mut pieces, &text),
                Segment::Inline(Inline::Expression(expr)) => {
                    let origin = Origin::at(file, expr.line, expr.column);
                    let value = self.context.eval_expr(&expr.code, &origin)?;
                    push_text(&mut pieces, &value);
                }
                Segment::Directive(DirectiveLine {
                    directive: Directive::Include(_),
                    ..
                }) => {
                    if let Some(&child) = nested.get(&index) {
                        pieces.push(Piece::Nested(child));
                    }
                }
                Segment::Directive(DirectiveLine {
                    directive: Directive::Unknown { text, .. },
                    ..
                }) => push_text(&mut pieces, &format!("; {}", text)),
                Segment::Directive(_) => {}
            }
        }

        Ok(pieces)
    }

    fn substitute_key_value(
        &self,
        file: &Path,
        lines: Vec<KeyValueLine>,
    ) -> Result<Vec<KeyValueSection>, CompileError> {
        let mut sections: Vec<KeyValueSection> = Vec::new();

        for line in lines {
            match line {
                KeyValueLine::Section { name, .. } => sections.push(KeyValueSection {
                    name,
                    entries: Vec::new(),
                }),
                KeyValueLine::Entry { key, value, .. } => {
                    let mut text = String::new();
                    for part in value {
                        match part {
                            Inline::Text(t) => text.push_str(&t),
                            Inline::Expression(expr) => {
                                let origin = Origin::at(file, expr.line, expr.column);
                                text.push_str(&self.context.eval_expr(&expr.code, &origin)?);
                            }
                        }
                    }
                    if let Some(section) = sections.last_mut() {
                        section.entries.push((key, text));
                    }
                }
                KeyValueLine::Directive(_) => {}
            }
        }

        Ok(sections)
    }
}

fn push_text(pieces: &mut Vec<Piece>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Piece::Text(last)) = pieces.last_mut() {
        last.push_str(text);
    } else {
        pieces.push(Piece::Text(text.to_string()));
    }
}
