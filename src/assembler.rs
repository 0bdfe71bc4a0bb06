//! Document Assembler - Flattening the Resolution Plan
//!
//! Structured-config output is pure concatenation of fragments in document
//! order. Key/value output is a merge: first-seen position, last-written value.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;

use crate::resolver::{PlanContent, Piece, ResolutionPlan};

/// Text contributed by one structured-config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub source: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuredConfigDocument {
    fragments: Vec<Fragment>,
}

impl StructuredConfigDocument {
    /// Walk the plan from its root, splicing nested files in at their include
    /// positions. Only reachable structured-config entries contribute.
    pub fn assemble(plan: &ResolutionPlan) -> Self {
        let mut fragments: Vec<Fragment> = Vec::new();
        let Some(root) = plan.root() else {
            return Self { fragments };
        };

        // (plan index, next piece)
        let mut stack = vec![(root, 0usize)];
        while let Some((index, cursor)) = stack.pop() {
            let Some(entry) = plan.entries.get(index) else {
                continue;
            };
            let PlanContent::StructuredConfig(pieces) = &entry.content else {
                continue;
            };
            let Some(piece) = pieces.get(cursor) else {
                continue;
            };
            stack.push((index, cursor + 1));

            match piece {
                Piece::Text(text) => match fragments.last_mut() {
                    Some(last) if last.source == entry.path => last.text.push_str(text),
                    _ => fragments.push(Fragment {
                        source: entry.path.clone(),
                        text: text.clone(),
                    }),
                },
                Piece::Nested(child) => stack.push((*child, 0)),
            }
        }

        Self { fragments }
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn render(&self) -> String {
        self.fragments.iter().map(|f| f.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyValueDocument {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl KeyValueDocument {
    /// Merge every key/value entry of the plan in processing order.
    pub fn assemble(plan: &ResolutionPlan) -> Self {
        let mut document = Self::default();
        for entry in &plan.entries {
            if let PlanContent::KeyValue(sections) = &entry.content {
                for section in sections {
                    for (key, value) in &section.entries {
                        document.set(&section.name, key, value);
                    }
                    document.sections.entry(section.name.clone()).or_default();
                }
            }
        }
        document
    }

    /// Insert or overwrite; an existing key keeps its position.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, (name, entries)) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

/// Both rendered documents of one compile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssembledDocuments {
    pub structured: StructuredConfigDocument,
    pub key_value: KeyValueDocument,
}

impl AssembledDocuments {
    pub fn assemble(plan: &ResolutionPlan) -> Self {
        Self {
            structured: StructuredConfigDocument::assemble(plan),
            key_value: KeyValueDocument::assemble(plan),
        }
    }
}
