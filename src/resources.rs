//! Resource Planner - Glob Expansion to Archive Destinations

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use relative_path::{Component, RelativePath, RelativePathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CompileError, Origin};
use crate::resolver::ResourceDirective;

/// Expands a glob pattern relative to a directory into an ordered list of files
pub trait GlobMatcher {
    fn matches(&self, pattern: &str, base_dir: &Path) -> Result<Vec<PathBuf>, glob::PatternError>;
}

/// Filesystem matcher on top of the `glob` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct FsGlob;

impl GlobMatcher for FsGlob {
    fn matches(&self, pattern: &str, base_dir: &Path) -> Result<Vec<PathBuf>, glob::PatternError> {
        let base = glob::Pattern::escape(&base_dir.to_string_lossy());
        let full = Path::new(&base).join(pattern);

        let mut files = Vec::new();
        for entry in glob::glob(&full.to_string_lossy())? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(err) => warn!(
                    path = %err.path().display(),
                    error = %err.error(),
                    "skipping unreadable glob match"
                ),
            }
        }
        Ok(files)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFile {
    pub source: PathBuf,
    /// Archive-relative, `/`-separated
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourcePlanEntry {
    pub pattern: String,
    pub prefix: Option<String>,
    pub files: Vec<ResourceFile>,
}

/// Expand every directive in order. Destinations flatten to `prefix/basename`;
/// when two files land on the same destination the first one is kept.
pub fn plan<G: GlobMatcher + ?Sized>(
    glob: &G,
    directives: &[ResourceDirective],
) -> Result<Vec<ResourcePlanEntry>, CompileError> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut entries = Vec::with_capacity(directives.len());

    for directive in directives {
        let spec = &directive.spec;
        let root = destination_root(spec.prefix.as_deref(), &directive.origin)?;
        let matched = glob
            .matches(&spec.pattern, &directive.base_dir)
            .map_err(|err| {
                CompileError::parse(
                    directive.origin.clone(),
                    format!("invalid resource pattern `{}`: {}", spec.pattern, err),
                )
            })?;

        if matched.is_empty() {
            warn!(pattern = %spec.pattern, at = %directive.origin, "resource pattern matched no files");
        }

        let mut files = Vec::new();
        for source in matched {
            let Some(name) = source.file_name() else {
                continue;
            };
            let destination = root.join(name.to_string_lossy().as_ref()).into_string();

            if !taken.insert(destination.clone()) {
                warn!(
                    source = %source.display(),
                    destination = %destination,
                    "resource destination already taken, keeping the first"
                );
                continue;
            }

            debug!(source = %source.display(), destination = %destination, "planned resource");
            files.push(ResourceFile {
                source,
                destination,
            });
        }

        entries.push(ResourcePlanEntry {
            pattern: spec.pattern.clone(),
            prefix: spec.prefix.clone(),
            files,
        });
    }

    Ok(entries)
}

fn destination_root(prefix: Option<&str>, origin: &Origin) -> Result<RelativePathBuf, CompileError> {
    let Some(prefix) = prefix else {
        return Ok(RelativePathBuf::new());
    };

    if prefix.starts_with('/') || prefix.starts_with('\\') || Path::new(prefix).is_absolute() {
        return Err(CompileError::parse(
            origin.clone(),
            format!("resource prefix `{}` must be relative", prefix),
        ));
    }

    let normalized = RelativePath::new(prefix).normalize();
    if normalized.components().any(|c| c == Component::ParentDir) {
        return Err(CompileError::parse(
            origin.clone(),
            format!("resource prefix `{}` leaves the archive root", prefix),
        ));
    }

    Ok(normalized)
}
