//! Compile Errors - One Abort Path
//!
//! Every failure aborts the whole compile. Nothing is recovered locally.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::ColorError;

/// Position in a source file that an error or expression came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Origin {
    pub fn file(path: &Path) -> Self {
        Self {
            file: path.to_path_buf(),
            line: None,
            column: None,
        }
    }

    pub fn at(path: &Path, line: usize, column: usize) -> Self {
        Self {
            file: path.to_path_buf(),
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn line(path: &Path, line: usize) -> Self {
        Self {
            file: path.to_path_buf(),
            line: Some(line),
            column: None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// Coarse classification of a [`CompileError`], stable for front ends and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    CyclicInclude,
    NotFound,
    ChannelRange,
    FractionRange,
    UnknownBlendMode,
    TypeMismatch,
    ScriptEvaluation,
    Io,
    Output,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Parse error at {origin}: {message}")]
    Parse { origin: Origin, message: String },

    #[error("Cyclic include: {}", format_cycle(.cycle))]
    CyclicInclude { cycle: Vec<PathBuf> },

    #[error("File not found: {}", .path.display())]
    NotFound {
        path: PathBuf,
        referenced_from: Option<Origin>,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Color error at {origin}: {source}")]
    Color {
        origin: Origin,
        #[source]
        source: ColorError,
    },

    #[error("Script evaluation failed at {origin}: {message}")]
    ScriptEvaluation { origin: Origin, message: String },

    #[error("Output path already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Archive error: {0}")]
    Archive(#[source] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompileError {
    pub fn parse(origin: Origin, message: impl Into<String>) -> Self {
        Self::Parse {
            origin,
            message: message.into(),
        }
    }

    /// Map a read failure, turning a missing file into [`CompileError::NotFound`]
    pub fn read(path: &Path, source: std::io::Error, referenced_from: Option<&Origin>) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
                referenced_from: referenced_from.cloned(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::CyclicInclude { .. } => ErrorKind::CyclicInclude,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Color { source, .. } => source.kind(),
            Self::ScriptEvaluation { .. } => ErrorKind::ScriptEvaluation,
            Self::OutputExists(_) | Self::Archive(_) | Self::Serialization(_) => ErrorKind::Output,
        }
    }
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_display() {
        let path = Path::new("theme/rtconfig.txt");
        assert_eq!(Origin::file(path).to_string(), "theme/rtconfig.txt");
        assert_eq!(Origin::line(path, 4).to_string(), "theme/rtconfig.txt:4");
        assert_eq!(Origin::at(path, 4, 9).to_string(), "theme/rtconfig.txt:4:9");
    }

    #[test]
    fn test_cycle_message_names_every_file() {
        let err = CompileError::CyclicInclude {
            cycle: vec!["a.txt".into(), "b.txt".into(), "a.txt".into()],
        };
        assert_eq!(err.to_string(), "Cyclic include: a.txt -> b.txt -> a.txt");
        assert_eq!(err.kind(), ErrorKind::CyclicInclude);
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CompileError::read(Path::new("x.lua"), io, None);
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = CompileError::read(Path::new("x.lua"), io, None);
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
