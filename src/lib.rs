//! rtbuild Core - Theme Compiler
//!
//! Compiles a tree of `rtconfig.txt` fragments, `.ReaperTheme` color tables and
//! Lua scripts into a single theme archive.
//!
//! # Guarantees
//! 1. Every file is read and processed at most once per compile
//! 2. Include cycles are errors, never hangs
//! 3. Scripts see only the sandboxed namespace
//! 4. Deterministic output, down to the archive bytes
//! 5. No archive is written unless the whole compile succeeded

pub mod error;
pub mod color;
pub mod sandbox;
pub mod engine;
pub mod source;
pub mod resolver;
pub mod assembler;
pub mod resources;
pub mod package;
pub mod hashing;
pub mod pipeline;

pub use error::{CompileError, ErrorKind, Origin};
pub use color::{blend, BlendMode, ColorError, ColorValue};
pub use engine::EvaluationContext;
pub use source::{FileKind, SourceReader, DiskReader};
pub use resolver::{ResolutionPlan, Resolver};
pub use assembler::{KeyValueDocument, StructuredConfigDocument};
pub use resources::{GlobMatcher, FsGlob, ResourcePlanEntry};
pub use package::{ArchiveWriter, MemoryArchive, ZipArchiveWriter};
pub use hashing::{compute_manifest_hash, canonical_json};
pub use pipeline::{BuildManifest, BuildOptions, CompilationPipeline, CompiledTheme};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Archive entry holding the structured-config document
pub const RTCONFIG_ENTRY: &str = "rtconfig.txt";
/// Extension of the key/value archive entry, `<theme>.ReaperTheme`
pub const KEY_VALUE_EXTENSION: &str = "ReaperTheme";
pub const ARCHIVE_EXTENSION: &str = "ReaperThemeZip";
