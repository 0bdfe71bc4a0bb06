//! Compilation Pipeline - Single Entry Point
//!
//! CRITICAL: the output path is only touched after the whole theme compiled and
//! the archive was finalized in a temporary file next to it.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::assembler::AssembledDocuments;
use crate::engine::EvaluationContext;
use crate::error::CompileError;
use crate::hashing::compute_manifest_hash;
use crate::package::{self, ArchiveWriter, EmittedEntry, MemoryArchive, ZipArchiveWriter};
use crate::resolver::{ResolutionPlan, Resolver};
use crate::resources::{self, FsGlob, GlobMatcher, ResourcePlanEntry};
use crate::source::{DiskReader, FileKind, SourceReader};
use crate::{ARCHIVE_EXTENSION, ENGINE_VERSION};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Replace an existing output file
    pub overwrite: bool,
    /// Deflate level for every archive entry
    pub compression_level: i64,
    /// String globals bound before the entry file is processed
    pub defines: BTreeMap<String, String>,
    /// Overrides the name derived from the output file stem
    pub theme_name: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            compression_level: package::DEFAULT_COMPRESSION_LEVEL,
            defines: BTreeMap::new(),
            theme_name: None,
        }
    }
}

impl BuildOptions {
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_compression_level(mut self, level: i64) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    pub fn with_theme_name(mut self, name: impl Into<String>) -> Self {
        self.theme_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: PathBuf,
    pub kind: FileKind,
}

/// Reproduction record for one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub theme_name: String,
    pub engine_version: String,
    /// Paths are relative to the entry file's directory where possible
    pub entry: PathBuf,
    pub files: Vec<PlannedFile>,
    pub entries: Vec<EmittedEntry>,
    pub manifest_hash: String,
}

/// Everything known about a theme once it compiled, before packaging
#[derive(Debug, Clone)]
pub struct CompiledTheme {
    pub theme_name: String,
    pub plan: ResolutionPlan,
    pub documents: AssembledDocuments,
    pub resources: Vec<ResourcePlanEntry>,
}

impl CompiledTheme {
    pub fn rtconfig(&self) -> String {
        self.documents.structured.render()
    }

    pub fn key_value(&self) -> String {
        self.documents.key_value.render()
    }

    fn root_dir(&self) -> Option<&Path> {
        let root = self.plan.root()?;
        self.plan.entries[root].path.parent()
    }

    fn relative(&self, path: &Path) -> PathBuf {
        self.root_dir()
            .and_then(|dir| path.strip_prefix(dir).ok())
            .unwrap_or(path)
            .to_path_buf()
    }
}

/// The compilation pipeline - single entry point for all theme builds
pub struct CompilationPipeline<R = DiskReader, G = FsGlob> {
    reader: R,
    glob: G,
}

impl CompilationPipeline {
    pub fn new() -> Self {
        Self::with_collaborators(DiskReader, FsGlob)
    }
}

impl Default for CompilationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SourceReader, G: GlobMatcher> CompilationPipeline<R, G> {
    pub fn with_collaborators(reader: R, glob: G) -> Self {
        Self { reader, glob }
    }

    /// Resolve, evaluate, assemble and plan resources. No output is produced.
    pub fn compile_theme(
        &self,
        entry: &Path,
        theme_name: &str,
        defines: &BTreeMap<String, String>,
    ) -> Result<CompiledTheme, CompileError> {
        let context = EvaluationContext::new()?;
        for (name, value) in defines {
            context.define(name, value)?;
        }

        let plan = Resolver::new(&self.reader, &context).resolve(entry)?;
        let documents = AssembledDocuments::assemble(&plan);
        let resources = resources::plan(&self.glob, &plan.resources)?;

        info!(
            theme = %theme_name,
            files = plan.entries.len(),
            resources = resources.iter().map(|r| r.files.len()).sum::<usize>(),
            "compiled theme"
        );

        Ok(CompiledTheme {
            theme_name: theme_name.to_string(),
            plan,
            documents,
            resources,
        })
    }

    /// Emit a compiled theme into any archive writer.
    pub fn package<A: ArchiveWriter + ?Sized>(
        &self,
        theme: &CompiledTheme,
        archive: &mut A,
    ) -> Result<BuildManifest, CompileError> {
        let entries = package::emit(
            archive,
            &self.reader,
            &theme.theme_name,
            &theme.documents,
            &theme.resources,
        )?;
        build_manifest(theme, entries)
    }

    /// Compile `entry` into a zip archive at `output`.
    pub fn build_archive(
        &self,
        entry: &Path,
        output: &Path,
        options: &BuildOptions,
    ) -> Result<BuildManifest, CompileError> {
        check_output(output, options.overwrite)?;

        let theme_name = options
            .theme_name
            .clone()
            .unwrap_or_else(|| stem_or_default(output));
        for issue in archive_name_issues(output, &theme_name) {
            warn!(output = %output.display(), theme = %theme_name, "{}", issue);
        }
        let theme = self.compile_theme(entry, &theme_name, &options.defines)?;

        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir).map_err(|source| CompileError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut writer = ZipArchiveWriter::new(temp, options.compression_level);
        let manifest = self.package(&theme, &mut writer)?;
        let temp = writer
            .into_inner()
            .ok_or_else(|| CompileError::Archive(io::Error::other("archive was not finalized")))?;

        let persisted = if options.overwrite {
            temp.persist(output)
        } else {
            temp.persist_noclobber(output)
        };
        persisted.map_err(|err| match err.error.kind() {
            io::ErrorKind::AlreadyExists => CompileError::OutputExists(output.to_path_buf()),
            _ => CompileError::Io {
                path: output.to_path_buf(),
                source: err.error,
            },
        })?;

        info!(
            output = %output.display(),
            entries = manifest.entries.len(),
            manifest_hash = %manifest.manifest_hash,
            "wrote theme archive"
        );
        Ok(manifest)
    }

    /// Compile and package into memory; the manifest is what `build_archive`
    /// would report for the same theme name.
    pub fn check(&self, entry: &Path, options: &BuildOptions) -> Result<BuildManifest, CompileError> {
        let theme_name = options.theme_name.clone().unwrap_or_else(|| {
            entry
                .canonicalize()
                .ok()
                .and_then(|p| p.parent().map(stem_or_default))
                .unwrap_or_else(|| DEFAULT_THEME_NAME.to_string())
        });
        let theme = self.compile_theme(entry, &theme_name, &options.defines)?;
        self.package(&theme, &mut MemoryArchive::new())
    }
}

const DEFAULT_THEME_NAME: &str = "theme";

fn stem_or_default(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_THEME_NAME.to_string())
}

/// Naming problems that keep REAPER from loading an archive correctly
fn archive_name_issues(output: &Path, theme_name: &str) -> Vec<String> {
    let mut issues = Vec::new();

    let extension = output.extension().map(|e| e.to_string_lossy().to_ascii_lowercase());
    if extension.as_deref() != Some(ARCHIVE_EXTENSION.to_ascii_lowercase().as_str()) {
        issues.push(format!("theme archives are normally named *.{}", ARCHIVE_EXTENSION));
    }
    if stem_or_default(output) != theme_name {
        issues.push(
            "archive file name differs from the theme name, REAPER may not load the theme correctly"
                .to_string(),
        );
    }

    issues
}

fn check_output(output: &Path, overwrite: bool) -> Result<(), CompileError> {
    if output.is_dir() || (output.exists() && !overwrite) {
        return Err(CompileError::OutputExists(output.to_path_buf()));
    }
    Ok(())
}

fn build_manifest(
    theme: &CompiledTheme,
    entries: Vec<EmittedEntry>,
) -> Result<BuildManifest, CompileError> {
    let files = theme
        .plan
        .entries
        .iter()
        .map(|e| PlannedFile {
            path: theme.relative(&e.path),
            kind: e.kind,
        })
        .collect::<Vec<_>>();
    let entry = files.last().map(|f| f.path.clone()).unwrap_or_default();

    let mut manifest = BuildManifest {
        theme_name: theme.theme_name.clone(),
        engine_version: ENGINE_VERSION.to_string(),
        entry,
        files,
        entries,
        manifest_hash: String::new(), // Computed after
    };
    manifest.manifest_hash = compute_manifest_hash(&manifest)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn theme_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("vars.lua"), "bg = rgb(10, 20, 30)\n").unwrap();
        fs::write(root.join("img/knob.png"), b"png").unwrap();
        fs::write(
            root.join("theme.ReaperTheme"),
            "[color theme]\ncol_main_bg=#{ bg }\n[REAPER]\nname=#{ variant or 'plain' }\n",
        )
        .unwrap();
        fs::write(
            root.join("rtconfig.txt"),
            "#include \"vars.lua\"\n#include \"theme.ReaperTheme\"\n#resource \"img/*.png\"\nversion 5\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_build_writes_archive() {
        let dir = theme_tree();
        let output = dir.path().join("Dark.ReaperThemeZip");
        let pipeline = CompilationPipeline::new();

        let manifest = pipeline
            .build_archive(&dir.path().join("src/rtconfig.txt"), &output, &BuildOptions::default())
            .unwrap();

        assert!(output.is_file());
        assert_eq!(manifest.theme_name, "Dark");
        assert_eq!(manifest.entry, PathBuf::from("rtconfig.txt"));
        let names: Vec<_> = manifest.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["rtconfig.txt", "Dark.ReaperTheme", "knob.png"]);
        assert_eq!(manifest.manifest_hash.len(), 64);
    }

    #[test]
    fn test_existing_output_needs_overwrite() {
        let dir = theme_tree();
        let entry = dir.path().join("src/rtconfig.txt");
        let output = dir.path().join("out.ReaperThemeZip");
        fs::write(&output, b"keep me").unwrap();
        let pipeline = CompilationPipeline::new();

        let err = pipeline
            .build_archive(&entry, &output, &BuildOptions::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::OutputExists(_)));
        assert_eq!(fs::read(&output).unwrap(), b"keep me");

        pipeline
            .build_archive(&entry, &output, &BuildOptions::default().with_overwrite(true))
            .unwrap();
        assert_ne!(fs::read(&output).unwrap(), b"keep me");

        let err = pipeline
            .build_archive(&entry, dir.path(), &BuildOptions::default().with_overwrite(true))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);
    }

    #[test]
    fn test_failed_compile_leaves_nothing_behind() {
        let dir = theme_tree();
        fs::write(dir.path().join("src/vars.lua"), "bg = rgb(300, 0, 0)\n").unwrap();
        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();

        let err = CompilationPipeline::new()
            .build_archive(
                &dir.path().join("src/rtconfig.txt"),
                &out_dir.join("t.ReaperThemeZip"),
                &BuildOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelRange);
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_defines_and_theme_name_override() {
        let dir = theme_tree();
        let options = BuildOptions::default()
            .with_define("variant", "dark")
            .with_theme_name("Night");
        let pipeline = CompilationPipeline::new();

        let theme = pipeline
            .compile_theme(&dir.path().join("src/rtconfig.txt"), "Night", &options.defines)
            .unwrap();
        assert_eq!(theme.documents.key_value.get("REAPER", "name"), Some("dark"));
        assert_eq!(theme.documents.key_value.get("color theme", "col_main_bg"), Some("1971210"));
        assert_eq!(theme.rtconfig(), "version 5\n");

        let manifest = pipeline
            .check(&dir.path().join("src/rtconfig.txt"), &options)
            .unwrap();
        assert_eq!(manifest.entries[1].name, "Night.ReaperTheme");
    }

    #[test]
    fn test_check_matches_build() {
        let dir = theme_tree();
        let entry = dir.path().join("src/rtconfig.txt");
        let pipeline = CompilationPipeline::new();

        let checked = pipeline.check(&entry, &BuildOptions::default()).unwrap();
        assert_eq!(checked.theme_name, "src");

        let built = pipeline
            .build_archive(&entry, &dir.path().join("src.ReaperThemeZip"), &BuildOptions::default())
            .unwrap();
        assert_eq!(checked, built);
    }

    #[test]
    fn test_archive_name_issues() {
        assert!(archive_name_issues(Path::new("out/Dark.ReaperThemeZip"), "Dark").is_empty());
        assert!(archive_name_issues(Path::new("out/Dark.reaperthemezip"), "Dark").is_empty());
        assert_eq!(archive_name_issues(Path::new("out/Dark.zip"), "Dark").len(), 1);

        let renamed = archive_name_issues(Path::new("out/Dark.ReaperThemeZip"), "Night");
        assert_eq!(renamed.len(), 1);
        assert!(renamed[0].contains("differs from the theme name"));
    }

    #[test]
    fn test_theme_name_override_still_builds() {
        let dir = theme_tree();
        let output = dir.path().join("Dark.ReaperThemeZip");

        let manifest = CompilationPipeline::new()
            .build_archive(
                &dir.path().join("src/rtconfig.txt"),
                &output,
                &BuildOptions::default().with_theme_name("Night"),
            )
            .unwrap();
        assert_eq!(manifest.theme_name, "Night");
        assert_eq!(manifest.entries[1].name, "Night.ReaperTheme");
        assert!(output.is_file());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: BuildOptions = serde_json::from_str(r#"{"overwrite": true}"#).unwrap();
        assert!(options.overwrite);
        assert_eq!(options.compression_level, 6);
        assert!(options.defines.is_empty());
    }
}
