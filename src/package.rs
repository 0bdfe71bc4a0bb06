//! Package Emitter - Archive Output
//!
//! Nothing is written until every resource has been read, so a missing file
//! fails the build before the archive writer sees a single entry.

use std::io::{self, Seek, Write};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::assembler::AssembledDocuments;
use crate::error::CompileError;
use crate::hashing::HashingWriter;
use crate::resources::ResourcePlanEntry;
use crate::source::SourceReader;
use crate::{KEY_VALUE_EXTENSION, RTCONFIG_ENTRY};

/// Sink for named archive entries
pub trait ArchiveWriter {
    /// Start a new entry; bytes written to the returned sink belong to it
    /// until the next `create` or `finalize`.
    fn create(&mut self, entry_name: &str) -> io::Result<&mut dyn Write>;
    fn finalize(&mut self) -> io::Result<()>;
}

pub const DEFAULT_COMPRESSION_LEVEL: i64 = 6;

/// Zip output with a fixed timestamp so identical inputs give identical bytes
pub struct ZipArchiveWriter<W: Write + Seek> {
    zip: Option<ZipWriter<W>>,
    finished: Option<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> ZipArchiveWriter<W> {
    pub fn new(inner: W, compression_level: i64) -> Self {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level))
            .last_modified_time(zip::DateTime::default());
        Self {
            zip: Some(ZipWriter::new(inner)),
            finished: None,
            options,
        }
    }

    /// The underlying writer, once the archive has been finalized
    pub fn into_inner(self) -> Option<W> {
        self.finished
    }
}

impl<W: Write + Seek> ArchiveWriter for ZipArchiveWriter<W> {
    fn create(&mut self, entry_name: &str) -> io::Result<&mut dyn Write> {
        let zip = self
            .zip
            .as_mut()
            .ok_or_else(|| io::Error::other("archive already finalized"))?;
        zip.start_file(entry_name, self.options)
            .map_err(io::Error::other)?;
        Ok(zip)
    }

    fn finalize(&mut self) -> io::Result<()> {
        if let Some(zip) = self.zip.take() {
            self.finished = Some(zip.finish().map_err(io::Error::other)?);
        }
        Ok(())
    }
}

/// In-memory archive, used by `check` and in tests
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: IndexMap<String, Vec<u8>>,
    finalized: bool,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry_name: &str) -> Option<&[u8]> {
        self.entries.get(entry_name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl ArchiveWriter for MemoryArchive {
    fn create(&mut self, entry_name: &str) -> io::Result<&mut dyn Write> {
        if self.finalized {
            return Err(io::Error::other("archive already finalized"));
        }
        let data = self.entries.entry(entry_name.to_string()).or_default();
        data.clear();
        Ok(data)
    }

    fn finalize(&mut self) -> io::Result<()> {
        self.finalized = true;
        Ok(())
    }
}

/// One written archive entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedEntry {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

/// Name of the key/value entry for a theme
pub fn key_value_entry_name(theme_name: &str) -> String {
    format!("{}.{}", theme_name, KEY_VALUE_EXTENSION)
}

/// Write both documents and every planned resource, then finalize.
pub fn emit<A, R>(
    archive: &mut A,
    reader: &R,
    theme_name: &str,
    documents: &AssembledDocuments,
    resources: &[ResourcePlanEntry],
) -> Result<Vec<EmittedEntry>, CompileError>
where
    A: ArchiveWriter + ?Sized,
    R: SourceReader + ?Sized,
{
    let key_value_name = key_value_entry_name(theme_name);

    let mut contents: Vec<(String, Vec<u8>)> = vec![
        (RTCONFIG_ENTRY.to_string(), documents.structured.render().into_bytes()),
        (key_value_name, documents.key_value.render().into_bytes()),
    ];

    for file in resources.iter().flat_map(|entry| entry.files.iter()) {
        if contents.iter().any(|(name, _)| *name == file.destination) {
            warn!(
                source = %file.source.display(),
                destination = %file.destination,
                "resource would replace a theme document, skipping it"
            );
            continue;
        }
        let bytes = reader
            .read(&file.source)
            .map_err(|err| CompileError::read(&file.source, err, None))?;
        contents.push((file.destination.clone(), bytes));
    }

    let mut emitted = Vec::with_capacity(contents.len());
    for (name, bytes) in contents {
        let sink = archive.create(&name).map_err(CompileError::Archive)?;
        let mut writer = HashingWriter::new(sink);
        writer.write_all(&bytes).map_err(CompileError::Archive)?;
        let (size, sha256) = writer.finish();
        debug!(entry = %name, size, "wrote archive entry");
        emitted.push(EmittedEntry { name, size, sha256 });
    }

    archive.finalize().map_err(CompileError::Archive)?;
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{KeyValueDocument, StructuredConfigDocument};
    use crate::hashing::sha256_hex;
    use crate::resources::ResourceFile;
    use crate::source::DiskReader;
    use std::fs;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn documents() -> AssembledDocuments {
        let mut key_value = KeyValueDocument::default();
        key_value.set("color theme", "col_main_bg", "2168331");
        AssembledDocuments {
            structured: StructuredConfigDocument::default(),
            key_value,
        }
    }

    fn resource(dir: &TempDir, name: &str, destination: &str) -> ResourcePlanEntry {
        let source = dir.path().join(name);
        fs::write(&source, name.as_bytes()).unwrap();
        ResourcePlanEntry {
            pattern: name.to_string(),
            prefix: None,
            files: vec![ResourceFile {
                source,
                destination: destination.to_string(),
            }],
        }
    }

    #[test]
    fn test_entry_order_and_digests() {
        let dir = TempDir::new().unwrap();
        let resources = vec![resource(&dir, "knob.png", "icons/knob.png")];
        let mut archive = MemoryArchive::new();

        let emitted = emit(&mut archive, &DiskReader, "Dark", &documents(), &resources).unwrap();

        let names: Vec<_> = archive.names().collect();
        assert_eq!(names, vec!["rtconfig.txt", "Dark.ReaperTheme", "icons/knob.png"]);
        assert!(archive.is_finalized());
        assert_eq!(archive.get("rtconfig.txt"), Some(&b""[..]));
        assert_eq!(
            archive.get("Dark.ReaperTheme"),
            Some(&b"[color theme]\ncol_main_bg=2168331\n"[..])
        );
        assert_eq!(emitted[2].size, 8);
        assert_eq!(emitted[2].sha256, sha256_hex(b"knob.png"));
    }

    #[test]
    fn test_missing_resource_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let resources = vec![ResourcePlanEntry {
            pattern: "*.png".to_string(),
            prefix: None,
            files: vec![ResourceFile {
                source: dir.path().join("gone.png"),
                destination: "gone.png".to_string(),
            }],
        }];
        let mut archive = MemoryArchive::new();

        let err = emit(&mut archive, &DiskReader, "t", &documents(), &resources).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert_eq!(archive.names().count(), 0);
        assert!(!archive.is_finalized());
    }

    #[test]
    fn test_resource_cannot_shadow_documents() {
        let dir = TempDir::new().unwrap();
        let resources = vec![resource(&dir, "rtconfig.txt", "rtconfig.txt")];
        let mut archive = MemoryArchive::new();

        emit(&mut archive, &DiskReader, "t", &documents(), &resources).unwrap();
        assert_eq!(archive.get("rtconfig.txt"), Some(&b""[..]));
        assert_eq!(archive.names().count(), 2);
    }

    #[test]
    fn test_zip_output_is_deterministic_and_readable() {
        let build = || {
            let mut writer = ZipArchiveWriter::new(Cursor::new(Vec::new()), DEFAULT_COMPRESSION_LEVEL);
            emit(&mut writer, &DiskReader, "Dark", &documents(), &[]).unwrap();
            writer.into_inner().unwrap().into_inner()
        };
        let first = build();
        assert_eq!(first, build());

        let mut zip = zip::ZipArchive::new(Cursor::new(first)).unwrap();
        assert_eq!(zip.len(), 2);
        let mut text = String::new();
        zip.by_name("Dark.ReaperTheme")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "[color theme]\ncol_main_bg=2168331\n");
    }

    #[test]
    fn test_finalized_writer_rejects_entries() {
        let mut writer = ZipArchiveWriter::new(Cursor::new(Vec::new()), DEFAULT_COMPRESSION_LEVEL);
        writer.finalize().unwrap();
        assert!(writer.create("late.txt").is_err());
    }
}
