use crate::entry::{dos_epoch, Entry};
use crate::writer::{write_index, ArchiveWriter, WriteOptions};
use crate::{CompressionMethod, EntryIndex, EntryPath, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builder for creating zip archives from in-memory entries.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    index: EntryIndex,
    options: WriteOptions,
    modified: NaiveDateTime,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            index: EntryIndex::new(),
            options: WriteOptions::default(),
            modified: dos_epoch(),
        }
    }
}

impl ArchiveBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp recorded on every entry added afterwards.
    pub fn with_modified(mut self, modified: NaiveDateTime) -> Self {
        self.modified = modified;
        self
    }

    /// Compression used for file entries.
    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.options.compression = compression;
        self
    }

    /// Add a file; missing parent directories are implied.
    pub fn with_file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Result<Self> {
        let path = EntryPath::parse(name)?;
        let data: Vec<u8> = data.into();
        self.index
            .insert(Entry::file(path, Arc::from(data), self.modified))?;
        Ok(self)
    }

    /// Add an explicit directory entry.
    pub fn with_directory(mut self, name: &str) -> Result<Self> {
        let path = EntryPath::parse(name)?;
        self.index.insert(Entry::directory(path, self.modified))?;
        Ok(self)
    }

    /// Serialize the entries into an in-memory archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ArchiveWriter::new(std::io::Cursor::new(Vec::new()), self.options);
        write_index(&self.index, Path::new(""), &mut writer)?;
        Ok(writer.finish()?.into_inner())
    }

    /// Write the archive to the specified path.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = ArchiveWriter::new(File::create(path)?, self.options);
        write_index(&self.index, Path::new(""), &mut writer)?;
        writer.finish()?;

        Ok(path.to_path_buf())
    }
}
