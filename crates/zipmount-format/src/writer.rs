use crate::entry::{datetime_to_zip, CompressionMethod, DataSource, Entry, EntryKind};
use crate::reader::open_slice;
use crate::{EntryIndex, Result};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Options applied when serializing an index into a new archive.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Method for entries without an original compression method.
    pub compression: CompressionMethod,
    /// Deflate level; `None` uses the library default.
    pub compression_level: Option<i64>,
    /// Also write synthesized directories that still have children.
    pub store_implicit_directories: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
            compression_level: None,
            store_implicit_directories: false,
        }
    }
}

/// Destination of a replayed archive.
pub trait ArchiveSink {
    fn add_directory(&mut self, entry: &Entry) -> Result<()>;

    fn add_file(&mut self, entry: &Entry, data: &mut dyn Read) -> Result<()>;

    fn store_implicit_directories(&self) -> bool {
        false
    }
}

/// [`ArchiveSink`] producing a standard zip archive.
pub struct ArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: WriteOptions,
    written: usize,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(writer: W, options: WriteOptions) -> Self {
        Self {
            zip: ZipWriter::new(writer),
            options,
            written: 0,
        }
    }

    /// Number of entries written so far.
    pub fn entries_written(&self) -> usize {
        self.written
    }

    /// Write the central directory and return the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.zip.finish()?)
    }
}

impl<W: Write + Seek> ArchiveSink for ArchiveWriter<W> {
    fn add_directory(&mut self, entry: &Entry) -> Result<()> {
        let options: FileOptions<()> = FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .last_modified_time(datetime_to_zip(&entry.modified));
        self.zip.add_directory(format!("{}/", entry.path), options)?;
        self.written += 1;
        Ok(())
    }

    fn add_file(&mut self, entry: &Entry, data: &mut dyn Read) -> Result<()> {
        let method = match &entry.source {
            DataSource::Archive(slice) => slice.method,
            _ => self.options.compression,
        };
        let mut options: FileOptions<()> = FileOptions::default()
            .compression_method(method.to_zip())
            .last_modified_time(datetime_to_zip(&entry.modified))
            .large_file(entry.size >= u32::MAX as u64);
        if method == CompressionMethod::Deflated && self.options.compression_level.is_some() {
            options = options.compression_level(self.options.compression_level);
        }

        self.zip.start_file(entry.path.as_str(), options)?;
        io::copy(data, &mut self.zip)?;
        self.written += 1;
        Ok(())
    }

    fn store_implicit_directories(&self) -> bool {
        self.options.store_implicit_directories
    }
}

/// Emit every entry of `index` into `sink` in path order.
///
/// Synthesized directories are skipped while they still have children, since
/// readers derive them from the file paths. Entries that still point into the
/// original archive are decoded from `backing`.
pub fn write_index(index: &EntryIndex, backing: &Path, sink: &mut dyn ArchiveSink) -> Result<()> {
    for entry in index.iter() {
        match entry.kind {
            EntryKind::Directory => {
                if entry.implicit
                    && !sink.store_implicit_directories()
                    && index.has_children(&entry.path)
                {
                    continue;
                }
                sink.add_directory(entry)?;
            }
            EntryKind::File => match &entry.source {
                DataSource::Pending(data) => {
                    sink.add_file(entry, &mut Cursor::new(&data[..]))?;
                }
                DataSource::Archive(slice) => {
                    let mut reader = open_slice(backing, slice)?;
                    sink.add_file(entry, &mut reader)?;
                }
                DataSource::None => sink.add_file(entry, &mut io::empty())?,
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::dos_epoch;
    use crate::EntryPath;
    use std::sync::Arc;

    #[test]
    fn writes_files_and_empty_directories() {
        let mut index = EntryIndex::new();
        index
            .insert(Entry::file(
                EntryPath::parse("Folder/NewFile.txt").unwrap(),
                Arc::from(&b"Foo"[..]),
                dos_epoch(),
            ))
            .unwrap();
        index
            .insert(Entry::directory(EntryPath::parse("Empty").unwrap(), dos_epoch()))
            .unwrap();

        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::default());
        write_index(&index, Path::new("unused.zip"), &mut writer).unwrap();
        assert_eq!(writer.entries_written(), 2);
        let bytes = writer.finish().unwrap().into_inner();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["Empty/", "Folder/NewFile.txt"]);

        let mut content = String::new();
        archive
            .by_name("Folder/NewFile.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "Foo");
    }
}
