//! The file-store contract shared by archive mounts, the host filesystem and
//! the dispatching [`Vfs`](crate::Vfs).

use crate::{VfsError, VfsResult};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::Path;
use zipmount_format::{Blob, Entry, EntryKind, EntryPath};

/// Kind of a file-store node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

impl From<EntryKind> for FileKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => FileKind::File,
            EntryKind::Directory => FileKind::Directory,
        }
    }
}

/// Metadata returned by `stat` and `children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified: Option<NaiveDateTime>,
}

impl FileInfo {
    pub(crate) fn from_entry(entry: &Entry) -> Self {
        Self {
            name: entry.name().to_string(),
            kind: entry.kind.into(),
            size: if entry.is_dir() { 0 } else { entry.size },
            modified: Some(entry.modified),
        }
    }

    pub(crate) fn directory(name: &str, modified: Option<NaiveDateTime>) -> Self {
        Self {
            name: name.to_string(),
            kind: FileKind::Directory,
            size: 0,
            modified,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

/// Destination returned by `open_write`; nothing is visible until `commit`.
pub trait ByteSink: Write {
    fn commit(self: Box<Self>) -> VfsResult<()>;
}

/// One node of a detached subtree.
#[derive(Debug, Clone)]
pub struct SubtreeItem {
    /// Path relative to the subtree root; the root itself is the empty path.
    pub path: EntryPath,
    pub kind: FileKind,
    pub data: Option<Blob>,
    pub modified: Option<NaiveDateTime>,
}

/// A file or directory tree fully loaded in memory, used to move content
/// between stores.
#[derive(Debug, Clone, Default)]
pub struct Subtree {
    items: Vec<SubtreeItem>,
}

impl Subtree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: SubtreeItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[SubtreeItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<SubtreeItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Kind of the subtree root.
    pub fn root_kind(&self) -> Option<FileKind> {
        self.items
            .iter()
            .find(|item| item.path.is_root())
            .map(|item| item.kind)
    }

    pub fn total_bytes(&self) -> u64 {
        self.items
            .iter()
            .filter_map(|item| item.data.as_ref())
            .map(|data| data.len() as u64)
            .sum()
    }
}

/// Operations every store supports. Paths are interpreted by the store:
/// relative to the mount root for archives, host paths otherwise.
pub trait FileStore {
    fn stat(&self, path: &Path) -> VfsResult<FileInfo>;

    fn exists(&self, path: &Path) -> VfsResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn children(&self, path: &Path) -> VfsResult<Vec<FileInfo>>;

    fn child_names(&self, path: &Path) -> VfsResult<Vec<String>> {
        Ok(self
            .children(path)?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    fn open_read(&self, path: &Path) -> VfsResult<Box<dyn Read + '_>>;

    fn open_write(&self, path: &Path, truncate: bool) -> VfsResult<Box<dyn ByteSink + '_>>;

    fn mkdir(&self, path: &Path) -> VfsResult<()>;

    fn delete(&self, path: &Path, recursive: bool) -> VfsResult<()>;

    fn move_path(&self, from: &Path, to: &Path) -> VfsResult<()>;

    fn copy_path(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Convenience: read a whole file.
    fn read_to_vec(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let mut data = Vec::new();
        self.open_read(path)?
            .read_to_end(&mut data)
            .map_err(VfsError::Io)?;
        Ok(data)
    }

    /// Convenience: replace a whole file.
    fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let mut sink = self.open_write(path, true)?;
        sink.write_all(data)?;
        sink.commit()
    }
}
