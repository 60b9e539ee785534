use crate::file_store::{ByteSink, FileInfo, FileKind, FileStore, Subtree, SubtreeItem};
use crate::{VfsError, VfsResult};
use chrono::{DateTime, Local, NaiveDateTime};
use log::{debug, trace, warn};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use zipmount_format::{Blob, EntryPath};

/// [`FileStore`] over the plain host filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    temp_prefix: String,
}

impl Default for LocalFileStore {
    fn default() -> Self {
        Self::new(".tmp.zipmount-")
    }
}

impl LocalFileStore {
    pub fn new(temp_prefix: impl Into<String>) -> Self {
        Self {
            temp_prefix: temp_prefix.into(),
        }
    }

    /// Load a host file or directory tree into memory.
    pub fn export_subtree(&self, path: &Path) -> VfsResult<Subtree> {
        let metadata = fs::metadata(path).map_err(|err| map_io_error(err, path))?;
        let mut subtree = Subtree::new();
        if metadata.is_dir() {
            subtree.push(SubtreeItem {
                path: EntryPath::root(),
                kind: FileKind::Directory,
                data: None,
                modified: modified_of(&metadata),
            });
            collect_tree(path, &EntryPath::root(), &mut subtree)?;
        } else {
            subtree.push(SubtreeItem {
                path: EntryPath::root(),
                kind: FileKind::File,
                data: Some(Blob::from(fs::read(path)?)),
                modified: modified_of(&metadata),
            });
        }
        Ok(subtree)
    }

    /// Write a detached tree to `path`, which must not exist yet. A partial
    /// tree is removed again when a write fails.
    pub fn import_subtree(&self, path: &Path, subtree: &Subtree) -> VfsResult<()> {
        if path.symlink_metadata().is_ok() {
            return Err(VfsError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let result = subtree.items().iter().try_for_each(|item| {
            let target = item.path.to_host(path);
            match item.kind {
                FileKind::Directory => fs::create_dir_all(&target),
                FileKind::File => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, item.data.as_deref().unwrap_or_default())
                }
            }
        });

        if let Err(err) = result {
            warn!("import into {} failed, removing partial copy", path.display());
            if let Err(cleanup) = remove_any(path) {
                debug!("cleanup of {} failed: {}", path.display(), cleanup);
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn create_temp(&self, target: &Path) -> VfsResult<NamedTempFile> {
        let parent = target
            .parent()
            .ok_or_else(|| VfsError::InvalidPath(target.display().to_string()))?;
        fs::create_dir_all(parent)?;
        Ok(tempfile::Builder::new()
            .prefix(&self.temp_prefix)
            .tempfile_in(parent)?)
    }
}

impl FileStore for LocalFileStore {
    fn stat(&self, path: &Path) -> VfsResult<FileInfo> {
        trace!("stat({:?})", path);
        let metadata = fs::metadata(path).map_err(|err| map_io_error(err, path))?;
        Ok(info_from(path, &metadata))
    }

    fn children(&self, path: &Path) -> VfsResult<Vec<FileInfo>> {
        trace!("children({:?})", path);
        let metadata = fs::metadata(path).map_err(|err| map_io_error(err, path))?;
        if !metadata.is_dir() {
            return Err(VfsError::NotADirectory(path.display().to_string()));
        }

        let mut children = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let metadata = match fs::metadata(entry.path()) {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!("skipping {:?}: {}", entry.path(), err);
                    continue;
                }
            };
            children.push(info_from(&entry.path(), &metadata));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    fn open_read(&self, path: &Path) -> VfsResult<Box<dyn Read + '_>> {
        trace!("open_read({:?})", path);
        let metadata = fs::metadata(path).map_err(|err| map_io_error(err, path))?;
        if metadata.is_dir() {
            return Err(VfsError::IsADirectory(path.display().to_string()));
        }
        Ok(Box::new(File::open(path)?))
    }

    fn open_write(&self, path: &Path, truncate: bool) -> VfsResult<Box<dyn ByteSink + '_>> {
        trace!("open_write({:?}, truncate={})", path, truncate);
        let existing = fs::metadata(path).ok();
        if existing.as_ref().is_some_and(Metadata::is_dir) {
            return Err(VfsError::IsADirectory(path.display().to_string()));
        }

        let mut temp = self.create_temp(path)?;
        if let Some(metadata) = &existing {
            fs::set_permissions(temp.path(), metadata.permissions())?;
            if !truncate {
                io::copy(&mut File::open(path)?, temp.as_file_mut())?;
            }
        }
        Ok(Box::new(LocalWriter {
            temp,
            target: path.to_path_buf(),
        }))
    }

    fn mkdir(&self, path: &Path) -> VfsResult<()> {
        trace!("mkdir({:?})", path);
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(VfsError::AlreadyExists(path.display().to_string())),
            Err(_) => Ok(fs::create_dir_all(path)?),
        }
    }

    fn delete(&self, path: &Path, recursive: bool) -> VfsResult<()> {
        trace!("delete({:?}, recursive={})", path, recursive);
        let metadata = fs::symlink_metadata(path).map_err(|err| map_io_error(err, path))?;
        if !metadata.is_dir() {
            return Ok(fs::remove_file(path)?);
        }
        if recursive {
            return Ok(fs::remove_dir_all(path)?);
        }
        if fs::read_dir(path)?.next().is_some() {
            return Err(VfsError::DirectoryNotEmpty(path.display().to_string()));
        }
        Ok(fs::remove_dir(path)?)
    }

    fn move_path(&self, from: &Path, to: &Path) -> VfsResult<()> {
        trace!("move_path({:?} -> {:?})", from, to);
        fs::symlink_metadata(from).map_err(|err| map_io_error(err, from))?;
        if to.symlink_metadata().is_ok() {
            return Err(VfsError::AlreadyExists(to.display().to_string()));
        }
        if to.starts_with(from) {
            return Err(VfsError::InvalidPath(format!(
                "cannot move {} into itself",
                from.display()
            )));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Err(err) = fs::rename(from, to) {
            debug!("rename {:?} failed ({}), copying instead", from, err);
            copy_tree(from, to)?;
            remove_any(from)?;
        }
        Ok(())
    }

    fn copy_path(&self, from: &Path, to: &Path) -> VfsResult<()> {
        trace!("copy_path({:?} -> {:?})", from, to);
        fs::symlink_metadata(from).map_err(|err| map_io_error(err, from))?;
        if to.symlink_metadata().is_ok() {
            return Err(VfsError::AlreadyExists(to.display().to_string()));
        }
        if to.starts_with(from) {
            return Err(VfsError::InvalidPath(format!(
                "cannot copy {} into itself",
                from.display()
            )));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(copy_tree(from, to)?)
    }
}

/// Temp file next to the target, renamed over it on commit.
struct LocalWriter {
    temp: NamedTempFile,
    target: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

impl ByteSink for LocalWriter {
    fn commit(self: Box<Self>) -> VfsResult<()> {
        let LocalWriter { mut temp, target } = *self;
        temp.flush()?;
        temp.persist(&target)
            .map(|_| ())
            .map_err(|err| VfsError::Io(err.error))
    }
}

fn system_time_to_naive(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

fn modified_of(metadata: &Metadata) -> Option<NaiveDateTime> {
    metadata.modified().ok().map(system_time_to_naive)
}

fn info_from(path: &Path, metadata: &Metadata) -> FileInfo {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if metadata.is_dir() {
        FileInfo::directory(&name, modified_of(metadata))
    } else {
        FileInfo {
            name,
            kind: FileKind::File,
            size: metadata.len(),
            modified: modified_of(metadata),
        }
    }
}

fn map_io_error(err: io::Error, path: &Path) -> VfsError {
    if err.kind() == io::ErrorKind::NotFound {
        VfsError::NotFound(path.display().to_string())
    } else {
        VfsError::Io(err)
    }
}

fn collect_tree(dir: &Path, relative: &EntryPath, subtree: &mut Subtree) -> VfsResult<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("skipping non UTF-8 name in {}", dir.display());
            continue;
        };
        let path = relative.join(name)?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            subtree.push(SubtreeItem {
                path: path.clone(),
                kind: FileKind::Directory,
                data: None,
                modified: modified_of(&metadata),
            });
            collect_tree(&entry.path(), &path, subtree)?;
        } else if metadata.is_file() {
            subtree.push(SubtreeItem {
                path,
                kind: FileKind::File,
                data: Some(Blob::from(fs::read(entry.path())?)),
                modified: modified_of(&metadata),
            });
        }
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    if !fs::metadata(from)?.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        copy_tree(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}

fn remove_any(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
