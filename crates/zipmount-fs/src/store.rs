//! File-store operations on one mounted archive.
//!
//! [`ArchiveFileStore`] keeps only the host root of its mount and looks the
//! mount up in the registry on every call, so a store never operates on a
//! mount that has since been closed or reopened.

use crate::file_store::{ByteSink, FileInfo, FileKind, FileStore, Subtree, SubtreeItem};
use crate::mount::{write_pair, Mount, MountState};
use crate::{MountRegistry, VfsError, VfsResult};
use chrono::NaiveDateTime;
use log::{debug, trace};
use parking_lot::{ArcRwLockReadGuard, RawRwLock};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zipmount_format::{read_slice, Blob, DataSource, Entry, EntryPath, EntryReader, Mutation};

/// Whether content arriving through [`ArchiveFileStore::import_subtree`]
/// is a copy or the target half of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Copy,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutMode {
    Create,
    Replace,
}

/// File store over the mount registered at one host root.
#[derive(Debug, Clone)]
pub struct ArchiveFileStore {
    registry: Arc<MountRegistry>,
    root: PathBuf,
}

impl ArchiveFileStore {
    pub fn new(registry: Arc<MountRegistry>, root: PathBuf) -> Self {
        Self { registry, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current mount at this store's root.
    pub fn mount(&self) -> VfsResult<Arc<Mount>> {
        self.registry.mount_at(&self.root)
    }

    pub fn stat(&self, path: &EntryPath) -> VfsResult<FileInfo> {
        trace!("stat({}!/{})", self.root.display(), path);
        let mount = self.mount()?;
        let state = mount.read();
        mount.ensure_open(&state)?;
        stat_locked(&mount, &state, path)
    }

    pub fn exists(&self, path: &EntryPath) -> VfsResult<bool> {
        let mount = self.mount()?;
        let state = mount.read();
        mount.ensure_open(&state)?;
        Ok(state.index.contains(path))
    }

    pub fn children(&self, path: &EntryPath) -> VfsResult<Vec<FileInfo>> {
        trace!("children({}!/{})", self.root.display(), path);
        let mount = self.mount()?;
        let state = mount.read();
        mount.ensure_open(&state)?;
        let children = state
            .index
            .children(path)
            .map_err(|err| self.located(err, path))?;
        Ok(children.into_iter().map(FileInfo::from_entry).collect())
    }

    /// Open a stream over a file entry.
    ///
    /// Entries still stored in the backing archive are decoded lazily and the
    /// stream keeps the mount's shared lock until it is dropped.
    pub fn read(&self, path: &EntryPath) -> VfsResult<EntryStream> {
        trace!("read({}!/{})", self.root.display(), path);
        let mount = self.mount()?;
        let guard = mount.read_arc();
        mount.ensure_open(&guard)?;
        let entry = guard
            .index
            .lookup(path)
            .ok_or_else(|| self.not_found(path))?;
        if entry.is_dir() {
            return Err(VfsError::IsADirectory(self.display(path)));
        }

        match entry.source.clone() {
            DataSource::Pending(data) => Ok(EntryStream::memory(data)),
            DataSource::None => Ok(EntryStream::memory(Blob::from(Vec::new()))),
            DataSource::Archive(slice) => {
                let reader = zipmount_format::open_slice(mount.backing_path(), &slice)?;
                Ok(EntryStream {
                    inner: StreamSource::Archive(reader),
                    _guard: Some(guard),
                })
            }
        }
    }

    pub fn read_to_vec(&self, path: &EntryPath) -> VfsResult<Vec<u8>> {
        let mut data = Vec::new();
        self.read(path)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Create a new file; fails if anything exists at `path`.
    pub fn create(&self, path: &EntryPath, data: &[u8]) -> VfsResult<()> {
        trace!("create({}!/{})", self.root.display(), path);
        self.mutate(|mount, state| put_file(mount, state, path, Blob::from(data), PutMode::Create))
    }

    /// Replace or create a file.
    pub fn write(&self, path: &EntryPath, data: &[u8]) -> VfsResult<()> {
        trace!("write({}!/{})", self.root.display(), path);
        self.mutate(|mount, state| put_file(mount, state, path, Blob::from(data), PutMode::Replace))
    }

    /// Buffered writer committed under one exclusive lock hold.
    ///
    /// With `truncate == false` the written bytes are appended to the
    /// existing content.
    pub fn open_write(&self, path: &EntryPath, truncate: bool) -> VfsResult<EntryWriter> {
        trace!("open_write({}!/{}, truncate={})", self.root.display(), path, truncate);
        let mount = self.mount()?;
        {
            let state = mount.read();
            mount.ensure_open(&state)?;
            if state.index.is_dir(path) {
                return Err(VfsError::IsADirectory(self.display(path)));
            }
            check_parent_chain(&state, path)?;
        }
        Ok(EntryWriter {
            store: self.clone(),
            path: path.clone(),
            buffer: Vec::new(),
            truncate,
            committed: false,
        })
    }

    fn commit_write(&self, path: &EntryPath, data: Vec<u8>, truncate: bool) -> VfsResult<()> {
        self.mutate(|mount, state| {
            let data = match state.index.lookup(path) {
                Some(existing) if !truncate && existing.is_file() => {
                    let mut combined = load_data(mount, existing)?.to_vec();
                    combined.extend_from_slice(&data);
                    combined
                }
                _ => data,
            };
            put_file(mount, state, path, Blob::from(data), PutMode::Replace)
        })
    }

    /// Create a directory and any missing parents. Existing directories are
    /// left alone.
    pub fn mkdir(&self, path: &EntryPath) -> VfsResult<()> {
        trace!("mkdir({}!/{})", self.root.display(), path);
        self.mutate(|_, state| {
            if path.is_root() {
                return Ok(());
            }
            match state.index.lookup(path) {
                Some(entry) if entry.is_dir() => return Ok(()),
                Some(_) => return Err(VfsError::AlreadyExists(path.to_string())),
                None => {}
            }
            check_parent_chain(state, path)?;
            let entry = Entry::directory(path.clone(), now());
            state.index.insert(entry.clone())?;
            state.record(Mutation::Create(entry));
            Ok(())
        })
    }

    /// Remove a file or directory. Non-empty directories need `recursive`;
    /// the whole subtree then goes in one step.
    pub fn delete(&self, path: &EntryPath, recursive: bool) -> VfsResult<()> {
        trace!("delete({}!/{}, recursive={})", self.root.display(), path, recursive);
        self.mutate(|mount, state| {
            if path.is_root() {
                return Err(VfsError::InvalidPath(format!(
                    "cannot delete the root of {}",
                    mount.host_root().display()
                )));
            }
            let entry = state
                .index
                .lookup(path)
                .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
            if entry.is_dir() && !recursive && state.index.has_children(path) {
                return Err(VfsError::DirectoryNotEmpty(path.to_string()));
            }
            mount.ensure_no_nested_mount(path)?;

            let removed = state.index.remove(path)?;
            debug!("deleted {} entries under {}", removed.len(), path);
            state.record(Mutation::Delete(path.clone()));
            Ok(())
        })
    }

    /// Rename inside this archive, carrying the whole subtree along.
    pub fn rename(&self, from: &EntryPath, to: &EntryPath) -> VfsResult<()> {
        trace!("rename({}!/{} -> {})", self.root.display(), from, to);
        self.mutate(|mount, state| {
            validate_relocation(state, from, to)?;
            mount.ensure_no_nested_mount(from)?;
            state.index.rename(from, to)?;
            state.record(Mutation::Rename {
                from: from.clone(),
                to: to.clone(),
            });
            Ok(())
        })
    }

    /// Copy inside this archive. Unmodified entries keep pointing at the
    /// original archive data, so nothing is decoded.
    pub fn copy(&self, from: &EntryPath, to: &EntryPath) -> VfsResult<()> {
        trace!("copy({}!/{} -> {})", self.root.display(), from, to);
        self.mutate(|_, state| {
            validate_relocation(state, from, to)?;
            let copies: Vec<Entry> = state
                .index
                .lookup(from)
                .into_iter()
                .chain(state.index.descendants(from))
                .filter_map(|entry| {
                    entry
                        .path
                        .rebase(from, to)
                        .map(|path| entry.relocated(path))
                })
                .collect();
            for entry in copies {
                state.index.insert(entry.clone())?;
                state.record(Mutation::Create(entry));
            }
            Ok(())
        })
    }

    /// Load a file or directory tree into memory.
    pub fn export_subtree(&self, path: &EntryPath) -> VfsResult<Subtree> {
        let mount = self.mount()?;
        let state = mount.read();
        mount.ensure_open(&state)?;
        export_locked(&mount, &state, path)
    }

    /// Materialize a detached tree at `path`, which must not exist yet.
    pub fn import_subtree(
        &self,
        path: &EntryPath,
        subtree: Subtree,
        transfer: Transfer,
    ) -> VfsResult<()> {
        self.mutate(|mount, state| import_locked(mount, state, path, subtree, transfer))
    }

    /// Move `from` in `source` to `to` in `target` as one critical section.
    ///
    /// Both mounts are locked exclusively in host-root order; the source
    /// bytes are read before either index changes.
    pub fn move_across_mounts(
        source: &ArchiveFileStore,
        from: &EntryPath,
        target: &ArchiveFileStore,
        to: &EntryPath,
    ) -> VfsResult<()> {
        let src = source.mount()?;
        let dst = target.mount()?;
        if src.id() == dst.id() {
            return source.rename(from, to);
        }
        debug!(
            "move {}!/{} -> {}!/{}",
            src.host_root().display(),
            from,
            dst.host_root().display(),
            to
        );

        let (mut src_state, mut dst_state) = write_pair(&src, &dst);
        src.ensure_open(&src_state)?;
        dst.ensure_open(&dst_state)?;
        if from.is_root() {
            return Err(VfsError::InvalidPath(format!(
                "cannot move the root of {}",
                src.host_root().display()
            )));
        }
        if !src_state.index.contains(from) {
            return Err(VfsError::NotFound(from.to_string()));
        }
        src.ensure_no_nested_mount(from)?;

        let subtree = export_locked(&src, &src_state, from)?;
        import_locked(&dst, &mut dst_state, to, subtree, Transfer::Move)?;
        src_state.index.remove(from)?;
        src_state.record(Mutation::MoveOut(from.clone()));
        Ok(())
    }

    fn mutate<T>(&self, op: impl FnOnce(&Mount, &mut MountState) -> VfsResult<T>) -> VfsResult<T> {
        let mount = self.mount()?;
        let mut state = mount.write();
        mount.ensure_open(&state)?;
        op(mount.as_ref(), &mut *state)
    }

    fn display(&self, path: &EntryPath) -> String {
        path.to_host(&self.root).display().to_string()
    }

    fn not_found(&self, path: &EntryPath) -> VfsError {
        VfsError::NotFound(self.display(path))
    }

    fn located(&self, err: zipmount_format::Error, path: &EntryPath) -> VfsError {
        match err {
            zipmount_format::Error::NotFound(_) => self.not_found(path),
            zipmount_format::Error::NotADirectory(_) => VfsError::NotADirectory(self.display(path)),
            other => other.into(),
        }
    }
}

impl FileStore for ArchiveFileStore {
    fn stat(&self, path: &Path) -> VfsResult<FileInfo> {
        ArchiveFileStore::stat(self, &EntryPath::from_host(path)?)
    }

    fn children(&self, path: &Path) -> VfsResult<Vec<FileInfo>> {
        ArchiveFileStore::children(self, &EntryPath::from_host(path)?)
    }

    fn open_read(&self, path: &Path) -> VfsResult<Box<dyn Read + '_>> {
        Ok(Box::new(self.read(&EntryPath::from_host(path)?)?))
    }

    fn open_write(&self, path: &Path, truncate: bool) -> VfsResult<Box<dyn ByteSink + '_>> {
        Ok(Box::new(ArchiveFileStore::open_write(
            self,
            &EntryPath::from_host(path)?,
            truncate,
        )?))
    }

    fn mkdir(&self, path: &Path) -> VfsResult<()> {
        ArchiveFileStore::mkdir(self, &EntryPath::from_host(path)?)
    }

    fn delete(&self, path: &Path, recursive: bool) -> VfsResult<()> {
        ArchiveFileStore::delete(self, &EntryPath::from_host(path)?, recursive)
    }

    fn move_path(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.rename(&EntryPath::from_host(from)?, &EntryPath::from_host(to)?)
    }

    fn copy_path(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.copy(&EntryPath::from_host(from)?, &EntryPath::from_host(to)?)
    }
}

enum StreamSource {
    Memory(Cursor<Blob>),
    Archive(EntryReader),
}

/// Byte stream returned by [`ArchiveFileStore::read`].
pub struct EntryStream {
    inner: StreamSource,
    _guard: Option<ArcRwLockReadGuard<RawRwLock, MountState>>,
}

impl EntryStream {
    fn memory(data: Blob) -> Self {
        Self {
            inner: StreamSource::Memory(Cursor::new(data)),
            _guard: None,
        }
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            StreamSource::Memory(cursor) => cursor.read(buf),
            StreamSource::Archive(reader) => reader.read(buf),
        }
    }
}

/// Buffered sink returned by [`ArchiveFileStore::open_write`].
///
/// Content becomes visible on [`EntryWriter::finish`]. A writer dropped
/// without finishing discards its buffer.
pub struct EntryWriter {
    store: ArchiveFileStore,
    path: EntryPath,
    buffer: Vec<u8>,
    truncate: bool,
    committed: bool,
}

impl EntryWriter {
    pub fn finish(mut self) -> VfsResult<()> {
        self.committed = true;
        let data = std::mem::take(&mut self.buffer);
        self.store.commit_write(&self.path, data, self.truncate)
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for EntryWriter {
    fn commit(self: Box<Self>) -> VfsResult<()> {
        (*self).finish()
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        debug!(
            "discarding {} uncommitted bytes for {}",
            self.buffer.len(),
            self.path
        );
    }
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn stat_locked(mount: &Mount, state: &MountState, path: &EntryPath) -> VfsResult<FileInfo> {
    if path.is_root() {
        let name = mount
            .host_root()
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("");
        return Ok(FileInfo::directory(name, Some(mount.opened_at())));
    }
    state
        .index
        .lookup(path)
        .map(FileInfo::from_entry)
        .ok_or_else(|| VfsError::NotFound(path.to_host(mount.host_root()).display().to_string()))
}

/// Every proper ancestor of `path` must be a directory or absent.
fn check_parent_chain(state: &MountState, path: &EntryPath) -> VfsResult<()> {
    for ancestor in path.ancestors() {
        if let Some(entry) = state.index.lookup(&ancestor) {
            if !entry.is_dir() {
                return Err(VfsError::NotADirectory(ancestor.to_string()));
            }
        }
    }
    Ok(())
}

fn validate_relocation(state: &MountState, from: &EntryPath, to: &EntryPath) -> VfsResult<()> {
    if from.is_root() || to.is_root() {
        return Err(VfsError::InvalidPath("the archive root cannot move".to_string()));
    }
    if !state.index.contains(from) {
        return Err(VfsError::NotFound(from.to_string()));
    }
    if state.index.contains(to) {
        return Err(VfsError::AlreadyExists(to.to_string()));
    }
    if to.starts_with(from) {
        return Err(VfsError::InvalidPath(format!("cannot move {from} into itself")));
    }
    check_parent_chain(state, to)
}

fn put_file(
    mount: &Mount,
    state: &mut MountState,
    path: &EntryPath,
    data: Blob,
    mode: PutMode,
) -> VfsResult<()> {
    if path.is_root() {
        return Err(VfsError::IsADirectory(mount.host_root().display().to_string()));
    }
    let existed = match state.index.lookup(path) {
        Some(entry) if entry.is_dir() => return Err(VfsError::IsADirectory(path.to_string())),
        Some(_) if mode == PutMode::Create => {
            return Err(VfsError::AlreadyExists(path.to_string()))
        }
        Some(_) => true,
        None => false,
    };
    check_parent_chain(state, path)?;
    mount.ensure_no_nested_mount(path)?;

    let modified = now();
    let entry = Entry::file(path.clone(), data.clone(), modified);
    state.index.insert(entry.clone())?;
    if existed {
        state.record(Mutation::Write {
            path: path.clone(),
            data,
            modified,
        });
    } else {
        state.record(Mutation::Create(entry));
    }
    Ok(())
}

pub(crate) fn load_data(mount: &Mount, entry: &Entry) -> VfsResult<Blob> {
    match &entry.source {
        DataSource::Pending(data) => Ok(data.clone()),
        DataSource::Archive(slice) => Ok(Blob::from(read_slice(mount.backing_path(), slice)?)),
        DataSource::None => Ok(Blob::from(Vec::new())),
    }
}

pub(crate) fn export_locked(
    mount: &Mount,
    state: &MountState,
    path: &EntryPath,
) -> VfsResult<Subtree> {
    let mut subtree = Subtree::new();
    if path.is_root() {
        subtree.push(SubtreeItem {
            path: EntryPath::root(),
            kind: FileKind::Directory,
            data: None,
            modified: Some(mount.opened_at()),
        });
    } else {
        let entry = state
            .index
            .lookup(path)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        subtree.push(item_for(mount, entry, EntryPath::root())?);
    }

    for entry in state.index.descendants(path) {
        let relative = entry
            .path
            .strip_prefix(path)
            .ok_or_else(|| VfsError::InvalidPath(entry.path.to_string()))?;
        subtree.push(item_for(mount, entry, relative)?);
    }
    Ok(subtree)
}

fn item_for(mount: &Mount, entry: &Entry, relative: EntryPath) -> VfsResult<SubtreeItem> {
    let data = if entry.is_file() {
        Some(load_data(mount, entry)?)
    } else {
        None
    };
    Ok(SubtreeItem {
        path: relative,
        kind: entry.kind.into(),
        data,
        modified: Some(entry.modified),
    })
}

pub(crate) fn import_locked(
    mount: &Mount,
    state: &mut MountState,
    path: &EntryPath,
    subtree: Subtree,
    transfer: Transfer,
) -> VfsResult<()> {
    if path.is_root() {
        return Err(VfsError::InvalidPath(format!(
            "cannot replace the root of {}",
            mount.host_root().display()
        )));
    }
    if subtree.root_kind().is_none() {
        return Err(VfsError::InvalidPath("empty subtree".to_string()));
    }
    if state.index.contains(path) {
        return Err(VfsError::AlreadyExists(path.to_string()));
    }
    check_parent_chain(state, path)?;

    let stamp = now();
    let entries: Vec<Entry> = subtree
        .into_items()
        .into_iter()
        .map(|item| {
            let target = path.join_path(&item.path);
            let modified = item.modified.unwrap_or(stamp);
            match item.kind {
                FileKind::File => Entry::file(
                    target,
                    item.data.unwrap_or_else(|| Blob::from(Vec::new())),
                    modified,
                ),
                FileKind::Directory => Entry::directory(target, modified),
            }
        })
        .collect();

    for entry in &entries {
        state.index.insert(entry.clone())?;
    }
    match transfer {
        Transfer::Move => state.record(Mutation::MoveIn {
            root: path.clone(),
            entries,
        }),
        Transfer::Copy => {
            for entry in entries {
                state.record(Mutation::Create(entry));
            }
        }
    }
    Ok(())
}
