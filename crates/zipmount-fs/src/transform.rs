//! Open and close transitions between archive files and mounts.

use crate::mount::{try_write_pair_for, write_pair, Backing, Mount, MountPhase, MountState, ParentLink};
use crate::registry::PathKind;
use crate::store::{load_data, now};
use crate::{MountRegistry, VfsError, VfsResult};
use log::{debug, info, warn};
use parking_lot::RwLockWriteGuard;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use zipmount_format::{ArchiveWriter, Blob, Entry, EntryIndex, EntryPath, Mutation};

/// How a close treats nested mounts that are still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Close descendants first, flushing each into its parent.
    Cascade,
    /// Fail while any descendant is open.
    Strict,
}

/// Performs open and close for one registry.
#[derive(Debug, Clone, Copy)]
pub struct TransformEngine<'a> {
    registry: &'a MountRegistry,
}

impl<'a> TransformEngine<'a> {
    pub fn new(registry: &'a MountRegistry) -> Self {
        Self { registry }
    }

    /// Mount the archive at `host_file`.
    ///
    /// A path inside an open mount opens the nested archive stored there.
    /// On a format error nothing is registered and the file stays as it is.
    pub fn open(&self, host_file: &Path) -> VfsResult<Arc<Mount>> {
        match self.registry.resolve(host_file)? {
            PathKind::Plain(path) => self.open_host(path),
            PathKind::MountRoot(mount) => {
                Err(VfsError::AlreadyMounted(mount.host_root().to_path_buf()))
            }
            PathKind::InsideMount(parent, entry) => self.open_nested(parent, entry),
        }
    }

    fn open_host(&self, path: PathBuf) -> VfsResult<Arc<Mount>> {
        let metadata = fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(VfsError::Format {
                path,
                reason: "not a regular file".to_string(),
            });
        }

        // Symlinked aliases of one archive share a canonical backing.
        let backing = fs::canonicalize(&path)?;
        let index = EntryIndex::open(&backing).map_err(|err| VfsError::opening(&path, err))?;
        let entries = index.len();
        let mount = Arc::new(Mount::new(
            self.registry.next_id(),
            path.clone(),
            Backing::Host(backing),
            None,
            index,
        )?);
        mount.write().phase = MountPhase::Open;
        self.registry.register(Arc::clone(&mount))?;

        info!("opened {} ({} entries)", path.display(), entries);
        Ok(mount)
    }

    fn open_nested(&self, parent: Arc<Mount>, entry_path: EntryPath) -> VfsResult<Arc<Mount>> {
        let host_root = entry_path.to_host(parent.host_root());
        let parent_state = parent.write();
        parent.ensure_open(&parent_state)?;

        let entry = parent_state
            .index
            .lookup(&entry_path)
            .ok_or_else(|| VfsError::NotFound(host_root.display().to_string()))?;
        if entry.is_dir() {
            return Err(VfsError::IsADirectory(host_root.display().to_string()));
        }
        let data = load_data(&parent, entry)?;

        let mut temp = tempfile::Builder::new()
            .prefix(&self.registry.config().temp_prefix)
            .suffix(".zip")
            .tempfile()?;
        temp.write_all(&data)?;
        temp.flush()?;
        let temp_path = temp.into_temp_path();

        let index =
            EntryIndex::open(&*temp_path).map_err(|err| VfsError::opening(&host_root, err))?;
        let entries = index.len();
        let link = ParentLink {
            mount: Arc::downgrade(&parent),
            entry: entry_path,
        };
        let mount = Arc::new(Mount::new(
            self.registry.next_id(),
            host_root.clone(),
            Backing::Nested(temp_path),
            Some(link),
            index,
        )?);
        mount.write().phase = MountPhase::Open;
        self.registry.register(Arc::clone(&mount))?;
        parent.add_child(&mount);
        drop(parent_state);

        info!(
            "opened nested {} ({} entries, {} bytes)",
            host_root.display(),
            entries,
            data.len()
        );
        Ok(mount)
    }

    /// Flush and unmount the archive registered at `root`.
    ///
    /// An unmodified mount is deregistered without touching its file. A
    /// failed flush leaves the mount open and the archive as it was.
    pub fn close(&self, root: &Path, mode: CloseMode) -> VfsResult<()> {
        let mount = self.registry.mount_at(root)?;
        self.close_mount(&mount, mode, None)
    }

    fn close_mount(
        &self,
        mount: &Arc<Mount>,
        mode: CloseMode,
        timeout: Option<Duration>,
    ) -> VfsResult<()> {
        let children = mount.children();
        if let Some(child) = children.first() {
            if mode == CloseMode::Strict {
                return Err(busy(mount, child));
            }
            let timeout = self.registry.config().lock_timeout();
            for child in &children {
                self.close_mount(child, CloseMode::Cascade, Some(timeout))?;
            }
        }

        match (mount.parent(), mount.is_nested()) {
            (Some(parent), _) => self.close_nested(mount, &parent, timeout),
            (None, true) => {
                warn!(
                    "parent of {} is gone, discarding without flush",
                    mount.host_root().display()
                );
                self.discard_mount(mount);
                Ok(())
            }
            (None, false) => self.close_host(mount, timeout),
        }
    }

    fn close_host(&self, mount: &Arc<Mount>, timeout: Option<Duration>) -> VfsResult<()> {
        let mut state = match timeout {
            Some(timeout) => mount
                .try_write_for(timeout)
                .ok_or_else(|| VfsError::SubordinateMountBusy {
                    mount: mount.host_root().to_path_buf(),
                    child: mount.host_root().to_path_buf(),
                })?,
            None => mount.write(),
        };
        mount.ensure_open(&state)?;
        if let Some(child) = mount.children().first() {
            return Err(busy(mount, child));
        }

        state.phase = MountPhase::Closing;
        let result = if state.dirty {
            self.flush_host(mount, &state)
        } else {
            debug!("{} unmodified, leaving archive untouched", mount.host_root().display());
            Ok(())
        };
        self.finish(mount, &mut state, result)
    }

    fn close_nested(
        &self,
        mount: &Arc<Mount>,
        parent: &Arc<Mount>,
        timeout: Option<Duration>,
    ) -> VfsResult<()> {
        let (mut state, mut parent_state) = match timeout {
            Some(timeout) => try_write_pair_for(mount, parent, timeout)
                .ok_or_else(|| busy(parent, mount))?,
            None => write_pair(mount, parent),
        };
        mount.ensure_open(&state)?;
        parent.ensure_open(&parent_state)?;
        if let Some(child) = mount.children().first() {
            return Err(busy(mount, child));
        }

        state.phase = MountPhase::Closing;
        let result = if state.dirty {
            self.flush_nested(mount, &state, &mut parent_state)
        } else {
            Ok(())
        };
        self.finish(mount, &mut state, result)?;
        parent.remove_child(mount.id());
        Ok(())
    }

    /// Replay the log into a temp file beside the archive, then rename it
    /// over the archive.
    fn flush_host(&self, mount: &Mount, state: &MountState) -> VfsResult<()> {
        let backing = mount.backing_path();
        if !mount.backing_unchanged()? {
            return Err(VfsError::BackingModified(backing.to_path_buf()));
        }
        let parent = backing
            .parent()
            .ok_or_else(|| VfsError::InvalidPath(backing.display().to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix(&self.registry.config().temp_prefix)
            .suffix(".zip")
            .tempfile_in(parent)?;
        let mut writer =
            ArchiveWriter::new(temp.as_file_mut(), self.registry.config().write_options());
        state.log.replay_into(&state.base, backing, &mut writer)?;
        let written = writer.entries_written();
        writer.finish()?;
        temp.as_file().sync_all()?;
        fs::set_permissions(temp.path(), fs::metadata(backing)?.permissions())?;

        persist_tempfile(temp, backing)?;
        debug!(
            "flushed {} mutations into {} ({} entries)",
            state.log.len(),
            backing.display(),
            written
        );
        Ok(())
    }

    /// Serialize a nested archive and store it in the parent as a write.
    fn flush_nested(
        &self,
        mount: &Mount,
        state: &MountState,
        parent_state: &mut MountState,
    ) -> VfsResult<()> {
        let entry_path = mount
            .parent_entry()
            .ok_or_else(|| VfsError::InvalidPath(mount.host_root().display().to_string()))?
            .clone();

        let mut writer = ArchiveWriter::new(
            Cursor::new(Vec::new()),
            self.registry.config().write_options(),
        );
        state
            .log
            .replay_into(&state.base, mount.backing_path(), &mut writer)?;
        let data = Blob::from(writer.finish()?.into_inner());

        let modified = now();
        parent_state
            .index
            .insert(Entry::file(entry_path.clone(), data.clone(), modified))?;
        debug!("flushed nested {} ({} bytes)", entry_path, data.len());
        parent_state.record(Mutation::Write {
            path: entry_path,
            data,
            modified,
        });
        Ok(())
    }

    fn finish(
        &self,
        mount: &Mount,
        state: &mut RwLockWriteGuard<'_, MountState>,
        result: VfsResult<()>,
    ) -> VfsResult<()> {
        match result {
            Ok(()) => {
                state.phase = MountPhase::Closed;
                state.log.clear();
                state.dirty = false;
                self.registry.deregister(mount);
                info!("closed {}", mount.host_root().display());
                Ok(())
            }
            Err(err) => {
                state.phase = MountPhase::Open;
                warn!("close of {} failed: {}", mount.host_root().display(), err);
                Err(err)
            }
        }
    }

    /// Drop the mount at `root` and its descendants without flushing.
    pub fn discard(&self, root: &Path) -> VfsResult<()> {
        let mount = self.registry.mount_at(root)?;
        self.discard_mount(&mount);
        Ok(())
    }

    fn discard_mount(&self, mount: &Arc<Mount>) {
        for child in mount.children() {
            self.discard_mount(&child);
        }
        {
            let mut state = mount.write();
            state.phase = MountPhase::Closed;
            state.log.clear();
            state.dirty = false;
        }
        self.registry.deregister(mount);
        if let Some(parent) = mount.parent() {
            parent.remove_child(mount.id());
        }
        info!("discarded {}", mount.host_root().display());
    }
}

fn busy(mount: &Mount, child: &Mount) -> VfsError {
    VfsError::SubordinateMountBusy {
        mount: mount.host_root().to_path_buf(),
        child: child.host_root().to_path_buf(),
    }
}

fn persist_tempfile(temp: NamedTempFile, final_path: &Path) -> VfsResult<()> {
    temp.persist(final_path)
        .map(|_| ())
        .map_err(|err| VfsError::Io(err.error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VfsConfig;
    use tempfile::TempDir;
    use zipmount_format::ArchiveBuilder;

    fn fixture(dir: &TempDir) -> PathBuf {
        ArchiveBuilder::new()
            .with_file("Text.txt", "hello")
            .unwrap()
            .with_file("Folder/Inner.txt", "inner")
            .unwrap()
            .write_to(dir.path().join("Basic.zip"))
            .unwrap()
    }

    #[test]
    fn clean_close_leaves_bytes_untouched() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir);
        let before = fs::read(&path).unwrap();

        let registry = MountRegistry::new(VfsConfig::default());
        let engine = TransformEngine::new(&registry);
        let mount = engine.open(&path).unwrap();
        assert_eq!(mount.phase(), MountPhase::Open);
        engine.close(&path, CloseMode::Cascade).unwrap();

        assert_eq!(mount.phase(), MountPhase::Closed);
        assert!(registry.is_empty());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn opening_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir);
        let registry = MountRegistry::default();
        let engine = TransformEngine::new(&registry);
        engine.open(&path).unwrap();
        assert!(matches!(
            engine.open(&path),
            Err(VfsError::AlreadyMounted(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_alias_is_the_same_mount() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir);
        let alias = dir.path().join("Alias.zip");
        std::os::unix::fs::symlink(&path, &alias).unwrap();
        let registry = MountRegistry::default();
        let engine = TransformEngine::new(&registry);

        engine.open(&alias).unwrap();
        assert!(matches!(
            engine.open(&path),
            Err(VfsError::AlreadyMounted(root)) if root == alias
        ));
        assert_eq!(registry.len(), 1);
        engine.close(&alias, CloseMode::Cascade).unwrap();
        engine.open(&path).unwrap();
    }

    #[test]
    fn backing_modified_behind_the_mount_fails_close() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir);
        let registry = Arc::new(MountRegistry::default());
        let engine = TransformEngine::new(&registry);
        engine.open(&path).unwrap();

        let store = registry.store(&path).unwrap();
        store
            .write(&EntryPath::parse("New.txt").unwrap(), b"new")
            .unwrap();
        let replacement = ArchiveBuilder::new()
            .with_file("Other.txt", "a much longer replacement body")
            .unwrap()
            .to_bytes()
            .unwrap();
        fs::write(&path, &replacement).unwrap();

        let err = engine.close(&path, CloseMode::Cascade).unwrap_err();
        assert!(matches!(err, VfsError::BackingModified(_)));
        let mount = registry.mount_at(&path).unwrap();
        assert_eq!(mount.phase(), MountPhase::Open);
        assert_eq!(fs::read(&path).unwrap(), replacement);
    }

    #[test]
    fn discard_drops_pending_mutations() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir);
        let before = fs::read(&path).unwrap();
        let registry = Arc::new(MountRegistry::default());
        let engine = TransformEngine::new(&registry);
        engine.open(&path).unwrap();
        registry
            .store(&path)
            .unwrap()
            .delete(&EntryPath::parse("Folder").unwrap(), true)
            .unwrap();

        engine.discard(&path).unwrap();
        assert!(!registry.is_mounted(&path));
        assert_eq!(fs::read(&path).unwrap(), before);
    }
}
