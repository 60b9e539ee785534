//! Host-path front end that routes every call to the right store.

use crate::file_store::{ByteSink, FileInfo, FileKind, FileStore, Subtree};
use crate::local::LocalFileStore;
use crate::mount::Mount;
use crate::registry::PathKind;
use crate::store::{ArchiveFileStore, Transfer};
use crate::transform::{CloseMode, TransformEngine};
use crate::{MountRegistry, VfsConfig, VfsError, VfsResult};
use log::{debug, warn};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use zipmount_format::EntryPath;

/// Attempts made when a mount closes between resolving a path and locking it.
const RESOLVE_ATTEMPTS: usize = 4;

/// File store over absolute host paths, with open archives appearing as
/// directories.
#[derive(Debug, Clone)]
pub struct Vfs {
    registry: Arc<MountRegistry>,
    local: LocalFileStore,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new(VfsConfig::default())
    }
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Self {
        Self::with_registry(MountRegistry::shared(config))
    }

    pub fn with_registry(registry: Arc<MountRegistry>) -> Self {
        let local = LocalFileStore::new(registry.config().temp_prefix.clone());
        Self { registry, local }
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    pub fn open(&self, host_file: &Path) -> VfsResult<Arc<Mount>> {
        self.registry.open(host_file)
    }

    /// Flush and unmount, closing nested mounts first.
    pub fn close(&self, root: &Path) -> VfsResult<()> {
        self.registry.close(root)
    }

    /// Flush and unmount; fails while a nested mount is still open.
    pub fn close_strict(&self, root: &Path) -> VfsResult<()> {
        TransformEngine::new(&self.registry).close(root, CloseMode::Strict)
    }

    pub fn close_all(&self) -> VfsResult<()> {
        self.registry.close_all()
    }

    /// Store over the mount registered at `root`.
    pub fn store(&self, root: &Path) -> VfsResult<ArchiveFileStore> {
        self.registry.store(root)
    }

    fn archive(&self, mount: &Mount) -> ArchiveFileStore {
        ArchiveFileStore::new(Arc::clone(&self.registry), mount.host_root().to_path_buf())
    }

    fn resolve(&self, path: &Path) -> VfsResult<PathKind> {
        self.registry.resolve(path)
    }

    /// Run `op` again when the mount it resolved to went away mid-call.
    fn retrying<T>(&self, mut op: impl FnMut() -> VfsResult<T>) -> VfsResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(VfsError::MountClosed(root)) | Err(VfsError::NotMounted(root))
                    if attempt < RESOLVE_ATTEMPTS =>
                {
                    debug!("{} went away during the call, resolving again", root.display());
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Reject plain-path operations that would swallow an open mount.
    fn ensure_no_mount_under(&self, path: &Path) -> VfsResult<()> {
        match self.registry.mounts_under(path).first() {
            Some(mount) => Err(VfsError::OpenMountInPath {
                path: path.display().to_string(),
                mount: mount.host_root().to_path_buf(),
            }),
            None => Ok(()),
        }
    }

    fn export(&self, kind: &PathKind) -> VfsResult<Subtree> {
        match kind {
            PathKind::Plain(path) => self.local.export_subtree(path),
            PathKind::MountRoot(mount) => self.archive(mount).export_subtree(&EntryPath::root()),
            PathKind::InsideMount(mount, entry) => self.archive(mount).export_subtree(entry),
        }
    }

    fn import(&self, kind: &PathKind, subtree: Subtree, transfer: Transfer) -> VfsResult<()> {
        match kind {
            PathKind::Plain(path) => self.local.import_subtree(path, &subtree),
            PathKind::MountRoot(mount) => {
                Err(VfsError::AlreadyExists(mount.host_root().display().to_string()))
            }
            PathKind::InsideMount(mount, entry) => {
                self.archive(mount).import_subtree(entry, subtree, transfer)
            }
        }
    }

    fn remove(&self, kind: &PathKind) -> VfsResult<()> {
        match kind {
            PathKind::Plain(path) => self.local.delete(path, true),
            PathKind::MountRoot(mount) => self.delete_mount_root(mount, true),
            PathKind::InsideMount(mount, entry) => self.archive(mount).delete(entry, true),
        }
    }

    /// Discard the mount, then remove the archive file it came from.
    fn delete_mount_root(&self, mount: &Arc<Mount>, recursive: bool) -> VfsResult<()> {
        let root = mount.host_root().to_path_buf();
        if !recursive && !self.archive(mount).children(&EntryPath::root())?.is_empty() {
            return Err(VfsError::DirectoryNotEmpty(root.display().to_string()));
        }
        TransformEngine::new(&self.registry).discard(&root)?;
        match self.resolve(&root)? {
            PathKind::Plain(path) => self.local.delete(&path, false),
            PathKind::InsideMount(parent, entry) => self.archive(&parent).delete(&entry, false),
            PathKind::MountRoot(_) => Err(VfsError::AlreadyMounted(root)),
        }
    }

    /// Close the mount at `from`, move its archive file, and reopen it at a
    /// plain destination.
    fn move_mount_root(&self, mount: &Mount, from: &Path, to: &Path, reopen: bool) -> VfsResult<()> {
        self.registry.close(mount.host_root())?;
        self.move_path(from, to)?;
        if reopen {
            self.open(to)?;
        }
        Ok(())
    }

    /// Move across stores: import at the target first, remove the source only
    /// after the target committed.
    fn transfer(&self, source: &PathKind, target: &PathKind) -> VfsResult<()> {
        let subtree = self.export(source)?;
        debug!(
            "moving {} items ({} bytes) across stores",
            subtree.len(),
            subtree.total_bytes()
        );
        self.import(target, subtree, Transfer::Move)?;
        if let Err(err) = self.remove(source) {
            warn!("source removal failed after move, rolling back: {}", err);
            if let Err(rollback) = self.remove(target) {
                warn!("rollback of moved content failed: {}", rollback);
            }
            return Err(err);
        }
        Ok(())
    }
}

impl FileStore for Vfs {
    fn stat(&self, path: &Path) -> VfsResult<FileInfo> {
        self.retrying(|| match self.resolve(path)? {
            PathKind::Plain(path) => self.local.stat(&path),
            PathKind::MountRoot(mount) => self.archive(&mount).stat(&EntryPath::root()),
            PathKind::InsideMount(mount, entry) => self.archive(&mount).stat(&entry),
        })
    }

    fn children(&self, path: &Path) -> VfsResult<Vec<FileInfo>> {
        self.retrying(|| match self.resolve(path)? {
            PathKind::Plain(path) => {
                let mut children = self.local.children(&path)?;
                for child in children.iter_mut().filter(|child| child.is_file()) {
                    if self.registry.is_mounted(&path.join(&child.name)) {
                        child.kind = FileKind::Directory;
                        child.size = 0;
                    }
                }
                Ok(children)
            }
            PathKind::MountRoot(mount) => self.archive(&mount).children(&EntryPath::root()),
            PathKind::InsideMount(mount, entry) => self.archive(&mount).children(&entry),
        })
    }

    fn open_read(&self, path: &Path) -> VfsResult<Box<dyn Read + '_>> {
        self.retrying(|| match self.resolve(path)? {
            PathKind::Plain(path) => self.local.open_read(&path),
            PathKind::MountRoot(mount) => Err(VfsError::IsADirectory(
                mount.host_root().display().to_string(),
            )),
            PathKind::InsideMount(mount, entry) => {
                let stream: Box<dyn Read + '_> = Box::new(self.archive(&mount).read(&entry)?);
                Ok(stream)
            }
        })
    }

    fn open_write(&self, path: &Path, truncate: bool) -> VfsResult<Box<dyn ByteSink + '_>> {
        self.retrying(|| match self.resolve(path)? {
            PathKind::Plain(path) => self.local.open_write(&path, truncate),
            PathKind::MountRoot(mount) => Err(VfsError::IsADirectory(
                mount.host_root().display().to_string(),
            )),
            PathKind::InsideMount(mount, entry) => {
                let sink: Box<dyn ByteSink + '_> =
                    Box::new(self.archive(&mount).open_write(&entry, truncate)?);
                Ok(sink)
            }
        })
    }

    fn mkdir(&self, path: &Path) -> VfsResult<()> {
        self.retrying(|| match self.resolve(path)? {
            PathKind::Plain(path) => self.local.mkdir(&path),
            PathKind::MountRoot(_) => Ok(()),
            PathKind::InsideMount(mount, entry) => self.archive(&mount).mkdir(&entry),
        })
    }

    fn delete(&self, path: &Path, recursive: bool) -> VfsResult<()> {
        self.retrying(|| match self.resolve(path)? {
            PathKind::Plain(path) => {
                self.ensure_no_mount_under(&path)?;
                self.local.delete(&path, recursive)
            }
            PathKind::MountRoot(mount) => self.delete_mount_root(&mount, recursive),
            PathKind::InsideMount(mount, entry) => self.archive(&mount).delete(&entry, recursive),
        })
    }

    fn move_path(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.retrying(|| {
            let source = self.resolve(from)?;
            let target = self.resolve(to)?;
            match (&source, &target) {
                (_, PathKind::MountRoot(mount)) => Err(VfsError::AlreadyExists(
                    mount.host_root().display().to_string(),
                )),
                (PathKind::MountRoot(mount), PathKind::Plain(_)) => {
                    self.move_mount_root(mount, from, to, true)
                }
                (PathKind::MountRoot(mount), PathKind::InsideMount(..)) => {
                    self.move_mount_root(mount, from, to, false)
                }
                (PathKind::Plain(a), PathKind::Plain(b)) => {
                    self.ensure_no_mount_under(a)?;
                    self.local.move_path(a, b)
                }
                (PathKind::InsideMount(m1, e1), PathKind::InsideMount(m2, e2)) => {
                    ArchiveFileStore::move_across_mounts(&self.archive(m1), e1, &self.archive(m2), e2)
                }
                (PathKind::Plain(a), PathKind::InsideMount(..)) => {
                    self.ensure_no_mount_under(a)?;
                    self.transfer(&source, &target)
                }
                (PathKind::InsideMount(..), PathKind::Plain(_)) => self.transfer(&source, &target),
            }
        })
    }

    fn copy_path(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.retrying(|| {
            let source = self.resolve(from)?;
            let target = self.resolve(to)?;
            match (&source, &target) {
                (_, PathKind::MountRoot(mount)) => Err(VfsError::AlreadyExists(
                    mount.host_root().display().to_string(),
                )),
                (PathKind::Plain(a), PathKind::Plain(b)) => {
                    if let Some(mount) = self.registry.mounts_under(a).first() {
                        warn!(
                            "copying {} while {} is open copies its last flushed state",
                            a.display(),
                            mount.host_root().display()
                        );
                    }
                    self.local.copy_path(a, b)
                }
                (PathKind::InsideMount(m1, e1), PathKind::InsideMount(m2, e2))
                    if m1.id() == m2.id() =>
                {
                    self.archive(m1).copy(e1, e2)
                }
                _ => {
                    let subtree = self.export(&source)?;
                    self.import(&target, subtree, Transfer::Copy)
                }
            }
        })
    }
}
