use crate::mount::{Mount, MountId};
use crate::store::ArchiveFileStore;
use crate::transform::{CloseMode, TransformEngine};
use crate::{VfsConfig, VfsError, VfsResult};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zipmount_format::EntryPath;

/// Where a host path lands relative to the open mounts.
#[derive(Debug, Clone)]
pub enum PathKind {
    /// Not covered by any mount.
    Plain(PathBuf),
    /// The host location of an open archive.
    MountRoot(Arc<Mount>),
    /// An entry path inside the deepest covering mount.
    InsideMount(Arc<Mount>, EntryPath),
}

/// Table of open mounts keyed by normalized host root.
///
/// The table lock is only held for lookups and updates of the map itself,
/// never while a mount lock is being acquired.
#[derive(Debug)]
pub struct MountRegistry {
    config: VfsConfig,
    mounts: RwLock<HashMap<PathBuf, Arc<Mount>>>,
    next_id: AtomicU64,
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new(VfsConfig::default())
    }
}

impl MountRegistry {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            config,
            mounts: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn shared(config: VfsConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Classify a host path, walking outwards from the path itself so the
    /// deepest covering mount wins.
    pub fn resolve(&self, path: &Path) -> VfsResult<PathKind> {
        let path = normalize_host_path(path)?;
        let found = {
            let mounts = self.mounts.read();
            path.ancestors()
                .find_map(|ancestor| mounts.get(ancestor).map(|m| (ancestor, m.clone())))
                .map(|(ancestor, mount)| (ancestor.to_path_buf(), mount))
        };

        match found {
            None => Ok(PathKind::Plain(path)),
            Some((root, mount)) if root == path => Ok(PathKind::MountRoot(mount)),
            Some((root, mount)) => {
                let relative = path
                    .strip_prefix(&root)
                    .map_err(|_| VfsError::InvalidPath(path.display().to_string()))?;
                let entry = EntryPath::from_host(relative)?;
                Ok(PathKind::InsideMount(mount, entry))
            }
        }
    }

    pub fn get(&self, root: &Path) -> Option<Arc<Mount>> {
        let root = normalize_host_path(root).ok()?;
        self.mounts.read().get(&root).cloned()
    }

    /// Mount registered exactly at `root`.
    pub fn mount_at(&self, root: &Path) -> VfsResult<Arc<Mount>> {
        self.get(root)
            .ok_or_else(|| VfsError::NotMounted(root.to_path_buf()))
    }

    pub fn is_mounted(&self, root: &Path) -> bool {
        self.get(root).is_some()
    }

    /// All open mounts, ordered by host root.
    pub fn mounts(&self) -> Vec<Arc<Mount>> {
        let mut mounts: Vec<_> = self.mounts.read().values().cloned().collect();
        mounts.sort_by(|a, b| a.host_root().cmp(b.host_root()));
        mounts
    }

    /// Open mounts located at or below `path`.
    pub fn mounts_under(&self, path: &Path) -> Vec<Arc<Mount>> {
        let Ok(path) = normalize_host_path(path) else {
            return Vec::new();
        };
        self.mounts()
            .into_iter()
            .filter(|mount| mount.host_root().starts_with(&path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.read().is_empty()
    }

    /// File store over the mount at `root`; resolved again on every call.
    pub fn store(self: &Arc<Self>, root: &Path) -> VfsResult<ArchiveFileStore> {
        let root = normalize_host_path(root)?;
        Ok(ArchiveFileStore::new(Arc::clone(self), root))
    }

    /// Present the archive at `host_file` as a directory.
    pub fn open(&self, host_file: &Path) -> VfsResult<Arc<Mount>> {
        TransformEngine::new(self).open(host_file)
    }

    /// Flush and unmount the archive at `root`, closing nested mounts first.
    pub fn close(&self, root: &Path) -> VfsResult<()> {
        TransformEngine::new(self).close(root, CloseMode::Cascade)
    }

    /// Close every top-level mount. Stops at the first failure.
    pub fn close_all(&self) -> VfsResult<()> {
        let engine = TransformEngine::new(self);
        for mount in self.mounts() {
            if mount.is_nested() || !self.is_mounted(mount.host_root()) {
                continue;
            }
            engine.close(mount.host_root(), CloseMode::Cascade)?;
        }
        Ok(())
    }

    pub(crate) fn next_id(&self) -> MountId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, mount: Arc<Mount>) -> VfsResult<()> {
        let mut mounts = self.mounts.write();
        let root = mount.host_root().to_path_buf();
        if mounts.contains_key(&root) {
            return Err(VfsError::AlreadyMounted(root));
        }
        if !mount.is_nested() {
            let backing = mount.backing_path();
            if let Some(existing) = mounts
                .values()
                .find(|other| !other.is_nested() && other.backing_path() == backing)
            {
                return Err(VfsError::AlreadyMounted(existing.host_root().to_path_buf()));
            }
        }
        debug!("register mount {} at {}", mount.id(), root.display());
        mounts.insert(root, mount);
        Ok(())
    }

    pub(crate) fn deregister(&self, mount: &Mount) {
        let mut mounts = self.mounts.write();
        if mounts
            .get(mount.host_root())
            .is_some_and(|current| current.id() == mount.id())
        {
            debug!(
                "deregister mount {} at {}",
                mount.id(),
                mount.host_root().display()
            );
            mounts.remove(mount.host_root());
        }
    }
}

/// Make a host path absolute and fold `.` and `..` lexically.
pub fn normalize_host_path(path: &Path) -> VfsResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(VfsError::InvalidPath(path.display().to_string()));
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_relative_segments() {
        let path = normalize_host_path(Path::new("/data/./archives/../a.zip")).unwrap();
        assert_eq!(path, PathBuf::from("/data/a.zip"));
        assert!(normalize_host_path(Path::new("relative.zip"))
            .unwrap()
            .is_absolute());
    }

    #[test]
    fn unmounted_paths_resolve_as_plain() {
        let registry = MountRegistry::default();
        match registry.resolve(Path::new("/data/a.zip/inner")).unwrap() {
            PathKind::Plain(path) => assert_eq!(path, PathBuf::from("/data/a.zip/inner")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            registry.mount_at(Path::new("/data/a.zip")),
            Err(VfsError::NotMounted(_))
        ));
    }
}
