//! Live mounts and their reader/writer guard.
//!
//! Each [`Mount`] owns its entry index and mutation log behind one
//! `parking_lot::RwLock`. Reads share the lock; structural mutations, open and
//! close take it exclusively. When two mounts must be locked together they are
//! always locked in host-root order.

use crate::{VfsError, VfsResult};
use chrono::NaiveDateTime;
use parking_lot::{
    ArcRwLockReadGuard, Mutex, RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use zipmount_format::{EntryIndex, EntryPath, Mutation, MutationLog};

/// Process-unique identifier of a mount.
pub type MountId = u64;

/// Lifecycle of a mount.
///
/// `Closed -> Opening -> Open -> Closing -> Closed`; a failed open returns to
/// `Closed` and a failed close returns to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPhase {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Length and modification time of a backing archive, taken at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackingFingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl BackingFingerprint {
    pub(crate) fn of(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Everything guarded by the mount lock.
#[derive(Debug)]
pub(crate) struct MountState {
    pub(crate) phase: MountPhase,
    /// Index as it was when the mount opened; the log replays over it.
    pub(crate) base: EntryIndex,
    pub(crate) index: EntryIndex,
    pub(crate) log: MutationLog,
    pub(crate) dirty: bool,
}

impl MountState {
    pub(crate) fn new(index: EntryIndex) -> Self {
        Self {
            phase: MountPhase::Opening,
            base: index.clone(),
            index,
            log: MutationLog::new(),
            dirty: false,
        }
    }

    pub(crate) fn record(&mut self, op: Mutation) {
        self.log.record(op);
        self.dirty = true;
    }
}

/// Where the archive bytes of a mount live.
#[derive(Debug)]
pub(crate) enum Backing {
    /// A regular file on the host filesystem.
    Host(PathBuf),
    /// Private copy of an archive stored inside another mount.
    Nested(TempPath),
}

#[derive(Debug)]
pub(crate) struct ParentLink {
    pub(crate) mount: Weak<Mount>,
    pub(crate) entry: EntryPath,
}

/// An archive currently presented as a directory.
#[derive(Debug)]
pub struct Mount {
    id: MountId,
    host_root: PathBuf,
    backing: Backing,
    parent: Option<ParentLink>,
    children: Mutex<Vec<Weak<Mount>>>,
    state: Arc<RwLock<MountState>>,
    fingerprint: Option<BackingFingerprint>,
    opened_at: NaiveDateTime,
}

impl Mount {
    pub(crate) fn new(
        id: MountId,
        host_root: PathBuf,
        backing: Backing,
        parent: Option<ParentLink>,
        index: EntryIndex,
    ) -> io::Result<Self> {
        let fingerprint = match &backing {
            Backing::Host(path) => Some(BackingFingerprint::of(path)?),
            Backing::Nested(_) => None,
        };
        Ok(Self {
            id,
            host_root,
            backing,
            parent,
            children: Mutex::new(Vec::new()),
            state: Arc::new(RwLock::new(MountState::new(index))),
            fingerprint,
            opened_at: chrono::Local::now().naive_local(),
        })
    }

    pub fn id(&self) -> MountId {
        self.id
    }

    /// Host location at which the archive appears as a directory.
    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// File the entry index was built from.
    pub fn backing_path(&self) -> &Path {
        match &self.backing {
            Backing::Host(path) => path.as_path(),
            Backing::Nested(temp) => &**temp,
        }
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Enclosing mount of a nested archive, if it is still alive.
    pub fn parent(&self) -> Option<Arc<Mount>> {
        self.parent.as_ref().and_then(|link| link.mount.upgrade())
    }

    /// Path of this archive inside its parent mount.
    pub fn parent_entry(&self) -> Option<&EntryPath> {
        self.parent.as_ref().map(|link| &link.entry)
    }

    pub fn opened_at(&self) -> NaiveDateTime {
        self.opened_at
    }

    pub fn phase(&self) -> MountPhase {
        self.read().phase
    }

    /// Whether any mutation happened since the mount opened.
    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    pub fn pending_mutations(&self) -> usize {
        self.read().log.len()
    }

    /// Live nested mounts opened from entries of this mount.
    pub fn children(&self) -> Vec<Arc<Mount>> {
        let mut children = self.children.lock();
        children.retain(|child| child.strong_count() > 0);
        children.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn add_child(&self, child: &Arc<Mount>) {
        self.children.lock().push(Arc::downgrade(child));
    }

    pub(crate) fn remove_child(&self, id: MountId) {
        self.children
            .lock()
            .retain(|child| child.upgrade().is_some_and(|mount| mount.id != id));
    }

    /// Nested mount whose entry lies at or below `path`.
    pub(crate) fn nested_mount_under(&self, path: &EntryPath) -> Option<Arc<Mount>> {
        self.children().into_iter().find(|child| {
            child
                .parent_entry()
                .is_some_and(|entry| entry.starts_with(path))
        })
    }

    /// Reject mutations of `path` while a nested mount lives below it.
    pub(crate) fn ensure_no_nested_mount(&self, path: &EntryPath) -> VfsResult<()> {
        match self.nested_mount_under(path) {
            Some(child) => Err(VfsError::OpenMountInPath {
                path: path.to_string(),
                mount: child.host_root.clone(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn backing_unchanged(&self) -> io::Result<bool> {
        match (&self.backing, &self.fingerprint) {
            (Backing::Host(path), Some(fingerprint)) => {
                Ok(BackingFingerprint::of(path)? == *fingerprint)
            }
            _ => Ok(true),
        }
    }

    pub(crate) fn ensure_open(&self, state: &MountState) -> VfsResult<()> {
        if state.phase == MountPhase::Open {
            Ok(())
        } else {
            Err(VfsError::MountClosed(self.host_root.clone()))
        }
    }

    /// Shared guard. Recursive so a thread holding an open stream can still
    /// stat and list while a writer is queued.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, MountState> {
        self.state.read_recursive()
    }

    /// Shared guard that can outlive the borrow of the mount, for streams.
    pub(crate) fn read_arc(&self) -> ArcRwLockReadGuard<RawRwLock, MountState> {
        self.state.read_arc_recursive()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, MountState> {
        self.state.write()
    }

    pub(crate) fn try_write_for(
        &self,
        timeout: Duration,
    ) -> Option<RwLockWriteGuard<'_, MountState>> {
        self.state.try_write_for(timeout)
    }
}

/// Exclusive guards on two distinct mounts, acquired in host-root order.
///
/// The guards are returned in argument order.
pub(crate) fn write_pair<'a>(
    first: &'a Mount,
    second: &'a Mount,
) -> (
    RwLockWriteGuard<'a, MountState>,
    RwLockWriteGuard<'a, MountState>,
) {
    if first.host_root <= second.host_root {
        let a = first.write();
        let b = second.write();
        (a, b)
    } else {
        let b = second.write();
        let a = first.write();
        (a, b)
    }
}

/// Like [`write_pair`] but gives up after `timeout` on either lock.
pub(crate) fn try_write_pair_for<'a>(
    first: &'a Mount,
    second: &'a Mount,
    timeout: Duration,
) -> Option<(
    RwLockWriteGuard<'a, MountState>,
    RwLockWriteGuard<'a, MountState>,
)> {
    if first.host_root <= second.host_root {
        let a = first.try_write_for(timeout)?;
        let b = second.try_write_for(timeout)?;
        Some((a, b))
    } else {
        let b = second.try_write_for(timeout)?;
        let a = first.try_write_for(timeout)?;
        Some((a, b))
    }
}
