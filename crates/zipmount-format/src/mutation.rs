//! Pending mutations of a mounted archive.
//!
//! The live [`EntryIndex`] of a mount is updated eagerly; the log keeps the
//! same operations so the final archive can be reproduced from the snapshot
//! taken at open time.

use crate::entry::{Blob, Entry};
use crate::writer::{write_index, ArchiveSink};
use crate::{EntryIndex, EntryPath, Result};
use chrono::NaiveDateTime;
use log::debug;
use std::path::Path;

/// One recorded structural operation.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// A new file or directory. An existing entry at the path is replaced.
    Create(Entry),
    /// Replace the content of a file, creating it when absent.
    Write {
        path: EntryPath,
        data: Blob,
        modified: NaiveDateTime,
    },
    /// Remove an entry and its subtree.
    Delete(EntryPath),
    /// Rename inside the same archive.
    Rename { from: EntryPath, to: EntryPath },
    /// A subtree arriving from another store; entries carry final paths.
    MoveIn { root: EntryPath, entries: Vec<Entry> },
    /// A subtree leaving for another store.
    MoveOut(EntryPath),
}

impl Mutation {
    /// Primary path touched by the operation.
    pub fn path(&self) -> &EntryPath {
        match self {
            Mutation::Create(entry) => &entry.path,
            Mutation::Write { path, .. } => path,
            Mutation::Delete(path) | Mutation::MoveOut(path) => path,
            Mutation::Rename { to, .. } => to,
            Mutation::MoveIn { root, .. } => root,
        }
    }

    fn apply(&self, index: &mut EntryIndex) -> Result<()> {
        match self {
            Mutation::Create(entry) => {
                index.insert(entry.clone())?;
            }
            Mutation::Write {
                path,
                data,
                modified,
            } => {
                index.insert(Entry::file(path.clone(), data.clone(), *modified))?;
            }
            Mutation::Delete(path) | Mutation::MoveOut(path) => {
                if index.contains(path) {
                    index.remove(path)?;
                } else {
                    debug!("replay: {} already absent", path);
                }
            }
            Mutation::Rename { from, to } => {
                if !index.contains(from) {
                    debug!("replay: rename source {} absent", from);
                    return Ok(());
                }
                if index.contains(to) {
                    index.remove(to)?;
                }
                index.rename(from, to)?;
            }
            Mutation::MoveIn { root, entries } => {
                if index.contains(root) {
                    index.remove(root)?;
                }
                for entry in entries {
                    index.insert(entry.clone())?;
                }
            }
        }
        Ok(())
    }
}

/// Append-only list of mutations for one mount.
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    ops: Vec<Mutation>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, op: Mutation) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.ops.iter()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Fold every recorded operation over `base` in order.
    pub fn replay(&self, base: &EntryIndex) -> Result<EntryIndex> {
        let mut index = base.clone();
        for op in &self.ops {
            op.apply(&mut index)?;
        }
        Ok(index)
    }

    /// Replay over `base` and emit the result into `sink`.
    ///
    /// Unmodified entries are decoded from `backing`, the archive `base` was
    /// built from.
    pub fn replay_into(
        &self,
        base: &EntryIndex,
        backing: &Path,
        sink: &mut dyn ArchiveSink,
    ) -> Result<()> {
        let index = self.replay(base)?;
        write_index(&index, backing, sink)
    }
}
