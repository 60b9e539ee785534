//! In-memory table of archive entries.

use crate::central::{read_central_directory, CentralRecord};
use crate::entry::{dos_to_datetime, ArchiveSlice, CompressionMethod, DataSource, Entry, EntryKind};
use crate::{EntryPath, Error, Result};
use chrono::NaiveDateTime;
use log::debug;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Bound;
use std::path::Path;

/// Entries of one archive keyed by normalized path.
///
/// Every proper prefix of a stored path has a directory entry, synthesized
/// when the archive omits it. The root itself is not stored.
#[derive(Debug, Clone, Default)]
pub struct EntryIndex {
    entries: BTreeMap<String, Entry>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from the central directory of the archive at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(&mut BufReader::new(file))
    }

    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let records = read_central_directory(reader)?;
        Self::from_records(records)
    }

    /// Build the index from parsed central directory records.
    pub fn from_records(records: Vec<CentralRecord>) -> Result<Self> {
        let mut index = Self::new();
        for record in records {
            if record.is_encrypted() {
                return Err(Error::Encrypted(record.raw_name));
            }
            let path = EntryPath::parse(&record.raw_name)
                .map_err(|_| Error::Format(format!("invalid entry name {:?}", record.raw_name)))?;
            if path.is_root() {
                debug!("skipping root marker {:?}", record.raw_name);
                continue;
            }
            let modified = dos_to_datetime(record.dos_date, record.dos_time);

            let entry = if record.is_dir() {
                Entry::directory(path, modified)
            } else {
                let method = CompressionMethod::from_u16(record.method).ok_or_else(|| {
                    Error::UnsupportedCompression {
                        name: record.raw_name.clone(),
                        method: record.method,
                    }
                })?;
                Entry {
                    path,
                    kind: EntryKind::File,
                    size: record.size,
                    modified,
                    source: DataSource::Archive(ArchiveSlice {
                        header_offset: record.header_offset,
                        compressed_size: record.compressed_size,
                        size: record.size,
                        method,
                        crc32: record.crc32,
                    }),
                    implicit: false,
                }
            };
            index.insert_parsed(entry)?;
        }
        debug!("indexed {} entries", index.len());
        Ok(index)
    }

    fn insert_parsed(&mut self, entry: Entry) -> Result<()> {
        match self.entries.get(entry.path.as_str()) {
            Some(existing) if existing.implicit && entry.is_dir() => {}
            Some(existing) if existing.implicit => {
                return Err(Error::Format(format!(
                    "{} is both a file and a directory",
                    entry.path
                )));
            }
            Some(_) => return Err(Error::DuplicateEntry(entry.path.to_string())),
            None => {}
        }
        self.ensure_ancestors(&entry.path, entry.modified)
            .map_err(|_| Error::Format(format!("{} is nested below a file", entry.path)))?;
        self.entries.insert(entry.path.as_str().to_string(), entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, path: &EntryPath) -> Option<&Entry> {
        self.entries.get(path.as_str())
    }

    pub fn contains(&self, path: &EntryPath) -> bool {
        path.is_root() || self.entries.contains_key(path.as_str())
    }

    /// Whether `path` is the root or a directory entry.
    pub fn is_dir(&self, path: &EntryPath) -> bool {
        path.is_root() || self.lookup(path).is_some_and(Entry::is_dir)
    }

    /// Direct children of a directory, in path order.
    ///
    /// Grandchildren are skipped with a range jump instead of being visited.
    pub fn children(&self, path: &EntryPath) -> Result<Vec<&Entry>> {
        if !path.is_root() {
            match self.lookup(path) {
                None => return Err(Error::NotFound(path.to_string())),
                Some(entry) if !entry.is_dir() => {
                    return Err(Error::NotADirectory(path.to_string()))
                }
                Some(_) => {}
            }
        }

        let prefix = path.subtree_prefix();
        let mut children = Vec::new();
        let mut cursor = Bound::Included(prefix.clone());
        loop {
            let next = self
                .entries
                .range::<String, _>((cursor.clone(), Bound::Unbounded))
                .next();
            let Some((key, entry)) = next else { break };
            let Some(rest) = key.strip_prefix(&prefix) else { break };
            match rest.find('/') {
                None => {
                    children.push(entry);
                    cursor = Bound::Excluded(key.clone());
                }
                Some(idx) => {
                    // Entries below `prefix + segment` sort before `prefix + segment + '0'`.
                    cursor = Bound::Included(format!("{}{}0", prefix, &rest[..idx]));
                }
            }
        }
        Ok(children)
    }

    /// Whether a directory has at least one child.
    pub fn has_children(&self, path: &EntryPath) -> bool {
        let prefix = path.subtree_prefix();
        self.entries
            .range::<String, _>((Bound::Included(prefix.clone()), Bound::Unbounded))
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    /// Every entry strictly below `path`, in path order.
    pub fn descendants(&self, path: &EntryPath) -> Vec<&Entry> {
        if path.is_root() {
            return self.entries.values().collect();
        }
        let start = path.subtree_prefix();
        let end = format!("{}0", path.as_str());
        self.entries
            .range::<String, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Insert an entry, synthesizing missing ancestor directories.
    ///
    /// An existing entry at the path is replaced. Replacing a directory with a
    /// file drops the directory's subtree; replacing a directory with a
    /// directory keeps its children.
    pub fn insert(&mut self, entry: Entry) -> Result<Option<Entry>> {
        if entry.path.is_root() {
            return Err(Error::InvalidPath("cannot insert the archive root".to_string()));
        }
        self.ensure_ancestors(&entry.path, entry.modified)?;
        if entry.is_file() && self.is_dir(&entry.path) {
            self.remove_descendants(&entry.path);
        }
        Ok(self.entries.insert(entry.path.as_str().to_string(), entry))
    }

    /// Remove an entry and, for directories, its whole subtree.
    ///
    /// Returns the removed entries with the requested entry first.
    pub fn remove(&mut self, path: &EntryPath) -> Result<Vec<Entry>> {
        if path.is_root() {
            return Err(Error::InvalidPath("cannot remove the archive root".to_string()));
        }
        let entry = self
            .entries
            .remove(path.as_str())
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let mut removed = vec![entry];
        removed.extend(self.remove_descendants(path));
        Ok(removed)
    }

    fn remove_descendants(&mut self, path: &EntryPath) -> Vec<Entry> {
        let keys: Vec<String> = self
            .descendants(path)
            .into_iter()
            .map(|entry| entry.path.as_str().to_string())
            .collect();
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    /// Move an entry and rewrite the prefix of every descendant.
    pub fn rename(&mut self, from: &EntryPath, to: &EntryPath) -> Result<()> {
        if from.is_root() || to.is_root() {
            return Err(Error::InvalidPath("cannot rename the archive root".to_string()));
        }
        if from == to {
            return if self.contains(from) {
                Ok(())
            } else {
                Err(Error::NotFound(from.to_string()))
            };
        }
        if to.starts_with(from) {
            return Err(Error::InvalidPath(format!("cannot move {from} into itself")));
        }
        if !self.contains(from) {
            return Err(Error::NotFound(from.to_string()));
        }
        if self.contains(to) {
            return Err(Error::AlreadyExists(to.to_string()));
        }
        if let Some(parent) = to.parent() {
            if let Some(entry) = self.lookup(&parent) {
                if !entry.is_dir() {
                    return Err(Error::NotADirectory(parent.to_string()));
                }
            }
        }

        let moved = self.remove(from)?;
        let modified = moved[0].modified;
        self.ensure_ancestors(to, modified)?;
        for entry in moved {
            let path = entry
                .path
                .rebase(from, to)
                .ok_or_else(|| Error::InvalidPath(entry.path.to_string()))?;
            self.entries
                .insert(path.as_str().to_string(), entry.relocated(path));
        }
        Ok(())
    }

    /// Entries in path order; parents always precede their children.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn paths(&self) -> Vec<EntryPath> {
        self.entries.values().map(|entry| entry.path.clone()).collect()
    }

    fn ensure_ancestors(&mut self, path: &EntryPath, modified: NaiveDateTime) -> Result<()> {
        for ancestor in path.ancestors() {
            match self.entries.get(ancestor.as_str()) {
                Some(entry) if entry.is_dir() => {}
                Some(_) => return Err(Error::NotADirectory(ancestor.to_string())),
                None => {
                    self.entries.insert(
                        ancestor.as_str().to_string(),
                        Entry::implicit_directory(ancestor.clone(), modified),
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::dos_epoch;
    use std::sync::Arc;

    fn path(raw: &str) -> EntryPath {
        EntryPath::parse(raw).unwrap()
    }

    fn file(raw: &str, data: &str) -> Entry {
        Entry::file(path(raw), Arc::from(data.as_bytes()), dos_epoch())
    }

    fn names(entries: Vec<&Entry>) -> Vec<String> {
        entries.iter().map(|e| e.path.to_string()).collect()
    }

    #[test]
    fn insert_synthesizes_ancestors() {
        let mut index = EntryIndex::new();
        index.insert(file("a/b/c.txt", "c")).unwrap();

        let a = index.lookup(&path("a")).unwrap();
        assert!(a.is_dir());
        assert!(a.implicit);
        assert!(index.lookup(&path("a/b")).unwrap().is_dir());
        assert_eq!(names(index.children(&EntryPath::root()).unwrap()), vec!["a"]);
    }

    #[test]
    fn children_skip_grandchildren() {
        let mut index = EntryIndex::new();
        for name in ["a/x.txt", "a/sub/deep/y.txt", "a/sub/z.txt", "a/w.txt", "a0.txt", "b.txt"] {
            index.insert(file(name, name)).unwrap();
        }

        assert_eq!(
            names(index.children(&path("a")).unwrap()),
            vec!["a/sub", "a/w.txt", "a/x.txt"]
        );
        assert_eq!(
            names(index.children(&EntryPath::root()).unwrap()),
            vec!["a", "a0.txt", "b.txt"]
        );
        assert!(matches!(
            index.children(&path("b.txt")),
            Err(Error::NotADirectory(_))
        ));
        assert!(matches!(index.children(&path("nope")), Err(Error::NotFound(_))));
    }

    #[test]
    fn remove_cascades_to_descendants() {
        let mut index = EntryIndex::new();
        index.insert(file("Folder/One.txt", "1")).unwrap();
        index.insert(file("Folder/Sub/Two.txt", "2")).unwrap();
        index.insert(file("FolderTwo.txt", "x")).unwrap();

        let removed = index.remove(&path("Folder")).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(removed[0].path, path("Folder"));
        assert_eq!(index.paths(), vec![path("FolderTwo.txt")]);
    }

    #[test]
    fn rename_rewrites_descendant_prefixes() {
        let mut index = EntryIndex::new();
        index.insert(file("Folder/NewFile.txt", "Foo")).unwrap();
        index.insert(file("Text.txt", "t")).unwrap();

        index.rename(&path("Folder"), &path("Moved/Folder")).unwrap();

        assert!(index.lookup(&path("Folder")).is_none());
        assert!(index.lookup(&path("Moved")).unwrap().is_dir());
        assert!(index.lookup(&path("Moved/Folder/NewFile.txt")).unwrap().is_file());
        assert!(index.lookup(&path("Text.txt")).is_some());
    }

    #[test]
    fn rename_rejects_conflicts() {
        let mut index = EntryIndex::new();
        index.insert(file("a/x.txt", "x")).unwrap();
        index.insert(file("b.txt", "b")).unwrap();

        assert!(matches!(
            index.rename(&path("a"), &path("b.txt")),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            index.rename(&path("a"), &path("a/inner")),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            index.rename(&path("missing"), &path("c")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn insert_file_over_directory_drops_subtree() {
        let mut index = EntryIndex::new();
        index.insert(file("a/x.txt", "x")).unwrap();
        index.insert(file("a", "now a file")).unwrap();

        assert!(index.lookup(&path("a")).unwrap().is_file());
        assert!(index.lookup(&path("a/x.txt")).is_none());
    }

    #[test]
    fn records_with_encryption_are_rejected() {
        let record = CentralRecord {
            raw_name: "secret.txt".to_string(),
            flags: 1,
            method: 8,
            crc32: 0,
            compressed_size: 1,
            size: 1,
            header_offset: 0,
            dos_time: 0,
            dos_date: 0,
        };
        assert!(matches!(
            EntryIndex::from_records(vec![record]),
            Err(Error::Encrypted(_))
        ));
    }

    #[test]
    fn duplicate_normalized_names_are_rejected() {
        let record = |name: &str| CentralRecord {
            raw_name: name.to_string(),
            flags: 0,
            method: 0,
            crc32: 0,
            compressed_size: 0,
            size: 0,
            header_offset: 0,
            dos_time: 0,
            dos_date: 0,
        };
        let err = EntryIndex::from_records(vec![record("dir\\a.txt"), record("dir/a.txt")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry(_)));

        let ok = EntryIndex::from_records(vec![record("dir/a.txt"), record("dir/")]).unwrap();
        assert!(!ok.lookup(&path("dir")).unwrap().implicit);
    }
}
