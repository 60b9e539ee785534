//! Normalized entry paths inside an archive.
//!
//! An [`EntryPath`] is a sequence of segments joined by `/` with no leading or
//! trailing separator. The empty path is the archive root.

use crate::{Error, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A forward-slash normalized path of an entry inside an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryPath(String);

impl EntryPath {
    /// The archive root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse a raw entry name, accepting both `/` and `\` as separators.
    ///
    /// Leading and trailing separators are dropped. Empty interior segments
    /// and `.`/`..` segments are rejected since they have no single meaning.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches(|c: char| c == '/' || c == '\\');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut normalized = String::with_capacity(trimmed.len());
        for segment in trimmed.split(|c: char| c == '/' || c == '\\') {
            validate_segment(segment, raw)?;
            if !normalized.is_empty() {
                normalized.push('/');
            }
            normalized.push_str(segment);
        }
        Ok(Self(normalized))
    }

    /// Convert a host-relative path into an entry path.
    ///
    /// Host components containing a literal backslash are rejected rather than
    /// split, so a local file named `a\b` never turns into two segments.
    pub fn from_host(path: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
                    if name.contains('\\') {
                        return Err(Error::InvalidPath(format!(
                            "ambiguous separator in {}",
                            path.display()
                        )));
                    }
                    validate_segment(name, &path.display().to_string())?;
                    segments.push(name);
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::InvalidPath(path.display().to_string()));
                }
            }
        }
        Ok(Self(segments.join("/")))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(self.0.rsplit('/').next().unwrap_or(&self.0))
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<EntryPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Append a raw, possibly multi-segment name.
    pub fn join(&self, name: &str) -> Result<EntryPath> {
        Ok(self.join_path(&Self::parse(name)?))
    }

    pub fn join_path(&self, other: &EntryPath) -> EntryPath {
        match (self.is_root(), other.is_root()) {
            (true, _) => other.clone(),
            (_, true) => self.clone(),
            _ => Self(format!("{}/{}", self.0, other.0)),
        }
    }

    /// Segment-aware prefix test; every path starts with the root.
    pub fn starts_with(&self, prefix: &EntryPath) -> bool {
        if prefix.is_root() || self == prefix {
            return true;
        }
        self.0.len() > prefix.0.len()
            && self.0.starts_with(&prefix.0)
            && self.0.as_bytes()[prefix.0.len()] == b'/'
    }

    pub fn strip_prefix(&self, prefix: &EntryPath) -> Option<EntryPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        if self == prefix {
            return Some(Self::root());
        }
        Some(Self(self.0[prefix.0.len() + 1..].to_string()))
    }

    /// Replace the `from` prefix of this path with `to`.
    pub fn rebase(&self, from: &EntryPath, to: &EntryPath) -> Option<EntryPath> {
        self.strip_prefix(from).map(|rest| to.join_path(&rest))
    }

    /// Proper ancestors, shallowest first, excluding the root.
    pub fn ancestors(&self) -> Vec<EntryPath> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            if path.is_root() {
                break;
            }
            current = path.parent();
            ancestors.push(path);
        }
        ancestors.reverse();
        ancestors
    }

    /// Host location of this entry below a mount root.
    pub fn to_host(&self, root: &Path) -> PathBuf {
        let mut host = root.to_path_buf();
        for segment in self.segments() {
            host.push(segment);
        }
        host
    }

    /// Key prefix shared by every descendant of this path.
    pub(crate) fn subtree_prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl AsRef<str> for EntryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_segment(segment: &str, raw: &str) -> Result<()> {
    match segment {
        "" => Err(Error::InvalidPath(format!("empty segment in {raw:?}"))),
        "." | ".." => Err(Error::InvalidPath(format!("relative segment in {raw:?}"))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_separators() {
        let path = EntryPath::parse("\\Folder\\Sub/File.txt/").unwrap();
        assert_eq!(path.as_str(), "Folder/Sub/File.txt");
        assert_eq!(path.name(), Some("File.txt"));
        assert_eq!(path.parent().unwrap().as_str(), "Folder/Sub");
        assert_eq!(path.depth(), 3);
    }

    #[test]
    fn parse_rejects_relative_and_empty_segments() {
        assert!(EntryPath::parse("a/../b").is_err());
        assert!(EntryPath::parse("./a").is_err());
        assert!(EntryPath::parse("a//b").is_err());
        assert!(EntryPath::parse("/").unwrap().is_root());
    }

    #[test]
    fn from_host_rejects_backslash_names() {
        let err = EntryPath::from_host(Path::new("Folder/back\\slash.txt")).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));

        let ok = EntryPath::from_host(Path::new("./Folder/file.txt")).unwrap();
        assert_eq!(ok.as_str(), "Folder/file.txt");
        assert!(EntryPath::from_host(Path::new("/abs")).is_err());
    }

    #[test]
    fn prefix_checks_respect_segments() {
        let folder = EntryPath::parse("Folder").unwrap();
        let inside = EntryPath::parse("Folder/NewFile.txt").unwrap();
        let sibling = EntryPath::parse("FolderTwo/x").unwrap();

        assert!(inside.starts_with(&folder));
        assert!(!sibling.starts_with(&folder));
        assert!(inside.starts_with(&EntryPath::root()));
        assert_eq!(
            inside.strip_prefix(&folder).unwrap().as_str(),
            "NewFile.txt"
        );

        let moved = inside
            .rebase(&folder, &EntryPath::parse("Other/Deep").unwrap())
            .unwrap();
        assert_eq!(moved.as_str(), "Other/Deep/NewFile.txt");
    }

    #[test]
    fn ancestors_are_shallowest_first() {
        let path = EntryPath::parse("a/b/c").unwrap();
        let ancestors: Vec<_> = path.ancestors().into_iter().map(|p| p.0).collect();
        assert_eq!(ancestors, vec!["a".to_string(), "a/b".to_string()]);
        assert!(EntryPath::parse("a").unwrap().ancestors().is_empty());
    }
}
