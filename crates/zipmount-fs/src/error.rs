use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The archive is corrupt, unsupported or password protected.
    Format,
    /// The path does not exist.
    NotFound,
    /// Disk or permission failure; state was left as before the call.
    Io,
    /// A mount is busy, closing, or holds an open nested mount.
    ConcurrentAccess,
    /// The request itself is invalid (conflicting path, wrong kind, bad config).
    InvalidRequest,
}

/// Errors returned by the virtual filesystem.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("invalid archive {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("encrypted zip entry not supported: {entry} in {}", .path.display())]
    Encrypted { path: PathBuf, entry: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("archive already mounted: {}", .0.display())]
    AlreadyMounted(PathBuf),

    #[error("no archive mounted at {}", .0.display())]
    NotMounted(PathBuf),

    /// The mount left the open state between resolution and locking.
    #[error("mount closed: {}", .0.display())]
    MountClosed(PathBuf),

    #[error("subordinate mount busy: {} (closing {})", .child.display(), .mount.display())]
    SubordinateMountBusy { mount: PathBuf, child: PathBuf },

    #[error("open mount {} inside {path}", .mount.display())]
    OpenMountInPath { path: String, mount: PathBuf },

    #[error("backing archive modified outside the mount: {}", .0.display())]
    BackingModified(PathBuf),

    #[error("corrupt entry data: {0}")]
    CorruptEntry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl VfsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VfsError::Format { .. } | VfsError::Encrypted { .. } => ErrorClass::Format,
            VfsError::NotFound(_) | VfsError::NotMounted(_) => ErrorClass::NotFound,
            VfsError::Io(err) if err.kind() == io::ErrorKind::NotFound => ErrorClass::NotFound,
            VfsError::Io(_)
            | VfsError::Zip(_)
            | VfsError::BackingModified(_)
            | VfsError::CorruptEntry(_) => ErrorClass::Io,
            VfsError::MountClosed(_)
            | VfsError::SubordinateMountBusy { .. }
            | VfsError::OpenMountInPath { .. } => ErrorClass::ConcurrentAccess,
            VfsError::AlreadyExists(_)
            | VfsError::NotADirectory(_)
            | VfsError::IsADirectory(_)
            | VfsError::DirectoryNotEmpty(_)
            | VfsError::InvalidPath(_)
            | VfsError::AlreadyMounted(_)
            | VfsError::Config(_) => ErrorClass::InvalidRequest,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Attach the archive path to a format-level error raised while opening it.
    pub(crate) fn opening(path: &std::path::Path, err: zipmount_format::Error) -> Self {
        match VfsError::from(err) {
            VfsError::Format { reason, .. } => VfsError::Format {
                path: path.to_path_buf(),
                reason,
            },
            VfsError::Encrypted { entry, .. } => VfsError::Encrypted {
                path: path.to_path_buf(),
                entry,
            },
            other => other,
        }
    }
}

impl From<zipmount_format::Error> for VfsError {
    fn from(err: zipmount_format::Error) -> Self {
        use zipmount_format::Error as F;
        match err {
            F::Format(reason) | F::DuplicateEntry(reason) => VfsError::Format {
                path: PathBuf::new(),
                reason,
            },
            F::Encrypted(entry) => VfsError::Encrypted {
                path: PathBuf::new(),
                entry,
            },
            F::UnsupportedCompression { name, method } => VfsError::Format {
                path: PathBuf::new(),
                reason: format!("unsupported compression method {method} for {name}"),
            },
            F::InvalidPath(path) => VfsError::InvalidPath(path),
            F::NotFound(path) => VfsError::NotFound(path),
            F::AlreadyExists(path) => VfsError::AlreadyExists(path),
            F::NotADirectory(path) => VfsError::NotADirectory(path),
            F::IsADirectory(path) => VfsError::IsADirectory(path),
            F::CorruptEntry(reason) => VfsError::CorruptEntry(reason),
            F::Zip(err) => VfsError::Zip(err),
            F::Io(err) => VfsError::Io(err),
        }
    }
}

impl From<toml::de::Error> for VfsError {
    fn from(err: toml::de::Error) -> Self {
        VfsError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VfsError {
    fn from(err: toml::ser::Error) -> Self {
        VfsError::Config(err.to_string())
    }
}

/// Result type for zipmount-fs operations.
pub type VfsResult<T> = Result<T, VfsError>;
