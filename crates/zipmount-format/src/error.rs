use thiserror::Error;

/// Errors that can occur while indexing, reading or rewriting zip archives.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive structure is invalid or truncated.
    #[error("invalid zip format: {0}")]
    Format(String),

    /// The archive contains a password-protected entry.
    #[error("encrypted zip entry not supported: {0}")]
    Encrypted(String),

    /// An entry uses a compression method other than stored or deflated.
    #[error("unsupported compression method {method} for entry {name}")]
    UnsupportedCompression { name: String, method: u16 },

    /// Two central directory records normalize to the same path.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A path is empty where a name is required, or cannot be normalized unambiguously.
    #[error("invalid entry path: {0}")]
    InvalidPath(String),

    /// No entry exists at the path.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// An entry already exists at the path.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// A directory was required but a file was found.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file was required but a directory was found.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Decoded entry data does not match its recorded size or checksum.
    #[error("corrupt entry data: {0}")]
    CorruptEntry(String),

    /// Error from the zip library.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for zipmount-format operations.
pub type Result<T> = std::result::Result<T, Error>;
