//! # zipmount-fs
//!
//! Mount zip archives as writable folders inside a host file tree.
//!
//! This crate provides:
//! - [`MountRegistry`]: the table of open mounts, including archives nested
//!   inside other open archives
//! - [`ArchiveFileStore`]: file operations inside one mount, recorded in a
//!   mutation log and flushed on close
//! - [`TransformEngine`]: open (archive file to folder) and close (folder back
//!   to a freshly written archive)
//! - [`Vfs`]: one [`FileStore`] over absolute host paths that routes each call
//!   to the host filesystem or to the mount covering the path
//! - A `zipmount` command line tool (with the `cli` feature)
//!
//! ## Example
//!
//! ```ignore
//! use std::path::Path;
//! use zipmount_fs::{FileStore, Vfs, VfsConfig};
//!
//! let vfs = Vfs::new(VfsConfig::default());
//! vfs.open(Path::new("/data/report.zip"))?;
//!
//! vfs.write_all(Path::new("/data/report.zip/notes/today.txt"), b"done")?;
//! for child in vfs.children(Path::new("/data/report.zip"))? {
//!     println!("{} ({:?})", child.name, child.kind);
//! }
//!
//! // Writes a new archive next to the old one and renames it into place.
//! vfs.close(Path::new("/data/report.zip"))?;
//! ```

mod config;
mod error;
mod file_store;
mod local;
mod mount;
mod registry;
mod store;
mod transform;
mod vfs;

pub use config::{Compression, VfsConfig};
pub use error::{ErrorClass, VfsError, VfsResult};
pub use file_store::{ByteSink, FileInfo, FileKind, FileStore, Subtree, SubtreeItem};
pub use local::LocalFileStore;
pub use mount::{Mount, MountId, MountPhase};
pub use registry::{normalize_host_path, MountRegistry, PathKind};
pub use store::{ArchiveFileStore, EntryStream, EntryWriter, Transfer};
pub use transform::{CloseMode, TransformEngine};
pub use vfs::Vfs;

// Re-export format types used in the public API.
pub use zipmount_format::{EntryKind, EntryPath};
