//! # zipmount-format
//!
//! Zip container handling for the zipmount virtual filesystem.
//!
//! This crate provides:
//! - Central directory parsing into an [`EntryIndex`]
//! - Streaming entry decoding with checksum verification
//! - A [`MutationLog`] of pending structural changes
//! - Archive rewriting through the [`ArchiveSink`] trait
//! - [`ArchiveBuilder`] for creating new archives
//!
//! ## Example
//!
//! ```ignore
//! use zipmount_format::{ArchiveBuilder, EntryIndex, EntryPath};
//!
//! ArchiveBuilder::new()
//!     .with_file("Folder/Text.txt", "Hello World!")?
//!     .write_to("basic.zip")?;
//!
//! let index = EntryIndex::open("basic.zip")?;
//! for entry in index.children(&EntryPath::root())? {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! ```

mod builder;
mod central;
mod entry;
mod error;
mod index;
mod mutation;
mod path;
mod reader;
mod writer;

pub use builder::ArchiveBuilder;
pub use central::{read_central_directory, CentralRecord};
pub use entry::{
    datetime_to_zip, dos_epoch, dos_to_datetime, ArchiveSlice, Blob, CompressionMethod,
    DataSource, Entry, EntryKind,
};
pub use error::{Error, Result};
pub use index::EntryIndex;
pub use mutation::{Mutation, MutationLog};
pub use path::EntryPath;
pub use reader::{open_slice, read_slice, EntryReader};
pub use writer::{write_index, ArchiveSink, ArchiveWriter, WriteOptions};
