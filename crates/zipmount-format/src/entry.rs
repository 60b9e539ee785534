use crate::EntryPath;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::sync::Arc;

/// Shared, immutable entry content held in memory.
pub type Blob = Arc<[u8]>;

/// Kind of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Compression methods this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    /// Map a raw method id; `None` for methods that cannot be decoded.
    pub fn from_u16(method: u16) -> Option<Self> {
        match method {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflated),
            _ => None,
        }
    }

    pub fn to_zip(self) -> zip::CompressionMethod {
        match self {
            CompressionMethod::Stored => zip::CompressionMethod::Stored,
            CompressionMethod::Deflated => zip::CompressionMethod::Deflated,
        }
    }
}

/// Locator for the still-unmodified bytes of an entry in the backing archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSlice {
    /// Offset of the local file header.
    pub header_offset: u64,
    pub compressed_size: u64,
    pub size: u64,
    pub method: CompressionMethod,
    pub crc32: u32,
}

/// Where the content of an entry comes from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Directories carry no data.
    None,
    /// Decode from the archive the index was built from.
    Archive(ArchiveSlice),
    /// Pending content recorded by a mutation.
    Pending(Blob),
}

/// One entry of an [`EntryIndex`](crate::EntryIndex).
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: EntryPath,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: NaiveDateTime,
    pub source: DataSource,
    /// Synthesized because the archive stored no marker for this directory.
    pub implicit: bool,
}

impl Entry {
    pub fn directory(path: EntryPath, modified: NaiveDateTime) -> Self {
        Self {
            path,
            kind: EntryKind::Directory,
            size: 0,
            modified,
            source: DataSource::None,
            implicit: false,
        }
    }

    pub fn file(path: EntryPath, data: Blob, modified: NaiveDateTime) -> Self {
        Self {
            path,
            kind: EntryKind::File,
            size: data.len() as u64,
            modified,
            source: DataSource::Pending(data),
            implicit: false,
        }
    }

    pub(crate) fn implicit_directory(path: EntryPath, modified: NaiveDateTime) -> Self {
        Self {
            implicit: true,
            ..Self::directory(path, modified)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Last path segment; empty for the root.
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("")
    }

    /// Copy of this entry placed at another path.
    pub fn relocated(&self, path: EntryPath) -> Self {
        Self {
            path,
            ..self.clone()
        }
    }
}

/// Earliest timestamp a zip archive can record.
pub fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .unwrap_or_default()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
}

/// Convert an MS-DOS date/time pair; invalid values map to [`dos_epoch`].
pub fn dos_to_datetime(date: u16, time: u16) -> NaiveDateTime {
    let year = ((date >> 9) & 0x7f) as i32 + 1980;
    let month = ((date >> 5) & 0x0f) as u32;
    let day = (date & 0x1f) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3f) as u32;
    let second = ((time & 0x1f) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .unwrap_or_else(dos_epoch)
}

/// Convert a timestamp for a zip header, clamping to the DOS range.
pub fn datetime_to_zip(value: &NaiveDateTime) -> zip::DateTime {
    let clamped = if *value < dos_epoch() { dos_epoch() } else { *value };
    let year = u16::try_from(clamped.year()).unwrap_or(1980);
    zip::DateTime::from_date_and_time(
        year,
        clamped.month() as u8,
        clamped.day() as u8,
        clamped.hour() as u8,
        clamped.minute() as u8,
        clamped.second() as u8,
    )
    .unwrap_or_default()
}
