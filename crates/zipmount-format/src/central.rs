//! Central directory parsing.
//!
//! The archive is read from the end: locate the End of Central Directory
//! record, follow the ZIP64 locator when a field is saturated, then parse every
//! central file header. Entry data is never touched here.

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const CDFH_SIGNATURE: u32 = 0x0201_4b50;
pub(crate) const LFH_SIGNATURE: u32 = 0x0403_4b50;

const EOCD_SIZE: u64 = 22;
const ZIP64_LOCATOR_SIZE: u64 = 20;
pub(crate) const LFH_SIZE: u64 = 30;
const MAX_COMMENT_SIZE: u64 = 65535;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;
const METHOD_AES: u16 = 99;

/// One parsed central directory file header.
#[derive(Debug, Clone)]
pub struct CentralRecord {
    pub raw_name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub size: u64,
    pub header_offset: u64,
    pub dos_time: u16,
    pub dos_date: u16,
}

impl CentralRecord {
    pub fn is_dir(&self) -> bool {
        self.raw_name.ends_with('/') || self.raw_name.ends_with('\\')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & (FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION) != 0 || self.method == METHOD_AES
    }
}

struct DirectoryLocation {
    offset: u64,
    size: u64,
    entries: u64,
}

/// Read every central directory record of the archive.
pub fn read_central_directory<R: Read + Seek>(reader: &mut R) -> Result<Vec<CentralRecord>> {
    let len = reader.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Err(Error::Format("empty file".to_string()));
    }
    if len < EOCD_SIZE {
        return Err(Error::Format("file too small to be a zip archive".to_string()));
    }

    let (eocd, eocd_offset) = find_eocd(reader, len)?;
    let location = if eocd.needs_zip64() {
        read_zip64_location(reader, eocd_offset)?
    } else {
        DirectoryLocation {
            offset: eocd.cd_offset as u64,
            size: eocd.cd_size as u64,
            entries: eocd.total_entries as u64,
        }
    };

    if eocd.disk_number != 0 || eocd.cd_disk != 0 {
        return Err(Error::Format("multi-disk archives are not supported".to_string()));
    }
    if location
        .offset
        .checked_add(location.size)
        .map_or(true, |end| end > eocd_offset)
    {
        return Err(Error::Format("central directory out of bounds".to_string()));
    }

    let mut directory = vec![0u8; location.size as usize];
    reader.seek(SeekFrom::Start(location.offset))?;
    reader.read_exact(&mut directory)?;

    let mut cursor = Cursor::new(directory.as_slice());
    let mut records = Vec::with_capacity(location.entries.min(u16::MAX as u64) as usize);
    for _ in 0..location.entries {
        let record = parse_cdfh(&mut cursor)
            .map_err(|err| truncated(err, "central directory header"))?;
        records.push(record);
    }
    if cursor.position() != directory.len() as u64 {
        return Err(Error::Format("entry count mismatch".to_string()));
    }
    Ok(records)
}

struct Eocd {
    disk_number: u16,
    cd_disk: u16,
    total_entries: u16,
    cd_size: u32,
    cd_offset: u32,
}

impl Eocd {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        if cursor.read_u32::<LittleEndian>()? != EOCD_SIGNATURE {
            return Err(Error::Format("invalid end of central directory".to_string()));
        }
        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let cd_disk = cursor.read_u16::<LittleEndian>()?;
        let _disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        Ok(Self {
            disk_number,
            cd_disk,
            total_entries,
            cd_size,
            cd_offset,
        })
    }

    fn needs_zip64(&self) -> bool {
        self.total_entries == u16::MAX || self.cd_size == u32::MAX || self.cd_offset == u32::MAX
    }
}

fn find_eocd<R: Read + Seek>(reader: &mut R, len: u64) -> Result<(Eocd, u64)> {
    let search_size = (MAX_COMMENT_SIZE + EOCD_SIZE).min(len);
    let search_start = len - search_size;
    let mut buf = vec![0u8; search_size as usize];
    reader.seek(SeekFrom::Start(search_start))?;
    reader.read_exact(&mut buf)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    let last = buf.len() - EOCD_SIZE as usize;
    for i in (0..=last).rev() {
        if buf[i..i + 4] != signature {
            continue;
        }
        let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
        if comment_len == buf.len() - i - EOCD_SIZE as usize {
            let eocd = Eocd::parse(&buf[i..i + EOCD_SIZE as usize])?;
            return Ok((eocd, search_start + i as u64));
        }
    }

    Err(Error::Format("not a zip archive".to_string()))
}

fn read_zip64_location<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> Result<DirectoryLocation> {
    let locator_offset = eocd_offset
        .checked_sub(ZIP64_LOCATOR_SIZE)
        .ok_or_else(|| Error::Format("missing zip64 locator".to_string()))?;
    reader.seek(SeekFrom::Start(locator_offset))?;
    if reader.read_u32::<LittleEndian>()? != ZIP64_LOCATOR_SIGNATURE {
        return Err(Error::Format("missing zip64 locator".to_string()));
    }
    let _disk = reader.read_u32::<LittleEndian>()?;
    let eocd64_offset = reader.read_u64::<LittleEndian>()?;

    reader.seek(SeekFrom::Start(eocd64_offset))?;
    if reader.read_u32::<LittleEndian>()? != ZIP64_EOCD_SIGNATURE {
        return Err(Error::Format("invalid zip64 end of central directory".to_string()));
    }
    let _record_size = reader.read_u64::<LittleEndian>()?;
    let _version_made_by = reader.read_u16::<LittleEndian>()?;
    let _version_needed = reader.read_u16::<LittleEndian>()?;
    let _disk_number = reader.read_u32::<LittleEndian>()?;
    let _cd_disk = reader.read_u32::<LittleEndian>()?;
    let _disk_entries = reader.read_u64::<LittleEndian>()?;
    let entries = reader.read_u64::<LittleEndian>()?;
    let size = reader.read_u64::<LittleEndian>()?;
    let offset = reader.read_u64::<LittleEndian>()?;
    Ok(DirectoryLocation {
        offset,
        size,
        entries,
    })
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<CentralRecord> {
    if cursor.read_u32::<LittleEndian>()? != CDFH_SIGNATURE {
        return Err(Error::Format("invalid central directory file header".to_string()));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let dos_time = cursor.read_u16::<LittleEndian>()?;
    let dos_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    let _disk_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name = vec![0u8; name_len as usize];
    cursor.read_exact(&mut name)?;
    let raw_name = String::from_utf8_lossy(&name).into_owned();

    let extra_end = cursor.position() + extra_len as u64;
    while cursor.position() + 4 <= extra_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;
        if header_id == 0x0001 {
            if size == u32::MAX as u64 && cursor.position() + 8 <= field_end {
                size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == u32::MAX as u64 && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if header_offset == u32::MAX as u64 && cursor.position() + 8 <= field_end {
                header_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_end + comment_len as u64);
    if cursor.position() > cursor.get_ref().len() as u64 {
        return Err(Error::Format("truncated central directory".to_string()));
    }

    Ok(CentralRecord {
        raw_name,
        flags,
        method,
        crc32,
        compressed_size,
        size,
        header_offset,
        dos_time,
        dos_date,
    })
}

fn truncated(err: Error, what: &str) -> Error {
    match err {
        Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            Error::Format(format!("truncated {what}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn sample_archive() -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        zip.add_directory("Folder/", options).unwrap();
        zip.start_file("Folder/Text.txt", options).unwrap();
        zip.write_all(b"Hello World!").unwrap();
        zip.start_file("Root.txt", options).unwrap();
        zip.write_all(b"root").unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn reads_all_records() {
        let bytes = sample_archive();
        let records = read_central_directory(&mut Cursor::new(bytes)).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.raw_name.as_str()).collect();
        assert_eq!(names, vec!["Folder/", "Folder/Text.txt", "Root.txt"]);
        assert!(records[0].is_dir());
        assert_eq!(records[1].size, 12);
        assert_eq!(records[1].method, 8);
        assert!(!records[1].is_encrypted());
    }

    #[test]
    fn rejects_entry_count_below_record_count() {
        let mut bytes = sample_archive();
        let eocd = bytes.len() - 22;
        bytes[eocd + 8..eocd + 10].copy_from_slice(&2u16.to_le_bytes());
        bytes[eocd + 10..eocd + 12].copy_from_slice(&2u16.to_le_bytes());

        let err = read_central_directory(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Format(ref msg) if msg == "entry count mismatch"));
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.set_comment("archive comment");
        let options: FileOptions<()> = FileOptions::default();
        zip.start_file("a.txt", options).unwrap();
        zip.write_all(b"a").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let records = read_central_directory(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn rejects_empty_and_garbage() {
        let err = read_central_directory(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Format(_)));

        let err = read_central_directory(&mut Cursor::new(vec![0x42u8; 512])).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn rejects_truncated_directory() {
        let mut bytes = sample_archive();
        let len = bytes.len();
        // Corrupt the first central header signature.
        let cd_offset = u32::from_le_bytes([
            bytes[len - 6],
            bytes[len - 5],
            bytes[len - 4],
            bytes[len - 3],
        ]) as usize;
        bytes[cd_offset] = 0;
        let err = read_central_directory(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
