//! Decoding entry data straight from the backing archive.

use crate::central::{LFH_SIGNATURE, LFH_SIZE};
use crate::entry::{ArchiveSlice, CompressionMethod};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;
use flate2::Crc;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Streaming reader over one archive entry.
///
/// The decoded length and CRC-32 are checked against the central directory
/// when the stream reaches its end.
pub struct EntryReader {
    inner: Box<dyn Read + Send>,
    crc: Crc,
    expected_crc: u32,
    expected_size: u64,
    read: u64,
    verified: bool,
}

impl EntryReader {
    pub fn size(&self) -> u64 {
        self.expected_size
    }

    fn verify(&mut self) -> io::Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        if self.read != self.expected_size || self.crc.sum() != self.expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry checksum mismatch (read {} of {} bytes)",
                    self.read, self.expected_size
                ),
            ));
        }
        Ok(())
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.verify()?;
            return Ok(0);
        }
        self.crc.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}

/// Open a decoding stream for the entry described by `slice`.
pub fn open_slice(archive: &Path, slice: &ArchiveSlice) -> Result<EntryReader> {
    let mut file = File::open(archive)?;
    file.seek(SeekFrom::Start(slice.header_offset))?;

    if file.read_u32::<LittleEndian>()? != LFH_SIGNATURE {
        return Err(Error::Format(format!(
            "invalid local file header at offset {}",
            slice.header_offset
        )));
    }
    // File name and extra field lengths sit at offset 26 of the local header.
    file.seek(SeekFrom::Start(slice.header_offset + 26))?;
    let name_len = file.read_u16::<LittleEndian>()? as u64;
    let extra_len = file.read_u16::<LittleEndian>()? as u64;
    file.seek(SeekFrom::Start(
        slice.header_offset + LFH_SIZE + name_len + extra_len,
    ))?;

    let raw = BufReader::new(file).take(slice.compressed_size);
    let inner: Box<dyn Read + Send> = match slice.method {
        CompressionMethod::Stored => Box::new(raw),
        CompressionMethod::Deflated => Box::new(DeflateDecoder::new(raw).take(slice.size)),
    };

    Ok(EntryReader {
        inner,
        crc: Crc::new(),
        expected_crc: slice.crc32,
        expected_size: slice.size,
        read: 0,
        verified: false,
    })
}

/// Decode a whole entry into memory.
pub fn read_slice(archive: &Path, slice: &ArchiveSlice) -> Result<Vec<u8>> {
    let mut reader = open_slice(archive, slice)?;
    let mut data = Vec::with_capacity(slice.size.min(64 * 1024 * 1024) as usize);
    reader.read_to_end(&mut data).map_err(|err| {
        if err.kind() == io::ErrorKind::InvalidData {
            Error::CorruptEntry(format!("offset {}: {}", slice.header_offset, err))
        } else {
            Error::Io(err)
        }
    })?;
    Ok(data)
}
