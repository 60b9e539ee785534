#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::{write::FileOptions, ZipArchive, ZipWriter};
use zipmount_fs::{ArchiveFileStore, EntryPath, MountRegistry, VfsConfig};
use zipmount_format::ArchiveBuilder;

pub fn p(raw: &str) -> EntryPath {
    EntryPath::parse(raw).unwrap()
}

pub fn registry() -> Arc<MountRegistry> {
    MountRegistry::shared(VfsConfig::default())
}

/// Open `archive` and return a store over it.
pub fn mount(registry: &Arc<MountRegistry>, archive: &Path) -> ArchiveFileStore {
    registry.open(archive).unwrap();
    registry.store(archive).unwrap()
}

/// `Text.txt`, `Folder/Inner.txt` (stored) and an explicit `EmptyFolder/`.
pub fn create_basic_archive(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut zip = ZipWriter::new(File::create(&path).unwrap());

    let deflated: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let stored: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    zip.start_file("Text.txt", deflated).unwrap();
    zip.write_all(b"Hello World!").unwrap();
    zip.start_file("Folder/Inner.txt", stored).unwrap();
    zip.write_all(b"inner").unwrap();
    zip.add_directory("EmptyFolder/", stored).unwrap();

    zip.finish().unwrap();
    path
}

/// `Outer.zip` holding `Inner.zip` (with `inner.txt`) and `readme.txt`.
pub fn create_nested_archive(dir: &Path) -> PathBuf {
    let inner = ArchiveBuilder::new()
        .with_file("inner.txt", "from the inside")
        .unwrap()
        .to_bytes()
        .unwrap();
    ArchiveBuilder::new()
        .with_file("readme.txt", "outer")
        .unwrap()
        .with_file("Inner.zip", inner)
        .unwrap()
        .write_to(dir.join("Outer.zip"))
        .unwrap()
}

/// A text file with a zip extension.
pub fn create_fake_archive(dir: &Path) -> PathBuf {
    let path = dir.join("Fake.zip");
    fs::write(&path, "this is not a zip archive, just text").unwrap();
    path
}

/// Valid archive whose only entry carries the encryption flag.
pub fn create_encrypted_archive(dir: &Path) -> PathBuf {
    let path = dir.join("Encrypted.zip");
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("secret.txt", options).unwrap();
    zip.write_all(b"secret").unwrap();
    let mut bytes = zip.finish().unwrap().into_inner();

    let central = bytes
        .windows(4)
        .position(|window| window == b"PK\x01\x02")
        .unwrap();
    bytes[central + 8] |= 0x01;
    fs::write(&path, bytes).unwrap();
    path
}

/// Entries of an archive as read by the zip crate; directories map to `None`.
pub fn zip_contents(path: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    zip_contents_from(File::open(path).unwrap())
}

pub fn zip_contents_from<R: Read + std::io::Seek>(reader: R) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(reader).unwrap();
    let mut contents = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let name = file.name().to_string();
        if file.is_dir() {
            contents.insert(name, None);
        } else {
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            contents.insert(name, Some(data));
        }
    }
    contents
}

pub fn file_names(contents: &BTreeMap<String, Option<Vec<u8>>>) -> Vec<&str> {
    contents
        .iter()
        .filter(|(_, data)| data.is_some())
        .map(|(name, _)| name.as_str())
        .collect()
}
