mod common;

use common::{
    create_basic_archive, create_encrypted_archive, create_fake_archive, create_nested_archive,
    file_names, mount, p, registry, zip_contents, zip_contents_from,
};
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;
use zipmount_fs::{ErrorClass, FileStore, MountPhase, Vfs, VfsConfig, VfsError};

#[test]
fn close_without_mutation_keeps_archive_bytes() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let before = fs::read(&archive).unwrap();

    let registry = registry();
    let store = mount(&registry, &archive);
    assert!(store.stat(&p("Text.txt")).unwrap().is_file());
    assert_eq!(store.read_to_vec(&p("Folder/Inner.txt")).unwrap(), b"inner");
    let mount = store.mount().unwrap();
    assert!(!mount.is_dirty());

    registry.close(&archive).unwrap();
    assert_eq!(mount.phase(), MountPhase::Closed);
    assert!(registry.is_empty());
    assert_eq!(fs::read(&archive).unwrap(), before);
}

#[cfg(unix)]
#[test]
fn flushed_archive_keeps_its_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    fs::set_permissions(&archive, fs::Permissions::from_mode(0o644)).unwrap();
    let registry = registry();
    let store = mount(&registry, &archive);

    store.create(&p("x.txt"), b"x").unwrap();
    registry.close(&archive).unwrap();

    let mode = fs::metadata(&archive).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
    assert!(zip_contents(&archive).contains_key("x.txt"));
}

#[test]
fn mutations_are_flushed_into_a_valid_archive() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();
    let store = mount(&registry, &archive);

    store.create(&p("Docs/New.txt"), b"fresh").unwrap();
    store.delete(&p("Folder"), true).unwrap();
    store.mkdir(&p("Made")).unwrap();
    assert_eq!(store.mount().unwrap().pending_mutations(), 3);
    registry.close(&archive).unwrap();

    let contents = zip_contents(&archive);
    assert_eq!(file_names(&contents), vec!["Docs/New.txt", "Text.txt"]);
    assert_eq!(contents["Text.txt"].as_deref(), Some(&b"Hello World!"[..]));
    assert_eq!(contents["Docs/New.txt"].as_deref(), Some(&b"fresh"[..]));
    assert!(contents.contains_key("EmptyFolder/"));
    assert!(contents.contains_key("Made/"));
    assert!(!contents.keys().any(|name| name.starts_with("Folder")));

    let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".tmp.zipmount-"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

#[test]
fn reopening_reads_the_flushed_state() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();

    let store = mount(&registry, &archive);
    let first_id = store.mount().unwrap().id();
    store.write(&p("Text.txt"), b"changed").unwrap();
    registry.close(&archive).unwrap();

    let store = mount(&registry, &archive);
    assert_ne!(store.mount().unwrap().id(), first_id);
    assert_eq!(store.read_to_vec(&p("Text.txt")).unwrap(), b"changed");
    assert_eq!(store.stat(&p("Text.txt")).unwrap().size, 7);
}

#[test]
fn second_close_reports_not_mounted() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();
    let store = mount(&registry, &archive);

    registry.close(&archive).unwrap();
    let err = registry.close(&archive).unwrap_err();
    assert!(matches!(err, VfsError::NotMounted(_)));
    assert!(store.stat(&p("Text.txt")).unwrap_err().is_not_found());
}

#[test]
fn fake_archive_fails_to_open_and_stays_a_file() {
    let temp_dir = TempDir::new().unwrap();
    let fake = create_fake_archive(temp_dir.path());
    let vfs = Vfs::new(VfsConfig::default());

    let err = vfs.open(&fake).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Format);
    assert!(vfs.registry().is_empty());

    let info = vfs.stat(&fake).unwrap();
    assert!(info.is_file());
    assert_eq!(
        vfs.read_to_vec(&fake).unwrap(),
        b"this is not a zip archive, just text"
    );
}

#[test]
fn encrypted_archive_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_encrypted_archive(temp_dir.path());
    let before = fs::read(&archive).unwrap();
    let registry = registry();

    let err = registry.open(&archive).unwrap_err();
    assert!(matches!(err, VfsError::Encrypted { .. }));
    assert_eq!(err.class(), ErrorClass::Format);
    assert!(registry.is_empty());
    assert_eq!(fs::read(&archive).unwrap(), before);
}

#[test]
fn nested_archive_is_flushed_into_its_parent() {
    let temp_dir = TempDir::new().unwrap();
    let outer = create_nested_archive(temp_dir.path());
    let inner = outer.join("Inner.zip");
    let registry = registry();

    mount(&registry, &outer);
    let nested = mount(&registry, &inner);
    let child = nested.mount().unwrap();
    assert!(child.is_nested());
    assert_eq!(child.parent().unwrap().host_root(), outer.as_path());
    assert_eq!(
        nested.read_to_vec(&p("inner.txt")).unwrap(),
        b"from the inside"
    );

    nested.create(&p("added/by-test.txt"), b"nested write").unwrap();
    registry.close(&outer).unwrap();
    assert!(registry.is_empty());

    let contents = zip_contents(&outer);
    assert_eq!(contents["readme.txt"].as_deref(), Some(&b"outer"[..]));
    let inner_bytes = contents["Inner.zip"].clone().unwrap();
    let inner_contents = zip_contents_from(Cursor::new(inner_bytes));
    assert_eq!(
        file_names(&inner_contents),
        vec!["added/by-test.txt", "inner.txt"]
    );
    assert_eq!(
        inner_contents["added/by-test.txt"].as_deref(),
        Some(&b"nested write"[..])
    );
}

#[test]
fn strict_close_refuses_while_a_nested_mount_is_open() {
    let temp_dir = TempDir::new().unwrap();
    let outer = create_nested_archive(temp_dir.path());
    let inner = outer.join("Inner.zip");
    let vfs = Vfs::new(VfsConfig::default());

    vfs.open(&outer).unwrap();
    vfs.open(&inner).unwrap();

    let err = vfs.close_strict(&outer).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ConcurrentAccess);
    assert!(vfs.registry().is_mounted(&outer));
    assert!(vfs.registry().is_mounted(&inner));

    vfs.close(&inner).unwrap();
    vfs.close_strict(&outer).unwrap();
    assert!(vfs.registry().is_empty());
}

#[test]
fn nested_entry_cannot_be_deleted_while_mounted() {
    let temp_dir = TempDir::new().unwrap();
    let outer = create_nested_archive(temp_dir.path());
    let registry = registry();
    let store = mount(&registry, &outer);
    registry.open(&outer.join("Inner.zip")).unwrap();

    let err = store.delete(&p("Inner.zip"), false).unwrap_err();
    assert!(matches!(err, VfsError::OpenMountInPath { .. }));
    assert!(store.exists(&p("Inner.zip")).unwrap());
}
