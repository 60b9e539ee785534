mod common;

use common::{create_basic_archive, create_nested_archive, file_names, mount, p, registry, zip_contents};
use tempfile::TempDir;
use zipmount_fs::{ArchiveFileStore, ErrorClass, VfsError};

#[test]
fn file_moves_between_archives_and_back() {
    let temp_dir = TempDir::new().unwrap();
    let first = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let second = create_basic_archive(temp_dir.path(), "BasicText2.zip");
    let registry = registry();
    let a = mount(&registry, &first);
    let b = mount(&registry, &second);

    a.create(&p("Folder/NewFile.txt"), b"Foo").unwrap();
    ArchiveFileStore::move_across_mounts(&a, &p("Folder/NewFile.txt"), &b, &p("Folder/NewFile.txt"))
        .unwrap();

    assert!(a.stat(&p("Folder/NewFile.txt")).unwrap_err().is_not_found());
    assert_eq!(b.read_to_vec(&p("Folder/NewFile.txt")).unwrap(), b"Foo");

    ArchiveFileStore::move_across_mounts(&b, &p("Folder/NewFile.txt"), &a, &p("Folder/NewFile.txt"))
        .unwrap();
    assert_eq!(a.read_to_vec(&p("Folder/NewFile.txt")).unwrap(), b"Foo");
    assert!(b.stat(&p("Folder/NewFile.txt")).unwrap_err().is_not_found());

    registry.close(&first).unwrap();
    registry.close(&second).unwrap();
    let first_contents = zip_contents(&first);
    assert_eq!(
        first_contents["Folder/NewFile.txt"].as_deref(),
        Some(&b"Foo"[..])
    );
    assert!(!zip_contents(&second).contains_key("Folder/NewFile.txt"));
}

#[test]
fn directory_moves_with_its_archive_content() {
    let temp_dir = TempDir::new().unwrap();
    let first = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let second = create_basic_archive(temp_dir.path(), "BasicText2.zip");
    let registry = registry();
    let a = mount(&registry, &first);
    let b = mount(&registry, &second);

    ArchiveFileStore::move_across_mounts(&a, &p("Folder"), &b, &p("Imported/Folder")).unwrap();
    assert_eq!(
        b.read_to_vec(&p("Imported/Folder/Inner.txt")).unwrap(),
        b"inner"
    );
    assert!(!a.exists(&p("Folder")).unwrap());

    registry.close_all().unwrap();
    assert_eq!(file_names(&zip_contents(&first)), vec!["Text.txt"]);
    assert_eq!(
        file_names(&zip_contents(&second)),
        vec!["Folder/Inner.txt", "Imported/Folder/Inner.txt", "Text.txt"]
    );
}

#[test]
fn failed_move_leaves_both_archives_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let first = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let second = create_basic_archive(temp_dir.path(), "BasicText2.zip");
    let registry = registry();
    let a = mount(&registry, &first);
    let b = mount(&registry, &second);

    let err =
        ArchiveFileStore::move_across_mounts(&a, &p("Text.txt"), &b, &p("Text.txt")).unwrap_err();
    assert!(matches!(err, VfsError::AlreadyExists(_)));
    let err = ArchiveFileStore::move_across_mounts(&a, &p("Missing.txt"), &b, &p("Missing.txt"))
        .unwrap_err();
    assert!(err.is_not_found());

    assert!(a.exists(&p("Text.txt")).unwrap());
    assert!(!a.mount().unwrap().is_dirty());
    assert!(!b.mount().unwrap().is_dirty());
}

#[test]
fn move_within_one_mount_is_a_rename() {
    let temp_dir = TempDir::new().unwrap();
    let first = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();
    let a = mount(&registry, &first);
    let same = registry.store(&first).unwrap();

    ArchiveFileStore::move_across_mounts(&a, &p("Text.txt"), &same, &p("Moved.txt")).unwrap();
    assert_eq!(a.read_to_vec(&p("Moved.txt")).unwrap(), b"Hello World!");
    assert_eq!(a.mount().unwrap().pending_mutations(), 1);
}

#[test]
fn nested_mount_blocks_moving_its_container() {
    let temp_dir = TempDir::new().unwrap();
    let outer = create_nested_archive(temp_dir.path());
    let other = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();
    let outer_store = mount(&registry, &outer);
    let other_store = mount(&registry, &other);
    let inner_store = mount(&registry, &outer.join("Inner.zip"));

    let err = ArchiveFileStore::move_across_mounts(
        &outer_store,
        &p("Inner.zip"),
        &other_store,
        &p("Inner.zip"),
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::ConcurrentAccess);

    ArchiveFileStore::move_across_mounts(
        &inner_store,
        &p("inner.txt"),
        &other_store,
        &p("from-inner.txt"),
    )
    .unwrap();
    assert_eq!(
        other_store.read_to_vec(&p("from-inner.txt")).unwrap(),
        b"from the inside"
    );
    assert!(!inner_store.exists(&p("inner.txt")).unwrap());
}
