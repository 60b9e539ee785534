mod common;

use common::{create_basic_archive, mount, p, registry, zip_contents};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use zipmount_fs::ArchiveFileStore;

#[test]
fn parallel_listing_and_stat() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();
    let store = mount(&registry, &archive);
    let barrier = Arc::new(Barrier::new(10));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..11 {
                    let children = store.children(&p("")).unwrap();
                    assert_eq!(children.len(), 3);
                    for child in children {
                        let info = store.stat(&p(&child.name)).unwrap();
                        assert_eq!(info.kind, child.kind);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn readers_and_writers_interleave() {
    let temp_dir = TempDir::new().unwrap();
    let archive = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let registry = registry();
    let store = mount(&registry, &archive);

    let writers: Vec<_> = (0..4)
        .map(|n| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    store
                        .create(&p(&format!("w{n}/file{i}.txt")), format!("{n}-{i}").as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(store.read_to_vec(&p("Text.txt")).unwrap(), b"Hello World!");
                    store.children(&p("")).unwrap();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    registry.close(&archive).unwrap();

    let contents = zip_contents(&archive);
    assert_eq!(contents["w3/file9.txt"].as_deref(), Some(&b"3-9"[..]));
    assert_eq!(
        contents.keys().filter(|name| name.starts_with('w')).count(),
        40
    );
}

#[test]
fn opposite_cross_mount_moves_do_not_deadlock() {
    let temp_dir = TempDir::new().unwrap();
    let first = create_basic_archive(temp_dir.path(), "BasicText.zip");
    let second = create_basic_archive(temp_dir.path(), "BasicText2.zip");
    let registry = registry();
    let a = mount(&registry, &first);
    let b = mount(&registry, &second);
    for i in 0..20 {
        a.create(&p(&format!("a{i}.txt")), b"a").unwrap();
        b.create(&p(&format!("b{i}.txt")), b"b").unwrap();
    }

    let forward = {
        let (a, b) = (a.clone(), b.clone());
        thread::spawn(move || {
            for i in 0..20 {
                let name = p(&format!("a{i}.txt"));
                ArchiveFileStore::move_across_mounts(&a, &name, &b, &name).unwrap();
            }
        })
    };
    let backward = {
        let (a, b) = (a.clone(), b.clone());
        thread::spawn(move || {
            for i in 0..20 {
                let name = p(&format!("b{i}.txt"));
                ArchiveFileStore::move_across_mounts(&b, &name, &a, &name).unwrap();
            }
        })
    };
    forward.join().unwrap();
    backward.join().unwrap();

    assert!(b.exists(&p("a19.txt")).unwrap());
    assert!(a.exists(&p("b19.txt")).unwrap());
    assert!(!a.exists(&p("a0.txt")).unwrap());
}
