//! Bulk directory operations
//!
//! Packs a real directory tree into an archive and unpacks it again,
//! checking content fidelity, the reported progress phases, and that
//! hostile entry names cannot write outside the output directory.

use packfs_rs::{
    create_package, extract_package, CompressMethod, EncryptMethod, Package, ProcessState,
};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const SOURCE_FILES: &[&str] = &[
    "readme.txt",
    "assets/logo.bin",
    "assets/levels/level1.dat",
    "assets/levels/level2.dat",
    "config/settings.json",
];

fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn source_content(name: &str) -> Vec<u8> {
    match name {
        "readme.txt" => b"package operator roundtrip".to_vec(),
        "assets/logo.bin" => noise(64 * 1024),
        "assets/levels/level1.dat" => b"level one data ".repeat(100),
        "assets/levels/level2.dat" => Vec::new(),
        "config/settings.json" => br#"{"quality":"high","volume":7}"#.to_vec(),
        other => panic!("unknown source file: {}", other),
    }
}

/// Helper: lay the fixed source tree out under `root`.
fn build_source_tree(root: &Path) {
    for name in SOURCE_FILES {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, source_content(name)).unwrap();
    }
}

#[test]
fn test_create_and_extract_roundtrip() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let out = dir.path().join("out");
    let pak = dir.path().join("bundle.pak");
    build_source_tree(&src);

    create_package(
        &src,
        &pak,
        CompressMethod::Zstd,
        EncryptMethod::Xor,
        0x00ff_1234_5678_abcd,
        |_state, _current, _total| {},
    )
    .unwrap();

    extract_package(&pak, &out, |_state, _current, _total| {}).unwrap();

    for name in SOURCE_FILES {
        let original = source_content(name);
        let extracted = fs::read(out.join(name)).unwrap();
        assert_eq!(extracted, original, "content mismatch for {}", name);
    }
}

#[test]
fn test_created_package_is_mountable() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let pak = dir.path().join("bundle.pak");
    build_source_tree(&src);

    create_package(
        &src,
        &pak,
        CompressMethod::Lz4,
        EncryptMethod::None,
        0,
        |_state, _current, _total| {},
    )
    .unwrap();

    let mut package = Package::mount(&pak).unwrap();
    let listing = package.list_files().unwrap();
    assert_eq!(listing.len(), SOURCE_FILES.len());
    for name in SOURCE_FILES {
        assert!(package.exist(name).unwrap(), "{} missing from package", name);
    }

    let stream = package.get_stream("config/settings.json").unwrap();
    assert_eq!(stream.to_vec(), source_content("config/settings.json"));
    package.close().unwrap();
}

#[test]
fn test_create_reports_write_phases() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let pak = dir.path().join("bundle.pak");
    build_source_tree(&src);

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    create_package(
        &src,
        &pak,
        CompressMethod::Zstd,
        EncryptMethod::None,
        0,
        move |state, _current, _total| {
            sink.lock().unwrap().push(state);
        },
    )
    .unwrap();

    let phases = phases.lock().unwrap();
    let staged = phases
        .iter()
        .filter(|s| **s == ProcessState::CalculatingBlockInfo)
        .count();
    assert_eq!(staged, SOURCE_FILES.len());
    assert!(phases.contains(&ProcessState::WritingHeader));
    assert!(phases.contains(&ProcessState::WritingBlockData));
    assert!(phases.contains(&ProcessState::WritingBlockInfo));
}

#[test]
fn test_extract_reports_progress() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let out = dir.path().join("out");
    let pak = dir.path().join("bundle.pak");
    build_source_tree(&src);

    create_package(
        &src,
        &pak,
        CompressMethod::Zstd,
        EncryptMethod::None,
        0,
        |_state, _current, _total| {},
    )
    .unwrap();

    let mut ticks = Vec::new();
    extract_package(&pak, &out, |state, current, total| {
        ticks.push((state, current, total));
    })
    .unwrap();

    assert_eq!(ticks.len(), SOURCE_FILES.len());
    for (i, (state, current, total)) in ticks.iter().enumerate() {
        assert_eq!(*state, ProcessState::ExtractingBlockData);
        assert_eq!(*current, i + 1);
        assert_eq!(*total, SOURCE_FILES.len());
    }
}

#[test]
fn test_extract_skips_escaping_paths() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let pak = dir.path().join("hostile.pak");

    // Archives are not trusted input; entry names may aim outside the
    // output directory.
    let mut package = Package::create(&pak).unwrap();
    package.add_file("../escape.txt", b"outside").unwrap();
    package.add_file("safe.txt", b"inside").unwrap();
    package.flush(true).unwrap();
    package.close().unwrap();

    extract_package(&pak, &out, |_state, _current, _total| {}).unwrap();

    assert_eq!(fs::read(out.join("safe.txt")).unwrap(), b"inside");
    assert!(
        !dir.path().join("escape.txt").exists(),
        "entry escaped the output directory"
    );
}
