use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::tempdir;

use web_mirror::config::ArchiveDirectories;
use web_mirror::error::ExtractError;
use web_mirror::extract::{strip_archive_suffix, Extractor, TarExtractor};

fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

fn files(paths: &[&str]) -> BTreeSet<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

#[test]
fn strips_known_archive_suffixes() {
    assert_eq!(strip_archive_suffix("1.tar.gz"), "1");
    assert_eq!(strip_archive_suffix("release-2.0.tbz2"), "release-2.0");
    assert_eq!(strip_archive_suffix("data.TAR"), "data");
    assert_eq!(strip_archive_suffix("sub/dir/x.tgz"), "sub/dir/x");
}

#[test]
fn gzip_archive_with_single_top_directory_is_stripped() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("pkg.tar.gz");
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&tarball(&[("pkg-1.0/README", b"hi"), ("pkg-1.0/src/lib.c", b"int x;")]))
        .unwrap();
    fs::write(&archive, gz.finish().unwrap()).unwrap();

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    let extracted = TarExtractor
        .extract(&archive, &dest, ArchiveDirectories::Strip)
        .unwrap();

    assert_eq!(extracted, files(&["README", "src/lib.c"]));
    assert_eq!(fs::read_to_string(dest.join("README")).unwrap(), "hi");
}

#[test]
fn maintain_keeps_the_top_directory() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("pkg.tar.bz2");
    let mut bz = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    bz.write_all(&tarball(&[("pkg-1.0/README", b"hi")])).unwrap();
    fs::write(&archive, bz.finish().unwrap()).unwrap();

    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    let extracted = TarExtractor
        .extract(&archive, &dest, ArchiveDirectories::Maintain)
        .unwrap();
    assert_eq!(extracted, files(&["pkg-1.0/README"]));
}

#[test]
fn unknown_format_is_rejected() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("data.zip");
    fs::write(&archive, b"PK").unwrap();
    let err = TarExtractor
        .extract(&archive, dir.path(), ArchiveDirectories::Strip)
        .unwrap_err();
    assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
}
