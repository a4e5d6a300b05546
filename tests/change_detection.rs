use std::fs;
use tempfile::tempdir;

use web_mirror::change::{stamp_differs, ChangeDetector, Evidence};
use web_mirror::contract::RemoteStamp;
use web_mirror::stamps::StampRecord;

struct TestCase {
    name: &'static str,
    remote: RemoteStamp,
    known: (Option<i64>, Option<i64>),
    differs: bool,
}

#[test]
fn stamps_only_differ_on_fields_both_sides_report() {
    let cases = vec![
        TestCase {
            name: "identical",
            remote: RemoteStamp { size: Some(11), mtime: Some(5) },
            known: (Some(11), Some(5)),
            differs: false,
        },
        TestCase {
            name: "size changed",
            remote: RemoteStamp { size: Some(12), mtime: Some(5) },
            known: (Some(11), Some(5)),
            differs: true,
        },
        TestCase {
            name: "mtime changed",
            remote: RemoteStamp { size: Some(11), mtime: Some(6) },
            known: (Some(11), Some(5)),
            differs: true,
        },
        TestCase {
            name: "remote silent on mtime",
            remote: RemoteStamp { size: Some(11), mtime: None },
            known: (Some(11), Some(5)),
            differs: false,
        },
        TestCase {
            name: "record never saw a size",
            remote: RemoteStamp { size: Some(99), mtime: Some(5) },
            known: (None, Some(5)),
            differs: false,
        },
        TestCase {
            name: "nothing reported anywhere",
            remote: RemoteStamp::default(),
            known: (None, None),
            differs: false,
        },
    ];

    for case in cases {
        assert_eq!(
            stamp_differs(&case.remote, case.known.0, case.known.1),
            case.differs,
            "case: {}",
            case.name
        );
    }
}

fn prior(size: Option<i64>, mtime: Option<i64>) -> StampRecord {
    StampRecord {
        path: "data/test.txt".into(),
        url: "http://site.test/data/test.txt".into(),
        size,
        mtime,
    }
}

#[test]
fn prior_record_wins_over_local_file() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("test.txt");
    fs::write(&local, b"a different length").unwrap();

    let remote = RemoteStamp { size: Some(11), mtime: Some(5) };
    let decision = ChangeDetector::decide(
        "http://site.test/data/test.txt",
        &local,
        Some(&prior(Some(11), Some(5))),
        &remote,
        false,
    );
    assert!(!decision.download);
    assert_eq!(decision.evidence, Evidence::PriorRecord);
}

#[test]
fn untracked_local_file_is_compared_by_stat() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("test.txt");
    fs::write(&local, b"abracadabra").unwrap();

    let same = ChangeDetector::decide(
        "u",
        &local,
        None,
        &RemoteStamp { size: Some(11), mtime: None },
        false,
    );
    assert!(!same.download);
    assert!(matches!(same.evidence, Evidence::LocalFile(stat) if stat.size == 11));

    let bigger = ChangeDetector::decide(
        "u",
        &local,
        None,
        &RemoteStamp { size: Some(12), mtime: None },
        false,
    );
    assert!(bigger.download);
}

#[test]
fn nothing_known_means_download_and_force_overrides() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.txt");
    let remote = RemoteStamp::default();

    let fresh = ChangeDetector::decide("u", &missing, None, &remote, false);
    assert!(fresh.download);
    assert_eq!(fresh.evidence, Evidence::Nothing);

    let forced = ChangeDetector::decide("u", &missing, Some(&prior(None, None)), &remote, true);
    assert!(forced.download);
    assert_eq!(forced.evidence, Evidence::Forced);
}

#[test]
fn offline_decision_only_registers_unknown_files() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.txt");
    assert!(ChangeDetector::decide_offline(&missing, None).download);
    assert!(!ChangeDetector::decide_offline(&missing, Some(&prior(None, None))).download);

    let local = dir.path().join("here.txt");
    fs::write(&local, b"x").unwrap();
    let decision = ChangeDetector::decide_offline(&local, None);
    assert!(!decision.download);
    assert!(matches!(decision.evidence, Evidence::LocalFile(_)));
}
