use mockall::predicate::eq;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use web_mirror::config::{ArchiveDirectories, Destiny};
use web_mirror::contract::{MockRepositoryBackend, RegistrationMode};
use web_mirror::destiny::{resolve_destiny, DestinyResolver, Disposition, ItemPlan, StagedItem};
use web_mirror::error::{BackendError, ItemError};
use web_mirror::extract::TarExtractor;
use web_mirror::journal::{Journal, PlannedAction, StoreRole};

struct TestCase {
    destiny: Destiny,
    same_store: bool,
    is_archive: bool,
    expected: Disposition,
}

#[test]
fn auto_destiny_depends_on_store_layout() {
    let cases = vec![
        TestCase { destiny: Destiny::Auto, same_store: true, is_archive: true, expected: Disposition::Rm },
        TestCase { destiny: Destiny::Auto, same_store: true, is_archive: false, expected: Disposition::Annex },
        TestCase { destiny: Destiny::Auto, same_store: false, is_archive: true, expected: Disposition::Annex },
        TestCase { destiny: Destiny::Keep, same_store: true, is_archive: true, expected: Disposition::Keep },
        TestCase { destiny: Destiny::Drop, same_store: false, is_archive: false, expected: Disposition::Drop },
        TestCase { destiny: Destiny::Rm, same_store: false, is_archive: false, expected: Disposition::Rm },
    ];
    for case in cases {
        assert_eq!(
            resolve_destiny(case.destiny, case.same_store, case.is_archive),
            case.expected,
            "{:?} same_store={} archive={}",
            case.destiny,
            case.same_store,
            case.is_archive
        );
    }
}

fn backend(root: &Path) -> MockRepositoryBackend {
    let mut mock = MockRepositoryBackend::new();
    mock.expect_root().return_const(root.to_path_buf());
    mock
}

fn plain_plan(destiny: Destiny, registration: Option<RegistrationMode>) -> ItemPlan {
    ItemPlan {
        url: "http://site.test/data/test.txt".into(),
        incoming_path: PathBuf::from("data/test.txt"),
        public_path: PathBuf::from("data/test.txt"),
        is_archive: false,
        destiny,
        directories: ArchiveDirectories::Strip,
        registration,
    }
}

fn updated(downloaded: bool) -> StagedItem {
    StagedItem {
        repo_relative_path: PathBuf::from("data/test.txt"),
        downloaded,
        updated: true,
        byte_count: if downloaded { 11 } else { 0 },
    }
}

#[tokio::test]
async fn drop_destiny_registers_then_releases_content() {
    let tmp = tempdir().unwrap();
    let (incoming_root, public_root) = (tmp.path().join("in"), tmp.path().join("pub"));
    fs::create_dir_all(incoming_root.join("data")).unwrap();
    fs::write(incoming_root.join("data/test.txt"), "abracadabra").unwrap();

    let mut incoming = backend(&incoming_root);
    incoming
        .expect_add_file()
        .with(
            eq(Path::new("data/test.txt")),
            eq(Some("http://site.test/data/test.txt".to_string())),
        )
        .times(1)
        .returning(|_, _| Ok(()));
    incoming
        .expect_drop_content()
        .with(eq(Path::new("data/test.txt")))
        .times(1)
        .returning(|_| Ok(()));
    let mut public = backend(&public_root);
    public.expect_add_file().times(1).returning(|_, _| Ok(()));

    let resolver = DestinyResolver::new(&incoming, &public, &TarExtractor, false, false);
    let resolution = resolver
        .resolve(&plain_plan(Destiny::Drop, None), &updated(true), &mut Journal::new())
        .await
        .unwrap();

    assert!(resolution.outcome.incoming_changed);
    assert!(resolution.outcome.public_changed);
    assert_eq!(resolution.public_touched, vec![PathBuf::from("data/test.txt")]);
    assert_eq!(
        fs::read_to_string(public_root.join("data/test.txt")).unwrap(),
        "abracadabra"
    );
}

#[tokio::test]
async fn unchanged_item_with_public_copy_is_left_alone() {
    let tmp = tempdir().unwrap();
    let (incoming_root, public_root) = (tmp.path().join("in"), tmp.path().join("pub"));
    for root in [&incoming_root, &public_root] {
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("data/test.txt"), "abracadabra").unwrap();
    }
    // No expectations beyond `root`: any backend call fails the test.
    let incoming = backend(&incoming_root);
    let public = backend(&public_root);

    let resolver = DestinyResolver::new(&incoming, &public, &TarExtractor, false, false);
    let staged = StagedItem {
        repo_relative_path: PathBuf::from("data/test.txt"),
        ..StagedItem::default()
    };
    let resolution = resolver
        .resolve(&plain_plan(Destiny::Annex, None), &staged, &mut Journal::new())
        .await
        .unwrap();
    assert!(!resolution.outcome.incoming_changed);
    assert!(!resolution.outcome.public_changed);
}

#[tokio::test]
async fn fast_item_on_backend_without_url_support_fails_the_item() {
    let tmp = tempdir().unwrap();
    let (incoming_root, public_root) = (tmp.path().join("in"), tmp.path().join("pub"));

    let incoming = backend(&incoming_root);
    let mut public = backend(&public_root);
    public.expect_register_url().times(1).returning(|_, _, _| {
        Err(BackendError::Unsupported {
            capability: "register_url",
        })
    });

    let resolver = DestinyResolver::new(&incoming, &public, &TarExtractor, false, false);
    let err = resolver
        .resolve(
            &plain_plan(Destiny::Annex, Some(RegistrationMode::Fast)),
            &updated(false),
            &mut Journal::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ItemError::Backend(BackendError::Unsupported { .. })
    ));
}

#[tokio::test]
async fn same_store_shares_the_artifact_and_unifies_flags() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("store");
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("data/test.txt"), "abracadabra").unwrap();

    let mut store = backend(&root);
    store.expect_add_file().times(1).returning(|_, _| Ok(()));

    let resolver = DestinyResolver::new(&store, &store, &TarExtractor, true, false);
    let resolution = resolver
        .resolve(&plain_plan(Destiny::Auto, None), &updated(true), &mut Journal::new())
        .await
        .unwrap();
    assert!(resolution.outcome.incoming_changed);
    assert!(resolution.outcome.public_changed);
    assert!(resolution.public_touched.is_empty());
}

#[tokio::test]
async fn dry_run_journals_instead_of_calling_backends() {
    let tmp = tempdir().unwrap();
    let (incoming_root, public_root) = (tmp.path().join("in"), tmp.path().join("pub"));
    let incoming = backend(&incoming_root);
    let public = backend(&public_root);

    let resolver = DestinyResolver::new(&incoming, &public, &TarExtractor, false, true);
    let mut journal = Journal::new();
    let plan = ItemPlan {
        url: "http://site.test/data/1.tar.gz".into(),
        incoming_path: PathBuf::from("data/1.tar.gz"),
        public_path: PathBuf::from("data/1"),
        is_archive: true,
        destiny: Destiny::Rm,
        directories: ArchiveDirectories::Strip,
        registration: None,
    };
    resolver.resolve(&plan, &updated(true), &mut journal).await.unwrap();

    assert_eq!(
        journal.actions(),
        &[
            PlannedAction::Extract {
                archive: PathBuf::from("data/1.tar.gz"),
                into: PathBuf::from("data/1"),
            },
            PlannedAction::Remove {
                store: StoreRole::Incoming,
                path: PathBuf::from("data/1.tar.gz"),
            },
        ]
    );
    assert!(!public_root.exists());
}
