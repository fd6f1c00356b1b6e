//! End-to-end anchoring against scratch git repositories.
//!
//! Exercises: create_annotation, fetch_annotations, fetch_many, check_range,
//! toggle_annotation, delete_annotation, fingerprints.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use smilebin::anchor::{AnnotationResolver, CreateOutcome, Placement, ToggleOutcome};
use smilebin::error::{AnchorError, RepositoryError};
use smilebin::git::history::InspectorCache;
use smilebin::git::types::LineRange;
use smilebin::translate::UnifiedDiffTranslator;
use smilebin_core::{
    Annotation, AnnotationStore, DeleteOutcome, FileFingerprint, NewAddress, NewAnnotation,
    SqliteStore, StoreError,
};
use tempfile::TempDir;

type Resolver<S = SqliteStore> = AnnotationResolver<S, UnifiedDiffTranslator>;

fn run_git(workspace: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args([
            "-c",
            "user.name=Tester",
            "-c",
            "user.email=tester@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {:?} failed", args);
}

fn git_output(workspace: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(args)
        .output()
        .expect("run git");
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

fn numbered(n: u32) -> String {
    (1..=n).map(|i| format!("line {i}\n")).collect()
}

fn commit_all(workspace: &Path, message: &str) -> String {
    run_git(workspace, &["add", "-A"]);
    run_git(workspace, &["commit", "-q", "-m", message]);
    git_output(workspace, &["rev-parse", "HEAD"])
}

fn inspectors() -> Arc<InspectorCache> {
    Arc::new(InspectorCache::new("git", Duration::from_secs(30)))
}

/// A repository with `src/app.txt` committed as 20 numbered lines.
struct Fixture {
    _dir: TempDir,
    repo: PathBuf,
    file: PathBuf,
    base: String,
    resolver: Resolver,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();
        run_git(&repo, &["init", "-q"]);
        run_git(
            &repo,
            &["remote", "add", "origin", "git@github.com:acme/widgets.git"],
        );
        let file = repo.join("src/app.txt");
        std::fs::write(&file, numbered(20)).unwrap();
        let base = commit_all(&repo, "base");

        let db_path = dir.path().join("annotations.db");
        let store = SqliteStore::open(&db_path.to_string_lossy()).await.unwrap();
        let resolver = AnnotationResolver::new(store, UnifiedDiffTranslator, inspectors(), "ada");

        Self {
            _dir: dir,
            repo,
            file,
            base,
            resolver,
        }
    }

    fn write(&self, content: &str) {
        std::fs::write(&self.file, content).unwrap();
    }

    async fn create(&self, start: u32, end: u32) -> String {
        match self
            .resolver
            .create_annotation(&self.file, "nice", "smiley", start, end)
            .await
            .unwrap()
        {
            CreateOutcome::Created { id, .. } => id,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    async fn placements(&self) -> Vec<(String, Placement)> {
        self.resolver
            .fetch_annotations(&self.file, false)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.annotation.id, r.placement))
            .collect()
    }
}

fn range(start: u32, end: u32) -> Placement {
    Placement::Current(LineRange::new(start, end).unwrap())
}

#[tokio::test]
async fn unchanged_file_round_trips() {
    let fx = Fixture::new().await;
    let id = fx.create(5, 7).await;

    let fetched = fx.resolver.fetch_annotations(&fx.file, false).await.unwrap();
    assert_eq!(fetched.len(), 1);
    let a = &fetched[0].annotation;
    assert_eq!(a.id, id);
    assert_eq!((a.start_line, a.end_line), (5, 7));
    assert_eq!(a.user_id, "ada");
    assert_eq!(a.code_snippet, "line 5\nline 6\nline 7");
    assert_eq!(a.addresses.len(), 1);
    assert_eq!(a.addresses[0].revision, fx.base);
    assert_eq!(fetched[0].placement, range(5, 7));
}

#[tokio::test]
async fn insertion_above_shifts_the_annotation() {
    let fx = Fixture::new().await;
    let id = fx.create(10, 10).await;

    let mut content = String::from("new a\nnew b\nnew c\n");
    content.push_str(&numbered(20));
    fx.write(&content);
    assert_eq!(fx.placements().await, vec![(id.clone(), range(13, 13))]);

    commit_all(&fx.repo, "prepend");
    assert_eq!(fx.placements().await, vec![(id, range(13, 13))]);
}

#[tokio::test]
async fn range_spanning_two_revisions_gets_two_addresses() {
    let fx = Fixture::new().await;
    let mut content = numbered(20);
    content.push_str("tail 21\ntail 22\n");
    fx.write(&content);
    let tip = commit_all(&fx.repo, "append");

    let check = fx
        .resolver
        .check_range(&fx.file, LineRange::new(19, 22).unwrap())
        .await
        .unwrap();
    assert!(check.is_committed());
    assert_eq!(check.spans.len(), 2);

    match fx
        .resolver
        .create_annotation(&fx.file, "spans", "wink", 19, 22)
        .await
        .unwrap()
    {
        CreateOutcome::Created { addresses, .. } => assert_eq!(addresses, 2),
        other => panic!("expected Created, got {other:?}"),
    }

    let fetched = fx.resolver.fetch_annotations(&fx.file, false).await.unwrap();
    assert_eq!(fetched.len(), 1);
    let addrs = &fetched[0].annotation.addresses;
    assert_eq!(addrs[0].sequence, 0);
    assert_eq!(addrs[0].revision, fx.base);
    assert_eq!((addrs[0].start_line, addrs[0].end_line), (19, 20));
    assert_eq!(addrs[1].sequence, 1);
    assert_eq!(addrs[1].revision, tip);
    assert_eq!((addrs[1].start_line, addrs[1].end_line), (21, 22));
    assert_eq!(fetched[0].placement, range(19, 22));
}

#[tokio::test]
async fn uncommitted_lines_are_declined_without_writing() {
    let fx = Fixture::new().await;
    fx.write(&numbered(20).replace("line 3\n", "edited 3\n"));

    let outcome = fx
        .resolver
        .create_annotation(&fx.file, "nope", "smiley", 2, 4)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CreateOutcome::Declined {
            uncommitted_lines: vec![3]
        }
    );
    assert!(fx.placements().await.is_empty());

    let check = fx
        .resolver
        .check_range(&fx.file, LineRange::new(2, 4).unwrap())
        .await
        .unwrap();
    assert_eq!(check.uncommitted_lines(), vec![3]);
}

#[tokio::test]
async fn skip_flag_returns_nothing() {
    let fx = Fixture::new().await;
    fx.create(1, 2).await;
    assert!(fx
        .resolver
        .fetch_annotations(&fx.file, true)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(fx.placements().await.len(), 1);
}

#[tokio::test]
async fn rewritten_history_hides_orphaned_annotations() {
    let fx = Fixture::new().await;
    let kept = fx.create(1, 1).await;

    fx.write(&numbered(20).replace("line 5\n", "changed 5\n"));
    commit_all(&fx.repo, "change line 5");
    fx.create(5, 5).await;
    assert_eq!(fx.placements().await.len(), 2);

    run_git(&fx.repo, &["reset", "-q", "--hard", &fx.base]);
    assert_eq!(fx.placements().await, vec![(kept, range(1, 1))]);
}

#[tokio::test]
async fn fingerprints_are_stable_across_sessions() {
    let fx = Fixture::new().await;
    let first = fx.resolver.fingerprints(&fx.file).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].as_str().starts_with(&fx.base));

    let other: Resolver<SqliteStore> = AnnotationResolver::new(
        fx.resolver.store().clone(),
        UnifiedDiffTranslator,
        inspectors(),
        "someone-else",
    );
    assert_eq!(other.fingerprints(&fx.file).await.unwrap(), first);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let fx = Fixture::new().await;
    let id = fx.create(2, 3).await;

    assert_eq!(
        fx.resolver.delete_annotation(&id).await.unwrap(),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        fx.resolver.delete_annotation(&id).await.unwrap(),
        DeleteOutcome::NotFound
    );
    assert_eq!(
        fx.resolver.delete_annotation("no-such-id").await.unwrap(),
        DeleteOutcome::NotFound
    );
    assert!(fx.placements().await.is_empty());
}

#[tokio::test]
async fn toggle_adds_then_removes() {
    let fx = Fixture::new().await;

    let created = match fx
        .resolver
        .toggle_annotation(&fx.file, 4, "", "heart")
        .await
        .unwrap()
    {
        ToggleOutcome::Created { id } => id,
        other => panic!("expected Created, got {other:?}"),
    };
    let fetched = fx.resolver.fetch_annotations(&fx.file, false).await.unwrap();
    assert_eq!(fetched[0].annotation.emoticon, "heart");
    assert_eq!(fetched[0].placement, range(4, 4));

    assert_eq!(
        fx.resolver
            .toggle_annotation(&fx.file, 4, "", "heart")
            .await
            .unwrap(),
        ToggleOutcome::Removed { id: created }
    );
    assert!(fx.placements().await.is_empty());
}

#[tokio::test]
async fn deleted_anchor_line_is_not_positioned() {
    let fx = Fixture::new().await;
    let id = fx.create(5, 5).await;
    let untouched = fx.create(8, 9).await;

    fx.write(&numbered(20).replace("line 5\n", ""));
    let placements = fx.placements().await;
    assert_eq!(placements.len(), 2);
    assert!(placements.contains(&(id, Placement::Deleted)));
    assert!(placements.contains(&(untouched, range(7, 8))));
}

#[tokio::test]
async fn batch_fetch_isolates_failures() {
    let fx = Fixture::new().await;
    fx.create(1, 1).await;

    let outside = TempDir::new().unwrap();
    let stray = outside.path().join("stray.txt");
    std::fs::write(&stray, "not tracked\n").unwrap();

    let results = fx
        .resolver
        .fetch_many(&[fx.file.clone(), stray.clone()], false)
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].path, fx.file);
    assert!(results[0].failure.is_none());
    assert_eq!(results[0].annotations.len(), 1);
    assert_eq!(results[1].path, stray);
    assert!(matches!(
        results[1].failure,
        Some(AnchorError::Repository(RepositoryError::NotARepository(_)))
    ));
}

#[tokio::test]
async fn untracked_file_has_no_annotations() {
    let fx = Fixture::new().await;
    let scratch = fx.repo.join("scratch.txt");
    std::fs::write(&scratch, "a\nb\n").unwrap();
    assert!(fx
        .resolver
        .fetch_annotations(&scratch, false)
        .await
        .unwrap()
        .is_empty());
}

/// Store whose transport is down.
struct UnreachableStore;

impl AnnotationStore for UnreachableStore {
    async fn lookup_or_create_repo(&self, _url: &str) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("offline".to_owned()))
    }

    async fn fetch(
        &self,
        _repo_url: &str,
        _fingerprints: &[FileFingerprint],
    ) -> Result<Vec<Annotation>, StoreError> {
        Err(StoreError::Unavailable("offline".to_owned()))
    }

    async fn create_annotation(&self, _annotation: &NewAnnotation) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("offline".to_owned()))
    }

    async fn create_address(&self, _address: &NewAddress) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("offline".to_owned()))
    }

    async fn delete_annotation(&self, _id: &str) -> Result<DeleteOutcome, StoreError> {
        Err(StoreError::Unavailable("offline".to_owned()))
    }
}

#[tokio::test]
async fn unreachable_store_is_a_transport_error() {
    let fx = Fixture::new().await;
    let offline: Resolver<UnreachableStore> =
        AnnotationResolver::new(UnreachableStore, UnifiedDiffTranslator, inspectors(), "ada");

    let err = offline.fetch_annotations(&fx.file, false).await.unwrap_err();
    assert!(err.is_transport(), "{err:?}");

    let err = offline
        .create_annotation(&fx.file, "x", "smiley", 1, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AnchorError::Transport(_)), "{err:?}");

    assert!(offline.fetch_annotations(&fx.file, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_ranges_are_rejected() {
    let fx = Fixture::new().await;
    for (start, end) in [(0, 1), (4, 3)] {
        let err = fx
            .resolver
            .create_annotation(&fx.file, "x", "smiley", start, end)
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::InvalidRange { .. }), "{err:?}");
    }
}

#[tokio::test]
async fn ranges_past_end_of_file_are_rejected() {
    let fx = Fixture::new().await;

    let err = fx
        .resolver
        .create_annotation(&fx.file, "x", "smiley", 19, 25)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AnchorError::InvalidRange { start: 19, end: 25 }),
        "{err:?}"
    );
    assert!(fx.placements().await.is_empty(), "nothing may be written");

    let err = fx
        .resolver
        .check_range(&fx.file, LineRange::new(21, 21).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AnchorError::InvalidRange { .. }), "{err:?}");

    // The last line itself is fine.
    fx.create(19, 20).await;
}

#[tokio::test]
async fn files_without_history_are_declined() {
    let fx = Fixture::new().await;
    let fresh = fx.repo.join("src/new.txt");
    std::fs::write(&fresh, "one\ntwo\nthree\n").unwrap();

    let untracked = fx
        .resolver
        .create_annotation(&fresh, "x", "smiley", 1, 2)
        .await
        .unwrap();
    assert_eq!(
        untracked,
        CreateOutcome::Declined {
            uncommitted_lines: vec![1, 2]
        }
    );
    let check = fx
        .resolver
        .check_range(&fresh, LineRange::new(1, 3).unwrap())
        .await
        .unwrap();
    assert_eq!(check.uncommitted_lines(), vec![1, 2, 3]);

    // Staging does not change the answer.
    run_git(&fx.repo, &["add", "src/new.txt"]);
    let staged = fx
        .resolver
        .create_annotation(&fresh, "x", "smiley", 1, 2)
        .await
        .unwrap();
    assert_eq!(staged, untracked);
}

#[tokio::test]
async fn create_after_later_commits_stores_revision_relative_lines() {
    let fx = Fixture::new().await;
    let mut content = String::from("new a\nnew b\nnew c\n");
    content.push_str(&numbered(20));
    fx.write(&content);
    let tip = commit_all(&fx.repo, "prepend");

    match fx
        .resolver
        .create_annotation(&fx.file, "shifted", "smiley", 2, 12)
        .await
        .unwrap()
    {
        CreateOutcome::Created { addresses, .. } => assert_eq!(addresses, 2),
        other => panic!("expected Created, got {other:?}"),
    }

    let fetched = fx.resolver.fetch_annotations(&fx.file, false).await.unwrap();
    assert_eq!(fetched.len(), 1);
    let a = &fetched[0].annotation;
    let addrs: Vec<(u32, &str, u32, u32)> = a
        .addresses
        .iter()
        .map(|x| (x.sequence, x.revision.as_str(), x.start_line, x.end_line))
        .collect();
    assert_eq!(
        addrs,
        vec![(0, tip.as_str(), 2, 3), (1, fx.base.as_str(), 1, 9)]
    );
    assert_eq!((a.start_line, a.end_line), (2, 9));
    assert_eq!(a.code_snippet, "new b\nnew c\nline 1\nline 2\nline 3\nline 4\nline 5\nline 6\nline 7\nline 8\nline 9");
    assert_eq!(fetched[0].placement, range(2, 12));
}

/// Store that writes annotation rows but refuses every address after the first.
struct FirstAddressOnly(SqliteStore);

impl AnnotationStore for FirstAddressOnly {
    async fn lookup_or_create_repo(&self, url: &str) -> Result<String, StoreError> {
        self.0.lookup_or_create_repo(url).await
    }

    async fn fetch(
        &self,
        repo_url: &str,
        fingerprints: &[FileFingerprint],
    ) -> Result<Vec<Annotation>, StoreError> {
        self.0.fetch(repo_url, fingerprints).await
    }

    async fn create_annotation(&self, annotation: &NewAnnotation) -> Result<String, StoreError> {
        self.0.create_annotation(annotation).await
    }

    async fn create_address(&self, address: &NewAddress) -> Result<String, StoreError> {
        if address.sequence > 0 {
            return Err(StoreError::Unavailable("connection reset".to_owned()));
        }
        self.0.create_address(address).await
    }

    async fn delete_annotation(&self, id: &str) -> Result<DeleteOutcome, StoreError> {
        self.0.delete_annotation(id).await
    }
}

#[tokio::test]
async fn partial_address_write_is_reported_and_left_unpositioned() {
    let fx = Fixture::new().await;
    let mut content = numbered(20);
    content.push_str("tail 21\ntail 22\n");
    fx.write(&content);
    commit_all(&fx.repo, "append");

    let flaky: Resolver<FirstAddressOnly> = AnnotationResolver::new(
        FirstAddressOnly(fx.resolver.store().clone()),
        UnifiedDiffTranslator,
        inspectors(),
        "ada",
    );
    let err = flaky
        .create_annotation(&fx.file, "spans", "smiley", 19, 22)
        .await
        .unwrap_err();
    let written = match &err {
        AnchorError::IncompleteChain {
            annotation_id,
            persisted: 1,
            expected: 2,
            ..
        } => annotation_id.clone(),
        other => panic!("expected IncompleteChain, got {other:?}"),
    };
    assert!(err.is_transport());

    let fetched = fx.resolver.fetch_annotations(&fx.file, false).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].annotation.id, written);
    assert_eq!(fetched[0].annotation.addresses.len(), 1);
    assert!(
        matches!(fetched[0].placement, Placement::Unresolved { .. }),
        "{:?}",
        fetched[0].placement
    );
}
