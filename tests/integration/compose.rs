//! End-to-end composition runs against real git repositories

use branch_composer::{ComposeError, Phase};
use pretty_assertions::assert_eq;

use crate::common::{GitFixture, ref_exists};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Commit subjects on `batteries` above upstream, oldest first
fn composed_subjects(fixture: &GitFixture) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let log = fixture.local_git(&[
        "log",
        "--reverse",
        "--format=%s",
        "refs/remotes/upstream/master..batteries",
    ])?;
    Ok(log.lines().map(String::from).collect())
}

#[test]
fn test_compose_squashes_each_pull_request() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    fixture.pull_request(
        20,
        &[
            &[("feature-b.txt", Some("b1\n"))],
            &[("feature-b.txt", Some("b2\n"))],
            &[("notes.txt", Some("n\n"))],
        ],
    )?;
    fixture.pull_request(30, &[&[("README.md", Some("# Patched\n"))]])?;

    let mut composer = fixture.composer();
    let summary = composer.compose(&GitFixture::plan(&["10", "20", "30"])?)?;

    assert_eq!(composer.phase(), Phase::Done);
    assert_eq!(composed_subjects(&fixture)?, vec!["10", "20", "30"]);
    assert_eq!(
        fixture.local_git(&["rev-parse", "batteries"])?,
        summary.tip().as_str()
    );
    assert_eq!(fixture.read_local("feature-b.txt").as_deref(), Some("b2\n"));
    assert_eq!(fixture.read_local("README.md").as_deref(), Some("# Patched\n"));

    assert_eq!(
        fixture.local_git(&["symbolic-ref", "--short", "HEAD"])?,
        "batteries"
    );
    assert!(!ref_exists(&fixture.local_path, "refs/heads/temp"));
    assert_eq!(fixture.local_git(&["status", "--porcelain"])?, "");
    Ok(())
}

#[test]
fn test_compose_commits_use_configured_identity() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;

    fixture.composer().compose(&GitFixture::plan(&["10"])?)?;

    assert_eq!(
        fixture.local_git(&["log", "-1", "--format=%an <%ae>", "batteries"])?,
        "Composer <composer@example.com>"
    );
    Ok(())
}

#[test]
fn test_compose_is_repeatable() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    fixture.pull_request(20, &[&[("feature-b.txt", Some("b\n"))]])?;
    let plan = GitFixture::plan(&["10", "20"])?;

    fixture.composer().compose(&plan)?;
    let first_tree = fixture.local_git(&["rev-parse", "batteries^{tree}"])?;

    fixture.composer().compose(&plan)?;
    let second_tree = fixture.local_git(&["rev-parse", "batteries^{tree}"])?;

    assert_eq!(first_tree, second_tree);
    assert_eq!(composed_subjects(&fixture)?, vec!["10", "20"]);
    Ok(())
}

#[test]
fn test_compose_picks_up_new_upstream_commits() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    let plan = GitFixture::plan(&["10"])?;

    fixture.composer().compose(&plan)?;
    let upstream_tip = fixture.advance_upstream(&[("CHANGELOG.md", Some("v2\n"))], "Release")?;
    let summary = fixture.composer().compose(&plan)?;

    assert_eq!(summary.upstream_commit.as_str(), upstream_tip);
    assert_eq!(fixture.read_local("CHANGELOG.md").as_deref(), Some("v2\n"));
    assert_eq!(composed_subjects(&fixture)?, vec!["10"]);
    Ok(())
}

#[test]
fn test_compose_stops_at_conflicting_pull_request() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("src/lib.rs", Some("pub fn answer() -> u32 {\n    10\n}\n"))]])?;
    fixture.pull_request(20, &[&[("feature-b.txt", Some("b\n"))]])?;
    fixture.pull_request(30, &[&[("src/lib.rs", Some("pub fn answer() -> u32 {\n    30\n}\n"))]])?;

    let mut composer = fixture.composer();
    let error = composer
        .compose(&GitFixture::plan(&["10", "20", "30"])?)
        .err()
        .ok_or("expected a conflict")?;

    match &error {
        ComposeError::Conflict {
            position, paths, ..
        } => {
            assert_eq!(position.index, 3);
            assert_eq!(position.changeset.as_str(), "30");
            assert_eq!(paths, &vec!["src/lib.rs".to_string()]);
        }
        other => return Err(format!("unexpected error: {other}").into()),
    }
    assert_eq!(composer.phase(), Phase::Failed);
    assert_eq!(composed_subjects(&fixture)?, vec!["10", "20"]);
    assert!(fixture.local_path.join(".git/rebase-merge").exists());
    Ok(())
}

#[test]
fn test_compose_missing_pull_request_changes_nothing() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;

    let error = fixture
        .composer()
        .compose(&GitFixture::plan(&["10", "404"])?)
        .err()
        .ok_or("expected a missing ref")?;

    match &error {
        ComposeError::RefNotFound { spec, position } => {
            assert_eq!(spec, "refs/remotes/upstream/pull/404");
            assert_eq!(position.as_ref().map(|p| p.index), Some(2));
        }
        other => return Err(format!("unexpected error: {other}").into()),
    }
    assert!(!ref_exists(&fixture.local_path, "refs/heads/batteries"));
    Ok(())
}

#[test]
fn test_compose_refuses_untracked_files() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    std::fs::write(fixture.local_path.join("scratch.txt"), "mine\n")?;

    let error = fixture
        .composer()
        .compose(&GitFixture::plan(&["10"])?)
        .err()
        .ok_or("expected a dirty tree error")?;

    assert!(matches!(error, ComposeError::DirtyWorkingTree));
    assert_eq!(fixture.read_local("scratch.txt").as_deref(), Some("mine\n"));
    Ok(())
}

#[test]
fn test_compose_replaces_stale_working_branch() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    fixture.local_git(&["branch", "temp"])?;

    fixture.composer().compose(&GitFixture::plan(&["10"])?)?;

    assert!(!ref_exists(&fixture.local_path, "refs/heads/temp"));
    assert_eq!(composed_subjects(&fixture)?, vec!["10"]);
    Ok(())
}

#[test]
fn test_compose_rejects_committed_conflict_markers() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(
        10,
        &[&[(
            "src/lib.rs",
            Some("<<<<<<< HEAD\npub fn answer() -> u32 {\n    42\n}\n=======\n>>>>>>> other\n"),
        )]],
    )?;

    let error = fixture
        .composer()
        .compose(&GitFixture::plan(&["10"])?)
        .err()
        .ok_or("expected an incomplete rebase")?;

    match &error {
        ComposeError::IncompleteRebase { position, reason } => {
            assert_eq!(position.index, 1);
            assert!(reason.contains("src/lib.rs"), "reason: {reason}");
        }
        other => return Err(format!("unexpected error: {other}").into()),
    }
    Ok(())
}

#[test]
fn test_compose_pull_request_already_upstream_fails_commit() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    fixture.advance_upstream(&[("feature-a.txt", Some("a\n"))], "Merge feature a")?;

    let error = fixture
        .composer()
        .compose(&GitFixture::plan(&["10"])?)
        .err()
        .ok_or("expected a commit failure")?;

    assert!(matches!(error, ComposeError::Commit { .. }), "got: {error}");
    Ok(())
}

#[test]
fn test_compose_without_changesets_tracks_upstream() -> TestResult {
    let fixture = GitFixture::new()?;
    let summary = fixture.composer().compose(&GitFixture::plan(&[])?)?;

    assert!(summary.integrated.is_empty());
    assert_eq!(
        fixture.local_git(&["rev-parse", "batteries"])?,
        fixture.local_git(&["rev-parse", "refs/remotes/upstream/master"])?
    );
    Ok(())
}

#[test]
fn test_compose_with_paths_named_like_branches() -> TestResult {
    let fixture = GitFixture::new()?;
    fixture.advance_upstream(
        &[
            ("temp/notes.txt", Some("scratch notes\n")),
            ("batteries/list.txt", Some("aa\n")),
        ],
        "Add directories named like the branches",
    )?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    fixture.pull_request(20, &[&[("temp/notes.txt", Some("edited notes\n"))]])?;

    fixture.composer().compose(&GitFixture::plan(&["10", "20"])?)?;

    assert_eq!(composed_subjects(&fixture)?, vec!["10", "20"]);
    assert_eq!(
        fixture.read_local("temp/notes.txt").as_deref(),
        Some("edited notes\n")
    );
    assert!(!ref_exists(&fixture.local_path, "refs/heads/temp"));
    Ok(())
}
