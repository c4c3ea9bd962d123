//! Preflight checks against real git repositories

use branch_composer::{ComposeError, Phase};

use crate::common::{GitFixture, ref_exists};

#[test]
fn test_check_resolves_heads_without_touching_branches() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = GitFixture::new()?;
    let head_10 = fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    let head_20 = fixture.pull_request(20, &[&[("feature-b.txt", Some("b\n"))]])?;

    let mut composer = fixture.composer();
    let preflight = composer.check(&GitFixture::plan(&["20", "10"])?)?;

    let heads: Vec<_> = preflight
        .heads
        .iter()
        .map(|h| (h.changeset.as_str(), h.head.as_str()))
        .collect();
    assert_eq!(heads, vec![("20", head_20.as_str()), ("10", head_10.as_str())]);
    assert_eq!(composer.phase(), Phase::Synced);

    assert!(ref_exists(&fixture.local_path, "refs/remotes/upstream/pull/10"));
    assert!(!ref_exists(&fixture.local_path, "refs/heads/batteries"));
    assert_eq!(
        fixture.local_git(&["symbolic-ref", "--short", "HEAD"])?,
        "master"
    );
    Ok(())
}

#[test]
fn test_check_reports_unknown_remote() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = GitFixture::new()?;
    let mut plan = GitFixture::plan(&[])?;
    plan.upstream.remote = "nowhere".to_string();

    let error = fixture
        .composer()
        .check(&plan)
        .err()
        .ok_or("expected a fetch error")?;

    assert!(
        matches!(&error, ComposeError::Fetch { remote, .. } if remote == "nowhere"),
        "got: {error}"
    );
    Ok(())
}

#[test]
fn test_check_without_fetch_sees_only_existing_refs() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = GitFixture::new()?;
    fixture.pull_request(10, &[&[("feature-a.txt", Some("a\n"))]])?;
    let mut plan = GitFixture::plan(&["10"])?;
    plan.fetch = false;

    let error = fixture
        .composer()
        .check(&plan)
        .err()
        .ok_or("expected a missing ref")?;
    assert!(matches!(error, ComposeError::RefNotFound { .. }));

    plan.fetch = true;
    fixture.composer().check(&plan)?;
    plan.fetch = false;
    let preflight = fixture.composer().check(&plan)?;
    assert_eq!(preflight.heads.len(), 1);
    Ok(())
}
