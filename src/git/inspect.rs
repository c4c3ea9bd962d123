//! Post-rebase sanity checks using libgit2
//!
//! `git rebase` exiting zero is not taken on trust: before a change-set is
//! squashed, the repository must show no operation in progress, no unmerged
//! index entries, and (optionally) no conflict markers among the lines the
//! change-set adds on top of the base.

use std::path::Path;

use git2::{DiffFormat, Repository, RepositoryState};

/// What was found in the repository after a rebase reported success
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaseInspection {
    /// A rebase, merge, cherry-pick or similar operation is still in progress
    pub in_progress: bool,
    /// Paths with unmerged index entries
    pub unmerged_paths: Vec<String>,
    /// Paths whose added lines contain conflict markers
    pub marker_paths: Vec<String>,
}

impl RebaseInspection {
    /// True if nothing suspicious was found
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.in_progress && self.unmerged_paths.is_empty() && self.marker_paths.is_empty()
    }

    /// Human-readable reason the rebase is considered incomplete
    #[must_use]
    pub fn describe(&self) -> String {
        let mut reasons = Vec::new();
        if self.in_progress {
            reasons.push("an operation is still in progress".to_string());
        }
        if !self.unmerged_paths.is_empty() {
            reasons.push(format!("unmerged paths: {}", self.unmerged_paths.join(", ")));
        }
        if !self.marker_paths.is_empty() {
            reasons.push(format!(
                "conflict markers added in: {}",
                self.marker_paths.join(", ")
            ));
        }
        if reasons.is_empty() {
            "rebase complete".to_string()
        } else {
            reasons.join("; ")
        }
    }
}

/// Inspect the repository at `workdir` after rebasing `HEAD` onto `base`
///
/// # Errors
///
/// Returns an error if the repository, `HEAD`, or `base` cannot be read
pub fn inspect_rebase(
    workdir: &Path,
    base: &str,
    check_markers: bool,
) -> Result<RebaseInspection, git2::Error> {
    let repo = Repository::open(workdir)?;

    let in_progress = repo.state() != RepositoryState::Clean;
    let unmerged_paths = unmerged_paths(&repo)?;
    let marker_paths = if check_markers && !in_progress {
        added_marker_paths(&repo, base)?
    } else {
        Vec::new()
    };

    Ok(RebaseInspection {
        in_progress,
        unmerged_paths,
        marker_paths,
    })
}

fn unmerged_paths(repo: &Repository) -> Result<Vec<String>, git2::Error> {
    let index = repo.index()?;
    if !index.has_conflicts() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            paths.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn added_marker_paths(repo: &Repository, base: &str) -> Result<Vec<String>, git2::Error> {
    let base_tree = repo.revparse_single(base)?.peel_to_tree()?;
    let head_tree = repo.head()?.peel_to_tree()?;
    let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;

    let mut paths: Vec<String> = Vec::new();
    diff.print(DiffFormat::Patch, |delta, _hunk, line| {
        if line.origin() == '+' && is_conflict_marker(line.content()) {
            if let Some(path) = delta.new_file().path() {
                let path = path.to_string_lossy().into_owned();
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        true
    })?;
    Ok(paths)
}

/// Start and end markers only; a bare `=======` is common in prose
fn is_conflict_marker(content: &[u8]) -> bool {
    ["<<<<<<<", ">>>>>>>"].iter().any(|marker| {
        content.strip_prefix(marker.as_bytes()).is_some_and(|rest| {
            rest.first()
                .is_none_or(|b| *b == b' ' || *b == b'\n' || *b == b'\r')
        })
    })
}
