//! Test fixture for setting up an upstream repository and a local clone

use std::fs;
use std::path::{Path, PathBuf};

use branch_composer::git::{Git, Identity};
use branch_composer::{ChangeSetRef, Composer, GitBackend, Plan, UpstreamRef};
use tempfile::TempDir;

use super::helpers::git;

/// Remote name the local clone uses for upstream
pub const REMOTE: &str = "upstream";

/// An upstream repository publishing pull request heads, and a local clone
///
/// Pull requests are stored upstream as `refs/pull/<n>/head`, the way a
/// hosting service exposes them.
pub struct GitFixture {
    /// Keeps both repositories alive
    _temp_dir: TempDir,
    /// Path to the upstream repository
    pub upstream_path: PathBuf,
    /// Path to the local clone the composer runs in
    pub local_path: PathBuf,
}

impl GitFixture {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        // Canonicalize to handle symlinked temp dirs.
        let root = temp_dir
            .path()
            .canonicalize()
            .unwrap_or_else(|_| temp_dir.path().to_path_buf());
        let upstream_path = root.join("upstream");
        let local_path = root.join("local");

        fs::create_dir_all(&upstream_path)?;
        git(&upstream_path, &["init", "--quiet"])?;
        // Git's default branch is user-configurable; pin it.
        git(&upstream_path, &["symbolic-ref", "HEAD", "refs/heads/master"])?;
        write_files(
            &upstream_path,
            &[
                ("README.md", Some("# Upstream\n")),
                ("src/lib.rs", Some("pub fn answer() -> u32 {\n    42\n}\n")),
            ],
        )?;
        git(&upstream_path, &["add", "--all"])?;
        git(&upstream_path, &["commit", "--quiet", "-m", "Initial commit"])?;

        git(
            &root,
            &[
                "clone",
                "--quiet",
                "--origin",
                REMOTE,
                &upstream_path.to_string_lossy(),
                &local_path.to_string_lossy(),
            ],
        )?;
        git(&local_path, &["config", "user.name", "Local"])?;
        git(&local_path, &["config", "user.email", "local@example.com"])?;
        git(&local_path, &["config", "commit.gpgsign", "false"])?;

        Ok(Self {
            _temp_dir: temp_dir,
            upstream_path,
            local_path,
        })
    }

    /// Publish pull request `number` upstream, one commit per edit set
    ///
    /// The branch starts at upstream `master`. Each edit writes a file
    /// (`Some`) or deletes it (`None`).
    pub fn pull_request(
        &self,
        number: u32,
        commits: &[&[(&str, Option<&str>)]],
    ) -> Result<String, Box<dyn std::error::Error>> {
        let dir = &self.upstream_path;
        let branch = format!("pr-{number}");
        git(dir, &["checkout", "--quiet", "-B", &branch, "master"])?;
        for (i, edits) in commits.iter().enumerate() {
            write_files(dir, edits)?;
            git(dir, &["add", "--all"])?;
            let message = format!("PR {number} part {}", i + 1);
            git(dir, &["commit", "--quiet", "--allow-empty", "-m", &message])?;
        }
        let head = git(dir, &["rev-parse", "HEAD"])?;
        git(dir, &["update-ref", &format!("refs/pull/{number}/head"), &head])?;
        git(dir, &["checkout", "--quiet", "master"])?;
        git(dir, &["branch", "--quiet", "-D", &branch])?;
        Ok(head)
    }

    /// Add a commit to upstream `master`
    pub fn advance_upstream(
        &self,
        edits: &[(&str, Option<&str>)],
        message: &str,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let dir = &self.upstream_path;
        write_files(dir, edits)?;
        git(dir, &["add", "--all"])?;
        git(dir, &["commit", "--quiet", "-m", message])?;
        Ok(git(dir, &["rev-parse", "HEAD"])?)
    }

    /// Run git in the local clone
    pub fn local_git(&self, args: &[&str]) -> Result<String, Box<dyn std::error::Error>> {
        git(&self.local_path, args)
    }

    /// Read a file from the local working tree
    pub fn read_local(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.local_path.join(path)).ok()
    }

    /// A composer running real git in the local clone
    pub fn composer(&self) -> Composer<GitBackend> {
        let git = Git::new(&self.local_path).with_identity(Some(Identity {
            name: "Composer".to_string(),
            email: "composer@example.com".to_string(),
        }));
        Composer::new(GitBackend::new(git))
    }

    /// Plan composing `batteries` from `upstream/master` plus `ids`
    pub fn plan(ids: &[&str]) -> Result<Plan, Box<dyn std::error::Error>> {
        let changesets = ids
            .iter()
            .map(|id| ChangeSetRef::new(*id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Plan::new(
            "batteries",
            UpstreamRef::new(REMOTE, "master"),
            changesets,
        ))
    }
}

fn write_files(dir: &Path, edits: &[(&str, Option<&str>)]) -> std::io::Result<()> {
    for (path, content) in edits {
        let full = dir.join(path);
        match content {
            Some(content) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&full, content)?;
            }
            None => fs::remove_file(&full)?,
        }
    }
    Ok(())
}
