//! Backend that drives the `git` executable

use tracing::{debug, warn};

use super::{Backend, BackendError, BackendResult};
use crate::git::{CommitId, Git, inspect_rebase};

/// [`Backend`] running git as a subprocess in one working tree
#[derive(Debug, Clone)]
pub struct GitBackend {
    git: Git,
    check_conflict_markers: bool,
}

impl GitBackend {
    /// Create a backend around a configured [`Git`] handle
    #[must_use]
    pub const fn new(git: Git) -> Self {
        Self {
            git,
            check_conflict_markers: true,
        }
    }

    /// Enable or disable scanning rebased changes for conflict markers
    #[must_use]
    pub fn with_conflict_marker_check(mut self, enabled: bool) -> Self {
        self.check_conflict_markers = enabled;
        self
    }

    /// The underlying git handle
    #[must_use]
    pub const fn git(&self) -> &Git {
        &self.git
    }

    fn branch_exists(&self, name: &str) -> BackendResult<bool> {
        let output = self.git.probe(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{name}"),
        ])?;
        Ok(output.status.success())
    }

    fn conflicted_paths(&self) -> BackendResult<Vec<String>> {
        let output = self.git.stdout(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn has_staged_changes(&self) -> BackendResult<bool> {
        // Exit 1 = differences, exit 0 = none
        let output = self.git.probe(&["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(BackendError::CommandFailed {
                command: "git diff --cached --quiet".to_string(),
                stderr: crate::git::combined_output(&output),
            }),
        }
    }
}

fn looks_like_conflict(output: &str) -> bool {
    output.contains("CONFLICT")
        || output.contains("could not apply")
        || output.contains("Resolve all conflicts manually")
}

fn looks_like_nothing_to_commit(output: &str) -> bool {
    output.contains("nothing to commit") || output.contains("nothing added to commit")
}

impl Backend for GitBackend {
    fn fetch_all(&mut self, remote: &str) -> BackendResult<()> {
        let branches = format!("+refs/heads/*:refs/remotes/{remote}/*");
        let pulls = format!("+refs/pull/*/head:refs/remotes/{remote}/pull/*");
        self.git.run(&["fetch", remote, &branches, &pulls])?;
        Ok(())
    }

    fn resolve_ref(&mut self, spec: &str) -> BackendResult<CommitId> {
        let peeled = format!("{spec}^{{commit}}");
        let output = self
            .git
            .probe(&["rev-parse", "--verify", "--quiet", &peeled])?;
        if !output.status.success() {
            return Err(BackendError::RefNotFound {
                spec: spec.to_string(),
            });
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(spec, id = %id, "Resolved ref");
        Ok(CommitId::new(id))
    }

    fn create_or_reset_branch(&mut self, name: &str, from: &CommitId) -> BackendResult<()> {
        self.git
            .run(&["checkout", "--quiet", "--force", "-B", name, from.as_str()])?;
        Ok(())
    }

    fn delete_branch(&mut self, name: &str) -> BackendResult<()> {
        if !self.branch_exists(name)? {
            debug!(branch = name, "Branch absent, nothing to delete");
            return Ok(());
        }
        self.git.run(&["branch", "--quiet", "-D", name])?;
        Ok(())
    }

    fn checkout(&mut self, name: &str) -> BackendResult<()> {
        self.git.run(&["checkout", "--quiet", name, "--"])?;
        Ok(())
    }

    fn reset_hard(&mut self, target: &str) -> BackendResult<()> {
        self.git.run(&["reset", "--quiet", "--hard", target, "--"])?;
        Ok(())
    }

    fn rebase(&mut self, onto: &str) -> BackendResult<()> {
        match self.git.run(&["rebase", onto]) {
            Ok(_) => Ok(()),
            Err(BackendError::CommandFailed { command, stderr }) => {
                if looks_like_conflict(&stderr) {
                    let paths = self.conflicted_paths().unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to list conflicted paths");
                        Vec::new()
                    });
                    Err(BackendError::Conflict {
                        onto: onto.to_string(),
                        paths,
                    })
                } else {
                    Err(BackendError::CommandFailed { command, stderr })
                }
            }
            Err(e) => Err(e),
        }
    }

    fn verify_rebase_complete(&mut self, onto: &str) -> BackendResult<()> {
        let inspection = inspect_rebase(self.git.workdir(), onto, self.check_conflict_markers)?;
        if inspection.is_complete() {
            Ok(())
        } else {
            Err(BackendError::IncompleteRebase {
                reason: inspection.describe(),
            })
        }
    }

    fn reset_index_to(&mut self, target: &str) -> BackendResult<()> {
        self.git.run(&["reset", "--quiet", "--mixed", target, "--"])?;
        Ok(())
    }

    fn stage_all(&mut self) -> BackendResult<()> {
        self.git.run(&["add", "--all"])?;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> BackendResult<CommitId> {
        if !self.has_staged_changes()? {
            return Err(BackendError::NothingToCommit);
        }
        match self.git.run(&["commit", "--quiet", "-m", message]) {
            Ok(_) => {}
            Err(BackendError::CommandFailed { stderr, .. })
                if looks_like_nothing_to_commit(&stderr) =>
            {
                return Err(BackendError::NothingToCommit);
            }
            Err(e) => return Err(e),
        }
        self.resolve_ref("HEAD")
    }

    fn is_clean(&mut self) -> BackendResult<bool> {
        let status = self.git.stdout(&["status", "--porcelain"])?;
        Ok(status.is_empty())
    }
}
