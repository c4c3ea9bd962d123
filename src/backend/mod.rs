//! Version-control backend seam
//!
//! The composer drives the repository only through [`Backend`]. Production
//! runs use [`GitBackend`], which shells out to git; tests use
//! [`MemoryBackend`], which models branches, commits and trees in memory.

mod cli;
mod memory;

pub use cli::GitBackend;
pub use memory::{MemoryBackend, Op, Tree};

use thiserror::Error;

use crate::git::CommitId;

/// Errors reported by a backend operation
#[derive(Debug, Error)]
pub enum BackendError {
    /// Command exited non-zero
    #[error("git command failed: {command}\n{stderr}")]
    CommandFailed {
        /// The command line that failed
        command: String,
        /// Combined stdout/stderr of the command
        stderr: String,
    },

    /// Rebase stopped with conflicts
    #[error("rebase onto {onto} stopped with conflicts in: {}", display_paths(.paths))]
    Conflict {
        /// The ref being rebased onto
        onto: String,
        /// Conflicting paths, when the backend could determine them
        paths: Vec<String>,
    },

    /// A ref or revision could not be resolved
    #[error("ref not found: {spec}")]
    RefNotFound {
        /// The spec that failed to resolve
        spec: String,
    },

    /// Commit refused because the index matches `HEAD`
    #[error("nothing to commit")]
    NothingToCommit,

    /// Rebase reported success but left the repository unfinished
    #[error("rebase did not complete cleanly: {reason}")]
    IncompleteRebase {
        /// What was left behind
        reason: String,
    },

    /// Process could not be spawned or its output read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// libgit2 failed while inspecting the repository
    #[error("repository error: {0}")]
    Repository(#[from] git2::Error),
}

fn display_paths(paths: &[String]) -> String {
    if paths.is_empty() {
        "(unknown paths)".to_string()
    } else {
        paths.join(", ")
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Synchronous operations the composer needs from a version-control system
///
/// Each call completes (or fails) before returning; there is no
/// background work and no retry.
pub trait Backend {
    /// Fetch every branch and pull-request head from `remote`
    ///
    /// # Errors
    ///
    /// Returns an error if the remote is unreachable or rejects the fetch
    fn fetch_all(&mut self, remote: &str) -> BackendResult<()>;

    /// Resolve a ref or revision to a commit id
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::RefNotFound`] if `spec` names no commit
    fn resolve_ref(&mut self, spec: &str) -> BackendResult<CommitId>;

    /// Point branch `name` at `from` (creating it if needed) and check it out,
    /// discarding local changes
    ///
    /// # Errors
    ///
    /// Returns an error if the branch cannot be created or checked out
    fn create_or_reset_branch(&mut self, name: &str, from: &CommitId) -> BackendResult<()>;

    /// Delete local branch `name`; succeeds if it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the branch exists but cannot be deleted
    fn delete_branch(&mut self, name: &str) -> BackendResult<()>;

    /// Check out an existing local branch
    ///
    /// # Errors
    ///
    /// Returns an error if the branch does not exist or checkout fails
    fn checkout(&mut self, name: &str) -> BackendResult<()>;

    /// Move the current branch, index and working tree to `target`
    ///
    /// # Errors
    ///
    /// Returns an error if `target` does not resolve or the reset fails
    fn reset_hard(&mut self, target: &str) -> BackendResult<()>;

    /// Rebase the current branch onto `onto`
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] if the commits do not apply cleanly
    fn rebase(&mut self, onto: &str) -> BackendResult<()>;

    /// Confirm a rebase onto `onto` that reported success really finished
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::IncompleteRebase`] if anything was left behind
    fn verify_rebase_complete(&mut self, onto: &str) -> BackendResult<()>;

    /// Move the current branch and index to `target`, keeping the working tree
    ///
    /// # Errors
    ///
    /// Returns an error if `target` does not resolve or the reset fails
    fn reset_index_to(&mut self, target: &str) -> BackendResult<()>;

    /// Stage every change in the working tree, including deletions and new files
    ///
    /// # Errors
    ///
    /// Returns an error if staging fails
    fn stage_all(&mut self) -> BackendResult<()>;

    /// Commit the index on the current branch
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NothingToCommit`] if the index matches `HEAD`
    fn commit(&mut self, message: &str) -> BackendResult<CommitId>;

    /// True if the working tree has no staged, unstaged, or untracked changes
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be read
    fn is_clean(&mut self) -> BackendResult<bool>;
}
