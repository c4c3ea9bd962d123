//! Composition failures

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::changeset::ChangeSetRef;

/// Backend step that was running when a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Checking the working tree for local changes
    Status,
    /// Fetching the upstream remote
    Fetch,
    /// Resolving the upstream ref or a change-set head
    Resolve,
    /// Resetting the base branch to upstream
    ResetBase,
    /// Deleting the working branch
    DeleteWorkingBranch,
    /// Creating the working branch from a change-set head
    CreateWorkingBranch,
    /// Rebasing the working branch onto the base
    Rebase,
    /// Checking the rebase really completed
    VerifyRebase,
    /// Resetting the working branch's index to the base
    Flatten,
    /// Staging the flattened change
    Stage,
    /// Committing the squashed change-set
    Commit,
    /// Switching back to the base branch
    Checkout,
    /// Moving the base branch to the squashed commit
    FastForward,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Status => "status check",
            Self::Fetch => "fetch",
            Self::Resolve => "ref resolution",
            Self::ResetBase => "base reset",
            Self::DeleteWorkingBranch => "working branch deletion",
            Self::CreateWorkingBranch => "working branch creation",
            Self::Rebase => "rebase",
            Self::VerifyRebase => "rebase verification",
            Self::Flatten => "flatten",
            Self::Stage => "stage",
            Self::Commit => "commit",
            Self::Checkout => "checkout",
            Self::FastForward => "fast-forward",
        };
        f.write_str(name)
    }
}

/// A change-set and its 1-based position in the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// 1-based index in the plan's change-set list
    pub index: usize,
    /// The change-set at that index
    pub changeset: ChangeSetRef,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "change-set {} (#{} in list)", self.changeset, self.index)
    }
}

/// Why a composition run stopped
///
/// Every variant is fatal. The repository is left exactly as the last
/// backend call left it.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The plan cannot be run as given
    #[error("invalid plan: {reason}")]
    InvalidPlan {
        /// What is wrong with it
        reason: String,
    },

    /// The working tree has changes a hard reset would destroy
    #[error(
        "working tree has uncommitted or untracked changes; commit or stash them, or pass --allow-dirty"
    )]
    DirtyWorkingTree,

    /// The upstream remote could not be fetched
    #[error("failed to fetch from remote '{remote}'")]
    Fetch {
        /// Remote name
        remote: String,
        /// Backend failure
        #[source]
        source: BackendError,
    },

    /// The upstream ref or a change-set head does not exist
    #[error("{}", describe_missing(.spec, .position.as_ref()))]
    RefNotFound {
        /// The ref that failed to resolve
        spec: String,
        /// The change-set whose head is missing, if any
        position: Option<Position>,
    },

    /// A change-set does not rebase cleanly onto the composed base
    #[error("{position} conflicts with {base}: {}", describe_paths(.paths))]
    Conflict {
        /// The failing change-set
        position: Position,
        /// Base branch being rebased onto
        base: String,
        /// Conflicting paths, when known
        paths: Vec<String>,
    },

    /// Rebase reported success but left unfinished work behind
    #[error("{position}: rebase did not complete cleanly: {reason}")]
    IncompleteRebase {
        /// The failing change-set
        position: Position,
        /// What was left behind
        reason: String,
    },

    /// The squashed commit could not be created
    #[error("{position}: commit failed")]
    Commit {
        /// The failing change-set
        position: Position,
        /// Backend failure
        #[source]
        source: BackendError,
    },

    /// Any other backend step failed
    #[error("{}", describe_step(.step, .position.as_ref()))]
    Backend {
        /// Step that failed
        step: Step,
        /// The change-set being integrated, if any
        position: Option<Position>,
        /// Backend failure
        #[source]
        source: BackendError,
    },
}

impl ComposeError {
    /// The change-set the run failed on, if it failed while integrating one
    #[must_use]
    pub const fn position(&self) -> Option<&Position> {
        match self {
            Self::Conflict { position, .. }
            | Self::IncompleteRebase { position, .. }
            | Self::Commit { position, .. } => Some(position),
            Self::RefNotFound { position, .. } | Self::Backend { position, .. } => {
                position.as_ref()
            }
            Self::InvalidPlan { .. } | Self::DirtyWorkingTree | Self::Fetch { .. } => None,
        }
    }

    /// The backend step that failed, if one did
    #[must_use]
    pub const fn step(&self) -> Option<Step> {
        match self {
            Self::InvalidPlan { .. } => None,
            Self::DirtyWorkingTree => Some(Step::Status),
            Self::Fetch { .. } => Some(Step::Fetch),
            Self::RefNotFound { .. } => Some(Step::Resolve),
            Self::Conflict { .. } => Some(Step::Rebase),
            Self::IncompleteRebase { .. } => Some(Step::VerifyRebase),
            Self::Commit { .. } => Some(Step::Commit),
            Self::Backend { step, .. } => Some(*step),
        }
    }
}

fn describe_missing(spec: &str, position: Option<&Position>) -> String {
    match position {
        Some(position) => format!("{position} has no fetched head at {spec}"),
        None => format!("ref not found: {spec}"),
    }
}

fn describe_paths(paths: &[String]) -> String {
    if paths.is_empty() {
        "unknown paths".to_string()
    } else {
        paths.join(", ")
    }
}

fn describe_step(step: &Step, position: Option<&Position>) -> String {
    match position {
        Some(position) => format!("{position}: {step} failed"),
        None => format!("{step} failed"),
    }
}
