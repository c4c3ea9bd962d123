//! Branch composition: upstream plus one squashed commit per change-set
//!
//! A run moves through `Start → Synced → Reset → Integrating(1..=n) → Done`.
//! Any backend failure stops the run where it is and leaves the composer in
//! [`Phase::Failed`]; nothing is rolled back and a new run starts over from
//! the fetch.

mod error;

pub use error::{ComposeError, Position, Step};

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError};
use crate::changeset::{self, ChangeSetRef};
use crate::git::CommitId;

/// Default working branch name
pub const DEFAULT_WORKING_BRANCH: &str = "temp";

/// Default commit message template: the bare change-set identifier
pub const DEFAULT_MESSAGE_TEMPLATE: &str = "{id}";

/// Remote-tracking branch the base is rebuilt from, e.g. `upstream/master`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamRef {
    /// Remote name
    pub remote: String,
    /// Branch name on the remote
    pub branch: String,
}

impl UpstreamRef {
    /// Track `branch` on `remote`
    #[must_use]
    pub fn new(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    /// Fully qualified remote-tracking ref
    #[must_use]
    pub fn spec(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }
}

impl fmt::Display for UpstreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.branch)
    }
}

/// Everything one run needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Branch rebuilt by the run
    pub base_branch: String,
    /// Scratch branch used while integrating one change-set
    pub working_branch: String,
    /// Snapshot the base branch is reset to
    pub upstream: UpstreamRef,
    /// Change-sets to apply, in order
    pub changesets: Vec<ChangeSetRef>,
    /// Commit message template; `{id}` is replaced by the identifier
    pub message_template: String,
    /// Fetch the remote before resolving anything
    pub fetch: bool,
    /// Run even if the working tree has local changes
    pub allow_dirty: bool,
}

impl Plan {
    /// Plan with default working branch and message template
    #[must_use]
    pub fn new(
        base_branch: impl Into<String>,
        upstream: UpstreamRef,
        changesets: Vec<ChangeSetRef>,
    ) -> Self {
        Self {
            base_branch: base_branch.into(),
            working_branch: DEFAULT_WORKING_BRANCH.to_string(),
            upstream,
            changesets,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            fetch: true,
            allow_dirty: false,
        }
    }

    /// Check the plan is internally consistent
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::InvalidPlan`] describing the first problem
    pub fn validate(&self) -> Result<(), ComposeError> {
        let invalid = |reason: String| Err(ComposeError::InvalidPlan { reason });

        for (what, value) in [
            ("base branch", &self.base_branch),
            ("working branch", &self.working_branch),
            ("upstream remote", &self.upstream.remote),
            ("upstream branch", &self.upstream.branch),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{what} name is empty"));
            }
        }
        if self.base_branch == self.working_branch {
            return invalid(format!(
                "working branch must differ from base branch '{}'",
                self.base_branch
            ));
        }
        if self.message_template.trim().is_empty() {
            return invalid("commit message template is empty".to_string());
        }
        changeset::ensure_unique(&self.changesets).or_else(|e| invalid(e.to_string()))
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing done yet
    Start,
    /// Remote fetched and all refs resolved
    Synced,
    /// Base branch reset to upstream
    Reset,
    /// Integrating change-set `index` (1-based) of `total`
    Integrating {
        /// 1-based position of the change-set
        index: usize,
        /// Number of change-sets in the plan
        total: usize,
    },
    /// Every change-set integrated
    Done,
    /// A step failed; the run is over
    Failed,
}

/// A change-set and the remote head it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSetHead {
    /// The change-set
    pub changeset: ChangeSetRef,
    /// Commit at its fetched head
    pub head: CommitId,
}

/// Refs resolved before anything is modified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preflight {
    /// The upstream ref
    pub upstream: UpstreamRef,
    /// Commit the base branch will be reset to
    pub upstream_commit: CommitId,
    /// Resolved change-set heads, in plan order
    pub heads: Vec<ChangeSetHead>,
}

/// A change-set squashed onto the base
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Integrated {
    /// The change-set
    pub changeset: ChangeSetRef,
    /// Head it was taken from
    pub head: CommitId,
    /// Squashed commit now on the base branch
    pub commit: CommitId,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// The rebuilt branch, left checked out
    pub base_branch: String,
    /// Commit the base branch was reset to
    pub upstream_commit: CommitId,
    /// One entry per change-set, in the order applied
    pub integrated: Vec<Integrated>,
}

impl Summary {
    /// Tip of the base branch after the run
    #[must_use]
    pub fn tip(&self) -> &CommitId {
        self.integrated
            .last()
            .map_or(&self.upstream_commit, |last| &last.commit)
    }
}

/// Drives a [`Backend`] through a composition run
#[derive(Debug)]
pub struct Composer<B> {
    backend: B,
    phase: Phase,
}

impl<B: Backend> Composer<B> {
    /// Create a composer over `backend`
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            phase: Phase::Start,
        }
    }

    /// Phase reached by the latest run
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The backend
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Give the backend back
    #[must_use]
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Fetch and resolve every ref the plan needs without touching a branch
    ///
    /// # Errors
    ///
    /// Returns an error if the plan is invalid, the working tree is dirty
    /// (unless allowed), the fetch fails, or any ref is missing
    pub fn check(&mut self, plan: &Plan) -> Result<Preflight, ComposeError> {
        self.phase = Phase::Start;
        let result = self.sync(plan);
        self.finish(result)
    }

    /// Rebuild the base branch as upstream plus each change-set, squashed
    ///
    /// # Errors
    ///
    /// Returns the first failure; see [`ComposeError`]
    pub fn compose(&mut self, plan: &Plan) -> Result<Summary, ComposeError> {
        self.phase = Phase::Start;
        let result = self.run(plan);
        let result = self.finish(result);
        if result.is_ok() {
            self.enter(Phase::Done);
        }
        result
    }

    fn finish<T>(&mut self, result: Result<T, ComposeError>) -> Result<T, ComposeError> {
        if let Err(e) = &result {
            error!(phase = ?self.phase, error = %e, "Composition failed");
            self.enter(Phase::Failed);
        }
        result
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "Phase transition");
        self.phase = phase;
    }

    fn run(&mut self, plan: &Plan) -> Result<Summary, ComposeError> {
        let preflight = self.sync(plan)?;

        self.backend
            .create_or_reset_branch(&plan.base_branch, &preflight.upstream_commit)
            .map_err(|source| ComposeError::Backend {
                step: Step::ResetBase,
                position: None,
                source,
            })?;
        info!(
            base = %plan.base_branch,
            upstream = %plan.upstream,
            commit = preflight.upstream_commit.short(),
            "Reset base branch to upstream"
        );
        self.enter(Phase::Reset);

        let total = preflight.heads.len();
        let mut integrated = Vec::with_capacity(total);
        for (i, head) in preflight.heads.into_iter().enumerate() {
            let position = Position {
                index: i + 1,
                changeset: head.changeset,
            };
            self.enter(Phase::Integrating {
                index: position.index,
                total,
            });
            let commit = self.integrate(plan, &position, &head.head)?;
            info!(
                changeset = %position.changeset,
                index = position.index,
                total,
                commit = commit.short(),
                "Integrated change-set"
            );
            integrated.push(Integrated {
                changeset: position.changeset,
                head: head.head,
                commit,
            });
        }

        info!(
            base = %plan.base_branch,
            count = integrated.len(),
            "Composition complete"
        );
        Ok(Summary {
            base_branch: plan.base_branch.clone(),
            upstream_commit: preflight.upstream_commit,
            integrated,
        })
    }

    fn sync(&mut self, plan: &Plan) -> Result<Preflight, ComposeError> {
        plan.validate()?;

        if plan.allow_dirty {
            warn!("Skipping working tree check; local changes will be discarded");
        } else {
            let clean = self
                .backend
                .is_clean()
                .map_err(|source| ComposeError::Backend {
                    step: Step::Status,
                    position: None,
                    source,
                })?;
            if !clean {
                return Err(ComposeError::DirtyWorkingTree);
            }
        }

        let remote = &plan.upstream.remote;
        if plan.fetch {
            info!(remote = %remote, "Fetching branches and pull request heads");
            self.backend
                .fetch_all(remote)
                .map_err(|source| ComposeError::Fetch {
                    remote: remote.clone(),
                    source,
                })?;
        } else {
            info!(remote = %remote, "Skipping fetch; using refs already present");
        }

        let upstream_commit = self.resolve(&plan.upstream.spec(), None)?;
        let mut heads = Vec::with_capacity(plan.changesets.len());
        for (i, changeset) in plan.changesets.iter().enumerate() {
            let position = Position {
                index: i + 1,
                changeset: changeset.clone(),
            };
            let head = self.resolve(&changeset.tracking_ref(remote), Some(position))?;
            heads.push(ChangeSetHead {
                changeset: changeset.clone(),
                head,
            });
        }

        self.enter(Phase::Synced);
        Ok(Preflight {
            upstream: plan.upstream.clone(),
            upstream_commit,
            heads,
        })
    }

    fn resolve(&mut self, spec: &str, position: Option<Position>) -> Result<CommitId, ComposeError> {
        self.backend.resolve_ref(spec).map_err(|source| match source {
            BackendError::RefNotFound { spec } => ComposeError::RefNotFound { spec, position },
            source => ComposeError::Backend {
                step: Step::Resolve,
                position,
                source,
            },
        })
    }

    fn integrate(
        &mut self,
        plan: &Plan,
        position: &Position,
        head: &CommitId,
    ) -> Result<CommitId, ComposeError> {
        let base = plan.base_branch.as_str();
        let working = plan.working_branch.as_str();
        let step = |step: Step| {
            let position = position.clone();
            move |source: BackendError| ComposeError::Backend {
                step,
                position: Some(position),
                source,
            }
        };

        // Stale scratch branch from an earlier failed run
        self.backend
            .delete_branch(working)
            .map_err(step(Step::DeleteWorkingBranch))?;
        self.backend
            .create_or_reset_branch(working, head)
            .map_err(step(Step::CreateWorkingBranch))?;

        self.backend.rebase(base).map_err(|source| match source {
            BackendError::Conflict { paths, .. } => ComposeError::Conflict {
                position: position.clone(),
                base: base.to_string(),
                paths,
            },
            source => step(Step::Rebase)(source),
        })?;
        self.backend
            .verify_rebase_complete(base)
            .map_err(|source| match source {
                BackendError::IncompleteRebase { reason } => ComposeError::IncompleteRebase {
                    position: position.clone(),
                    reason,
                },
                source => step(Step::VerifyRebase)(source),
            })?;

        // Squash: move the branch back to the base but keep the rebased files
        self.backend
            .reset_index_to(base)
            .map_err(step(Step::Flatten))?;
        self.backend.stage_all().map_err(step(Step::Stage))?;
        let message = position.changeset.commit_message(&plan.message_template);
        let commit = self
            .backend
            .commit(&message)
            .map_err(|source| ComposeError::Commit {
                position: position.clone(),
                source,
            })?;

        self.backend
            .checkout(base)
            .map_err(step(Step::Checkout))?;
        self.backend
            .reset_hard(working)
            .map_err(step(Step::FastForward))?;
        self.backend
            .delete_branch(working)
            .map_err(step(Step::DeleteWorkingBranch))?;

        Ok(commit)
    }
}
