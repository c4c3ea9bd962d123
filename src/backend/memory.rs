//! In-memory backend for exercising the composer without a repository
//!
//! Commits carry whole file trees. Rebasing replays each commit's file-level
//! changes onto the new base and reports a conflict when a touched file was
//! also changed on the base in a different way.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Backend, BackendError, BackendResult};
use crate::git::CommitId;

/// File path to file contents
pub type Tree = BTreeMap<String, String>;

/// A backend call, recorded in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `fetch_all(remote)`
    Fetch(String),
    /// `resolve_ref(spec)`
    Resolve(String),
    /// `create_or_reset_branch(name, from)`
    CreateOrReset(String, CommitId),
    /// `delete_branch(name)`
    Delete(String),
    /// `checkout(name)`
    Checkout(String),
    /// `reset_hard(target)`
    ResetHard(String),
    /// `rebase(onto)`
    Rebase(String),
    /// `verify_rebase_complete(onto)`
    VerifyRebase(String),
    /// `reset_index_to(target)`
    ResetIndex(String),
    /// `stage_all()`
    StageAll,
    /// `commit(message)`
    Commit(String),
    /// `is_clean()`
    IsClean,
}

#[derive(Debug, Clone)]
struct Commit {
    parent: Option<CommitId>,
    tree: Tree,
    message: String,
}

/// [`Backend`] holding a whole repository in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    commits: HashMap<CommitId, Commit>,
    next_id: u64,
    refs: BTreeMap<String, CommitId>,
    remotes: BTreeMap<String, BTreeMap<String, CommitId>>,
    head: Option<String>,
    index: Tree,
    worktree: Tree,
    rebase_in_progress: bool,
    unmerged: Vec<String>,
    unfinished_next_rebase: bool,
    failures: Vec<Op>,
    ops: Vec<Op>,
}

impl MemoryBackend {
    /// Empty repository with no commits, refs or remotes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a commit object and return its id
    pub fn add_commit(&mut self, parent: Option<&CommitId>, tree: Tree, message: &str) -> CommitId {
        self.next_id += 1;
        let id = CommitId::new(format!("{:040x}", self.next_id));
        self.commits.insert(
            id.clone(),
            Commit {
                parent: parent.cloned(),
                tree,
                message: message.to_string(),
            },
        );
        id
    }

    /// Set a ref on `remote` (e.g. `refs/heads/master`), creating the remote
    pub fn set_remote_ref(&mut self, remote: &str, name: &str, id: &CommitId) {
        self.remotes
            .entry(remote.to_string())
            .or_default()
            .insert(name.to_string(), id.clone());
    }

    /// Register `remote` with a root commit on `branch` holding `files`
    pub fn seed_upstream(&mut self, remote: &str, branch: &str, files: &[(&str, &str)]) -> CommitId {
        let tree = files
            .iter()
            .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
            .collect();
        let id = self.add_commit(None, tree, "Initial commit");
        self.set_remote_ref(remote, &format!("refs/heads/{branch}"), &id);
        id
    }

    /// Publish a pull request on `remote` as one commit on top of `base`
    ///
    /// Each edit writes a file (`Some`) or deletes it (`None`).
    pub fn add_pull_request(
        &mut self,
        remote: &str,
        number: &str,
        base: &CommitId,
        edits: &[(&str, Option<&str>)],
    ) -> CommitId {
        let mut tree = self
            .commits
            .get(base)
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        apply_edits(&mut tree, edits);
        let id = self.add_commit(Some(base), tree, &format!("Pull request {number}"));
        self.set_remote_ref(remote, &format!("refs/pull/{number}/head"), &id);
        id
    }

    /// Make the next call equal to `op` fail as if git exited non-zero
    pub fn fail_on(&mut self, op: Op) {
        self.failures.push(op);
    }

    /// Make the next rebase report success while leaving it unfinished
    pub fn leave_next_rebase_unfinished(&mut self) {
        self.unfinished_next_rebase = true;
    }

    /// Overwrite a file in the working tree without staging it
    pub fn write_worktree_file(&mut self, path: &str, content: &str) {
        self.worktree.insert(path.to_string(), content.to_string());
    }

    /// Every call made so far
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Name of the checked-out branch
    #[must_use]
    pub fn current_branch(&self) -> Option<&str> {
        self.head.as_deref()
    }

    /// True if local branch `name` exists
    #[must_use]
    pub fn branch_exists(&self, name: &str) -> bool {
        self.refs.contains_key(&format!("refs/heads/{name}"))
    }

    /// True while a conflicted or unfinished rebase is pending
    #[must_use]
    pub const fn rebase_in_progress(&self) -> bool {
        self.rebase_in_progress
    }

    /// File tree of the commit `spec` resolves to
    #[must_use]
    pub fn tree_of(&self, spec: &str) -> Option<&Tree> {
        let id = self.lookup(spec)?;
        self.commits.get(&id).map(|c| &c.tree)
    }

    /// Commit message of `id`
    #[must_use]
    pub fn message_of(&self, id: &CommitId) -> Option<&str> {
        self.commits.get(id).map(|c| c.message.as_str())
    }

    /// First-parent history of `spec`, newest first
    #[must_use]
    pub fn history(&self, spec: &str) -> Vec<CommitId> {
        let mut history = Vec::new();
        let mut cursor = self.lookup(spec);
        while let Some(id) = cursor {
            cursor = self.commits.get(&id).and_then(|c| c.parent.clone());
            history.push(id);
        }
        history
    }

    fn record(&mut self, op: Op) -> BackendResult<()> {
        self.ops.push(op.clone());
        if let Some(pos) = self.failures.iter().position(|f| *f == op) {
            self.failures.remove(pos);
            return Err(BackendError::CommandFailed {
                command: format!("{op:?}"),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn lookup(&self, spec: &str) -> Option<CommitId> {
        if spec == "HEAD" {
            return self.head_commit();
        }
        [
            spec.to_string(),
            format!("refs/heads/{spec}"),
            format!("refs/remotes/{spec}"),
        ]
        .iter()
        .find_map(|name| self.refs.get(name).cloned())
        .or_else(|| {
            let id = CommitId::new(spec);
            self.commits.contains_key(&id).then_some(id)
        })
    }

    fn head_commit(&self) -> Option<CommitId> {
        let branch = self.head.as_ref()?;
        self.refs.get(&format!("refs/heads/{branch}")).cloned()
    }

    fn head_tree(&self) -> Tree {
        self.head_commit()
            .and_then(|id| self.commits.get(&id))
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn tree(&self, id: &CommitId) -> Tree {
        self.commits.get(id).map(|c| c.tree.clone()).unwrap_or_default()
    }

    fn require(&self, spec: &str) -> BackendResult<CommitId> {
        self.lookup(spec).ok_or_else(|| BackendError::RefNotFound {
            spec: spec.to_string(),
        })
    }

    fn current_branch_ref(&self) -> BackendResult<String> {
        self.head
            .as_ref()
            .map(|branch| format!("refs/heads/{branch}"))
            .ok_or_else(|| BackendError::CommandFailed {
                command: "HEAD".to_string(),
                stderr: "fatal: not on a branch".to_string(),
            })
    }

    fn move_current_branch(&mut self, id: CommitId) -> BackendResult<()> {
        let name = self.current_branch_ref()?;
        self.refs.insert(name, id);
        Ok(())
    }

    fn ancestors(&self, id: &CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut cursor = Some(id.clone());
        while let Some(current) = cursor {
            cursor = self.commits.get(&current).and_then(|c| c.parent.clone());
            seen.insert(current);
        }
        seen
    }

    /// Commits on `tip` that are not on `onto`, oldest first
    fn commits_to_replay(&self, tip: &CommitId, onto: &CommitId) -> Vec<CommitId> {
        let onto_ancestors = self.ancestors(onto);
        let mut replay = Vec::new();
        let mut cursor = Some(tip.clone());
        while let Some(current) = cursor {
            if onto_ancestors.contains(&current) {
                break;
            }
            cursor = self.commits.get(&current).and_then(|c| c.parent.clone());
            replay.push(current);
        }
        replay.reverse();
        replay
    }
}

fn apply_edits(tree: &mut Tree, edits: &[(&str, Option<&str>)]) {
    for (path, content) in edits {
        match content {
            Some(content) => {
                tree.insert((*path).to_string(), (*content).to_string());
            }
            None => {
                tree.remove(*path);
            }
        }
    }
}

/// Replay the change from `before` to `after` onto `target`
///
/// Returns the conflicting paths if a touched file differs on `target` from
/// both sides.
fn replay(target: &Tree, before: &Tree, after: &Tree) -> Result<Tree, Vec<String>> {
    let mut result = target.clone();
    let mut conflicts = Vec::new();

    let touched: BTreeMap<&String, ()> = before
        .keys()
        .chain(after.keys())
        .filter(|path| before.get(*path) != after.get(*path))
        .map(|path| (path, ()))
        .collect();

    for path in touched.keys() {
        let current = target.get(*path);
        let old = before.get(*path);
        let new = after.get(*path);
        if current == new {
            continue;
        }
        if current != old {
            conflicts.push((*path).clone());
            continue;
        }
        match new {
            Some(content) => {
                result.insert((*path).clone(), content.clone());
            }
            None => {
                result.remove(*path);
            }
        }
    }

    if conflicts.is_empty() {
        Ok(result)
    } else {
        Err(conflicts)
    }
}

fn added_marker_paths(base: &Tree, head: &Tree) -> Vec<String> {
    head.iter()
        .filter(|(path, content)| {
            let before = base.get(*path).map(String::as_str).unwrap_or_default();
            content.lines().any(|line| {
                (line.starts_with("<<<<<<<") || line.starts_with(">>>>>>>"))
                    && !before.lines().any(|old| old == line)
            })
        })
        .map(|(path, _)| path.clone())
        .collect()
}

impl Backend for MemoryBackend {
    fn fetch_all(&mut self, remote: &str) -> BackendResult<()> {
        self.record(Op::Fetch(remote.to_string()))?;
        let Some(remote_refs) = self.remotes.get(remote).cloned() else {
            return Err(BackendError::CommandFailed {
                command: format!("git fetch {remote}"),
                stderr: format!("fatal: '{remote}' does not appear to be a git repository"),
            });
        };

        for (name, id) in remote_refs {
            let tracking = if let Some(branch) = name.strip_prefix("refs/heads/") {
                format!("refs/remotes/{remote}/{branch}")
            } else if let Some(number) = name
                .strip_prefix("refs/pull/")
                .and_then(|rest| rest.strip_suffix("/head"))
            {
                format!("refs/remotes/{remote}/pull/{number}")
            } else {
                continue;
            };
            self.refs.insert(tracking, id);
        }
        Ok(())
    }

    fn resolve_ref(&mut self, spec: &str) -> BackendResult<CommitId> {
        self.record(Op::Resolve(spec.to_string()))?;
        self.require(spec)
    }

    fn create_or_reset_branch(&mut self, name: &str, from: &CommitId) -> BackendResult<()> {
        self.record(Op::CreateOrReset(name.to_string(), from.clone()))?;
        if !self.commits.contains_key(from) {
            return Err(BackendError::RefNotFound {
                spec: from.to_string(),
            });
        }
        self.refs.insert(format!("refs/heads/{name}"), from.clone());
        self.head = Some(name.to_string());
        self.index = self.tree(from);
        self.worktree = self.index.clone();
        Ok(())
    }

    fn delete_branch(&mut self, name: &str) -> BackendResult<()> {
        self.record(Op::Delete(name.to_string()))?;
        if self.head.as_deref() == Some(name) {
            return Err(BackendError::CommandFailed {
                command: format!("git branch -D {name}"),
                stderr: format!("error: cannot delete branch '{name}' used by worktree"),
            });
        }
        self.refs.remove(&format!("refs/heads/{name}"));
        Ok(())
    }

    fn checkout(&mut self, name: &str) -> BackendResult<()> {
        self.record(Op::Checkout(name.to_string()))?;
        let Some(id) = self.refs.get(&format!("refs/heads/{name}")).cloned() else {
            return Err(BackendError::CommandFailed {
                command: format!("git checkout {name}"),
                stderr: format!("error: pathspec '{name}' did not match any branch"),
            });
        };
        self.head = Some(name.to_string());
        self.index = self.tree(&id);
        self.worktree = self.index.clone();
        Ok(())
    }

    fn reset_hard(&mut self, target: &str) -> BackendResult<()> {
        self.record(Op::ResetHard(target.to_string()))?;
        let id = self.require(target)?;
        self.move_current_branch(id.clone())?;
        self.index = self.tree(&id);
        self.worktree = self.index.clone();
        self.rebase_in_progress = false;
        self.unmerged.clear();
        Ok(())
    }

    fn rebase(&mut self, onto: &str) -> BackendResult<()> {
        self.record(Op::Rebase(onto.to_string()))?;
        let onto_id = self.require(onto)?;
        let tip = self.require("HEAD")?;

        let mut new_tip = onto_id.clone();
        for id in self.commits_to_replay(&tip, &onto_id) {
            let Some(commit) = self.commits.get(&id).cloned() else {
                continue;
            };
            let before = commit
                .parent
                .as_ref()
                .map(|p| self.tree(p))
                .unwrap_or_default();
            let current = self.tree(&new_tip);
            match replay(&current, &before, &commit.tree) {
                Ok(tree) if tree == current => {}
                Ok(tree) => {
                    new_tip = self.add_commit(Some(&new_tip), tree, &commit.message);
                }
                Err(paths) => {
                    self.rebase_in_progress = true;
                    self.unmerged.clone_from(&paths);
                    return Err(BackendError::Conflict {
                        onto: onto.to_string(),
                        paths,
                    });
                }
            }
        }

        self.move_current_branch(new_tip.clone())?;
        self.index = self.tree(&new_tip);
        self.worktree = self.index.clone();
        if self.unfinished_next_rebase {
            self.unfinished_next_rebase = false;
            self.rebase_in_progress = true;
        }
        Ok(())
    }

    fn verify_rebase_complete(&mut self, onto: &str) -> BackendResult<()> {
        self.record(Op::VerifyRebase(onto.to_string()))?;
        if self.rebase_in_progress {
            let reason = if self.unmerged.is_empty() {
                "an operation is still in progress".to_string()
            } else {
                format!("unmerged paths: {}", self.unmerged.join(", "))
            };
            return Err(BackendError::IncompleteRebase { reason });
        }
        let base = self.require(onto).map(|id| self.tree(&id))?;
        let markers = added_marker_paths(&base, &self.head_tree());
        if markers.is_empty() {
            Ok(())
        } else {
            Err(BackendError::IncompleteRebase {
                reason: format!("conflict markers added in: {}", markers.join(", ")),
            })
        }
    }

    fn reset_index_to(&mut self, target: &str) -> BackendResult<()> {
        self.record(Op::ResetIndex(target.to_string()))?;
        let id = self.require(target)?;
        self.move_current_branch(id.clone())?;
        self.index = self.tree(&id);
        Ok(())
    }

    fn stage_all(&mut self) -> BackendResult<()> {
        self.record(Op::StageAll)?;
        self.index = self.worktree.clone();
        Ok(())
    }

    fn commit(&mut self, message: &str) -> BackendResult<CommitId> {
        self.record(Op::Commit(message.to_string()))?;
        let parent = self.require("HEAD")?;
        if self.index == self.tree(&parent) {
            return Err(BackendError::NothingToCommit);
        }
        let tree = self.index.clone();
        let id = self.add_commit(Some(&parent), tree, message);
        self.move_current_branch(id.clone())?;
        Ok(id)
    }

    fn is_clean(&mut self) -> BackendResult<bool> {
        self.record(Op::IsClean)?;
        let head = self.head_tree();
        Ok(self.index == head && self.worktree == head)
    }
}
