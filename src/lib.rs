//! Branch Composer - rebuild a branch as upstream plus squashed pull requests
//!
//! Each run resets a local base branch to a fresh upstream snapshot, then
//! applies an ordered list of change-sets on top of it, squashing every
//! change-set into exactly one commit. Conflicts stop the run at the
//! failing change-set with the repository left as-is for inspection.

pub mod backend;
pub mod changeset;
pub mod compose;
pub mod config;
pub mod git;
pub mod paths;

pub use backend::{Backend, BackendError, GitBackend, MemoryBackend};
pub use changeset::ChangeSetRef;
pub use compose::{ComposeError, Composer, Phase, Plan, Summary, UpstreamRef};
pub use config::Config;
