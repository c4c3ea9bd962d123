//! Configuration management for branch-composer

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::changeset::ChangeSetRef;
use crate::compose::{DEFAULT_MESSAGE_TEMPLATE, DEFAULT_WORKING_BRANCH, Plan, UpstreamRef};
use crate::git::Identity;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Branch rebuilt on every run
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Scratch branch used while integrating one change-set
    #[serde(default = "default_working_branch")]
    pub working_branch: String,

    /// Remote holding the upstream branch and the pull request heads
    #[serde(default = "default_upstream_remote")]
    pub upstream_remote: String,

    /// Upstream branch the base is reset to
    #[serde(default = "default_upstream_branch")]
    pub upstream_branch: String,

    /// Change-sets to apply, in order
    #[serde(default)]
    pub changesets: Vec<ChangeSetRef>,

    /// Commit message for each squashed change-set; `{id}` is replaced
    #[serde(default = "default_message_template")]
    pub message_template: String,

    /// Program line used to run git (e.g. "git -c rerere.enabled=true")
    #[serde(default = "default_git_program")]
    pub git_program: String,

    /// Identity for the commits created by a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,

    /// Refuse rebases that add conflict markers to a file
    #[serde(default = "default_check_conflict_markers")]
    pub check_conflict_markers: bool,
}

fn default_base_branch() -> String {
    "batteries".to_string()
}

fn default_working_branch() -> String {
    DEFAULT_WORKING_BRANCH.to_string()
}

fn default_upstream_remote() -> String {
    "upstream".to_string()
}

fn default_upstream_branch() -> String {
    "master".to_string()
}

fn default_message_template() -> String {
    DEFAULT_MESSAGE_TEMPLATE.to_string()
}

fn default_git_program() -> String {
    "git".to_string()
}

const fn default_check_conflict_markers() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            working_branch: default_working_branch(),
            upstream_remote: default_upstream_remote(),
            upstream_branch: default_upstream_branch(),
            changesets: Vec::new(),
            message_template: default_message_template(),
            git_program: default_git_program(),
            identity: None,
            check_conflict_markers: default_check_conflict_markers(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if reading or parsing the config file fails
    pub fn load() -> Result<Self> {
        Self::load_or_default(&Self::default_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Save configuration to a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be created or the file cannot be written
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn default_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Upstream ref named by this configuration
    #[must_use]
    pub fn upstream(&self) -> UpstreamRef {
        UpstreamRef::new(&self.upstream_remote, &self.upstream_branch)
    }

    /// Build a run plan from this configuration
    ///
    /// The plan fetches and checks the working tree; callers flip those
    /// switches from command line flags.
    #[must_use]
    pub fn plan(&self) -> Plan {
        let mut plan = Plan::new(&self.base_branch, self.upstream(), self.changesets.clone());
        plan.working_branch.clone_from(&self.working_branch);
        plan.message_template.clone_from(&self.message_template);
        plan
    }
}
