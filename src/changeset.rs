//! Change-set identifiers and ordered change-set lists

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters git refuses inside a ref name component
const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// Reasons a change-set identifier or list is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeSetError {
    /// The identifier is empty (or only whitespace)
    #[error("change-set identifier is empty")]
    Empty,

    /// The identifier cannot be used inside a git ref name
    #[error("change-set identifier '{id}' is not a valid ref component: {reason}")]
    InvalidRef {
        /// The rejected identifier
        id: String,
        /// Why git would reject it
        reason: &'static str,
    },

    /// The same identifier appears more than once in a list
    #[error("change-set '{0}' is listed more than once")]
    Duplicate(String),
}

/// Opaque identifier naming a remote change-set, e.g. a pull-request number
///
/// The remote head of change-set `id` is fetched from `refs/pull/<id>/head`
/// into `refs/remotes/<remote>/pull/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawChangeSet", into = "String")]
pub struct ChangeSetRef(String);

impl ChangeSetRef {
    /// Validate and wrap an identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty or could not form part of
    /// a git ref name
    pub fn new(id: impl Into<String>) -> Result<Self, ChangeSetError> {
        let id = id.into();
        let id = id.trim().to_string();
        validate(&id)?;
        Ok(Self(id))
    }

    /// The identifier as written by the operator
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Remote-tracking ref holding this change-set's head after a fetch
    #[must_use]
    pub fn tracking_ref(&self, remote: &str) -> String {
        format!("refs/remotes/{remote}/pull/{}", self.0)
    }

    /// Commit message for the squashed commit
    ///
    /// Every `{id}` in the template is replaced by the identifier. The default
    /// template is the bare identifier, with no `#` cross-reference.
    #[must_use]
    pub fn commit_message(&self, template: &str) -> String {
        template.replace("{id}", &self.0)
    }
}

fn validate(id: &str) -> Result<(), ChangeSetError> {
    let invalid = |reason| {
        Err(ChangeSetError::InvalidRef {
            id: id.to_string(),
            reason,
        })
    };

    if id.is_empty() {
        return Err(ChangeSetError::Empty);
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("contains whitespace or control characters");
    }
    if id.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return invalid("contains one of ~ ^ : ? * [ \\");
    }
    if id.contains("..") || id.contains("@{") || id.contains("//") {
        return invalid("contains '..', '@{' or '//'");
    }
    if id.starts_with('-') || id.starts_with('.') || id.starts_with('/') {
        return invalid("starts with '-', '.' or '/'");
    }
    if id.ends_with('/') || id.ends_with('.') || id.ends_with(".lock") {
        return invalid("ends with '/', '.' or '.lock'");
    }
    Ok(())
}

impl fmt::Display for ChangeSetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChangeSetRef {
    type Err = ChangeSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<ChangeSetRef> for String {
    fn from(value: ChangeSetRef) -> Self {
        value.0
    }
}

/// Config files may list pull requests as plain numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum RawChangeSet {
    Number(u64),
    Text(String),
}

impl TryFrom<RawChangeSet> for ChangeSetRef {
    type Error = ChangeSetError;

    fn try_from(raw: RawChangeSet) -> Result<Self, Self::Error> {
        match raw {
            RawChangeSet::Number(n) => Self::new(n.to_string()),
            RawChangeSet::Text(s) => Self::new(s),
        }
    }
}

/// Parse a comma-separated list such as `"5432, 5501,5610"`
///
/// Empty entries (e.g. from a trailing comma) are skipped, so an empty string
/// yields an empty list.
///
/// # Errors
///
/// Returns an error if any entry is invalid or an identifier repeats
pub fn parse_list(input: &str) -> Result<Vec<ChangeSetRef>, ChangeSetError> {
    let list = input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ChangeSetRef::new)
        .collect::<Result<Vec<_>, _>>()?;
    ensure_unique(&list)?;
    Ok(list)
}

/// Reject lists that name the same change-set twice
///
/// # Errors
///
/// Returns the first repeated identifier
pub fn ensure_unique(list: &[ChangeSetRef]) -> Result<(), ChangeSetError> {
    let mut seen = HashSet::new();
    for changeset in list {
        if !seen.insert(changeset.as_str()) {
            return Err(ChangeSetError::Duplicate(changeset.to_string()));
        }
    }
    Ok(())
}
