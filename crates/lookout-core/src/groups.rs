//! Desired group sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The set of groups whose registries should be discovered.
///
/// `All` accepts a registry regardless of membership. `Only` with an empty
/// set accepts nothing: discovery is effectively paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredGroups {
    All,
    Only(BTreeSet<String>),
}

impl DesiredGroups {
    pub fn only<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DesiredGroups::Only(groups.into_iter().map(Into::into).collect())
    }

    pub fn none() -> Self {
        DesiredGroups::Only(BTreeSet::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, DesiredGroups::All)
    }

    /// Does a registry with these member groups belong in the discovered set?
    pub fn overlaps(&self, member_groups: &[String]) -> bool {
        match self {
            DesiredGroups::All => true,
            DesiredGroups::Only(wanted) => member_groups.iter().any(|g| wanted.contains(g)),
        }
    }

    /// Group list to put in a multicast request. Empty means "any group".
    ///
    /// Returns `None` when there is nothing to ask for.
    pub fn request_groups(&self) -> Option<Vec<String>> {
        match self {
            DesiredGroups::All => Some(Vec::new()),
            DesiredGroups::Only(set) if set.is_empty() => None,
            DesiredGroups::Only(set) => Some(set.iter().cloned().collect()),
        }
    }

    /// The explicit group names, or `None` for `All`.
    pub fn names(&self) -> Option<Vec<String>> {
        match self {
            DesiredGroups::All => None,
            DesiredGroups::Only(set) => Some(set.iter().cloned().collect()),
        }
    }
}

/// Order-insensitive comparison of two member-group lists.
pub fn same_groups(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}
