//! Group registry.
//!
//! Tracks which users joined which group on this instance. Members on other
//! instances are tracked by those instances; the broker bridges them.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Groups a departing user was removed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveSummary {
    /// Every group the user was removed from.
    pub left: Vec<String>,
    /// The subset of `left` that has no members anymore.
    pub emptied: Vec<String>,
}

/// The effect of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The user was not a member before.
    pub added: bool,
    /// The user is the group's first member.
    pub first: bool,
}

/// The registry of group memberships known to this instance.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: DashMap<String, HashSet<String>>,
}

impl GroupRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a group, creating the group on first join.
    ///
    /// Joining twice is a no-op reporting neither `added` nor `first`.
    pub fn join(&self, group_id: &str, user_id: &str) -> JoinOutcome {
        let mut members = self.groups.entry(group_id.to_string()).or_default();
        let added = members.insert(user_id.to_string());
        let first = added && members.len() == 1;

        debug!(
            group = %group_id,
            user = %user_id,
            added,
            first,
            members = members.len(),
            "Group join"
        );
        JoinOutcome { added, first }
    }

    /// Remove a user from a group.
    ///
    /// A group left without members is removed. Returns `true` if the user
    /// was a member.
    pub fn leave(&self, group_id: &str, user_id: &str) -> bool {
        let removed = self
            .groups
            .get_mut(group_id)
            .map(|mut members| members.remove(user_id))
            .unwrap_or(false);

        if removed {
            self.groups.remove_if(group_id, |_, members| members.is_empty());
            debug!(group = %group_id, user = %user_id, "Group leave");
        }
        removed
    }

    /// Remove a user from every group it joined.
    pub fn leave_all(&self, user_id: &str) -> LeaveSummary {
        let mut summary = LeaveSummary::default();

        for mut entry in self.groups.iter_mut() {
            if entry.value_mut().remove(user_id) {
                summary.left.push(entry.key().clone());
            }
        }

        for group_id in &summary.left {
            if self
                .groups
                .remove_if(group_id, |_, members| members.is_empty())
                .is_some()
            {
                summary.emptied.push(group_id.clone());
            }
        }

        debug!(user = %user_id, left = summary.left.len(), emptied = summary.emptied.len(), "Left all groups");
        summary
    }

    /// Check whether a user is a member of a group.
    #[must_use]
    pub fn is_member(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .get(group_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }

    /// A snapshot of a group's members, `None` if the group does not exist.
    #[must_use]
    pub fn members(&self, group_id: &str) -> Option<HashSet<String>> {
        self.groups.get(group_id).map(|members| members.clone())
    }

    /// Check whether a group exists.
    #[must_use]
    pub fn exists(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Number of groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
