//! Per-connection subscription manager.
//!
//! Tracks which members a WebSocket client follows and filters
//! coordinator events server-side.

use std::collections::HashSet;

/// Wildcard accepted in subscribe requests.
pub const WILDCARD: &str = "*";

/// Member subscriptions for a single WebSocket connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Subscribed member names. Ignored while `subscribe_all` is set.
    members: HashSet<String>,
    /// Whether the client follows every member.
    subscribe_all: bool,
}

impl SubscriptionManager {
    /// Creates a new empty subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds members to the subscription set; [`WILDCARD`] enables all.
    ///
    /// Returns the explicit names that were added.
    pub fn subscribe(&mut self, names: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for name in names {
            if name == WILDCARD {
                self.subscribe_all = true;
            } else if self.members.insert(name.clone()) {
                added.push(name.clone());
            }
        }
        added
    }

    /// Removes members; [`WILDCARD`] clears the wildcard.
    pub fn unsubscribe(&mut self, names: &[String]) {
        for name in names {
            if name == WILDCARD {
                self.subscribe_all = false;
            } else {
                self.members.remove(name);
            }
        }
    }

    /// Returns `true` if events for `member` should be forwarded.
    #[must_use]
    pub fn matches(&self, member: &str) -> bool {
        self.subscribe_all || self.members.contains(member)
    }

    /// Number of explicitly subscribed members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the wildcard subscription is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_matches_nothing() {
        let mgr = SubscriptionManager::new();
        assert!(!mgr.matches("m1"));
    }

    #[test]
    fn subscribe_specific_member() {
        let mut mgr = SubscriptionManager::new();
        let added = mgr.subscribe(&names(&["m1"]));
        assert_eq!(added, names(&["m1"]));
        assert!(mgr.matches("m1"));
        assert!(!mgr.matches("m2"));
    }

    #[test]
    fn wildcard_matches_everything() {
        let mut mgr = SubscriptionManager::new();
        let added = mgr.subscribe(&names(&["*"]));
        assert!(added.is_empty());
        assert!(mgr.is_subscribed_all());
        assert!(mgr.matches("m1"));
        assert!(mgr.matches("m9"));
    }

    #[test]
    fn unsubscribe_removes_member_and_wildcard() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe(&names(&["m1", "*"]));
        mgr.unsubscribe(&names(&["*"]));
        assert!(mgr.matches("m1"));
        assert!(!mgr.matches("m2"));
        mgr.unsubscribe(&names(&["m1"]));
        assert!(!mgr.matches("m1"));
    }

    #[test]
    fn duplicate_subscribe_counts_once() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe(&names(&["m1", "m2"]));
        let added = mgr.subscribe(&names(&["m2"]));
        assert!(added.is_empty());
        assert_eq!(mgr.count(), 2);
    }
}
