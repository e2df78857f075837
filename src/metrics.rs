//! Per-user engagement counters, presence tracking and the host alias index.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    #[default]
    Present,
    Away,
}

/// What to do with an `Away` event for a user who is already away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatedAway {
    /// Count the change but keep the first away-start.
    #[default]
    KeepFirst,
    /// Treat the event as a no-op.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UserMetrics {
    pub message_count: u64,
    pub connect_count: u64,
    pub disconnect_count: u64,
    pub away_change_count: u64,
    pub cumulative_away_secs: u64,
    pub presence: PresenceState,
    pub away_started_at: Option<Timestamp>,
    /// Last host the user was seen sending from.
    pub host: Option<String>,
}

impl UserMetrics {
    pub fn is_away(&self) -> bool {
        self.presence == PresenceState::Away
    }

    pub fn away_minutes(&self) -> f64 {
        self.cumulative_away_secs as f64 / 60.0
    }
}

/// Outcome of feeding one presence event through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentAway,
    StillAway,
    Returned { away_secs: u64 },
    Ignored,
}

/// The away/back state machine over a user's metrics record.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceTracker {
    repeated_away: RepeatedAway,
}

impl PresenceTracker {
    pub fn new(repeated_away: RepeatedAway) -> Self {
        Self { repeated_away }
    }

    pub fn on_away(&self, user: &mut UserMetrics, now: Timestamp) -> Transition {
        match user.presence {
            PresenceState::Present => {
                user.presence = PresenceState::Away;
                user.away_started_at = Some(now);
                user.away_change_count += 1;
                Transition::WentAway
            }
            PresenceState::Away => match self.repeated_away {
                RepeatedAway::KeepFirst => {
                    user.away_change_count += 1;
                    Transition::StillAway
                }
                RepeatedAway::Ignore => Transition::Ignored,
            },
        }
    }

    pub fn on_back(&self, user: &mut UserMetrics, now: Timestamp) -> Transition {
        match (user.presence, user.away_started_at) {
            (PresenceState::Away, Some(started)) => {
                let away_secs = now.saturating_sub(started);
                user.cumulative_away_secs = user.cumulative_away_secs.saturating_add(away_secs);
                user.presence = PresenceState::Present;
                user.away_started_at = None;
                Transition::Returned { away_secs }
            }
            (PresenceState::Away, None) => {
                user.presence = PresenceState::Present;
                Transition::Returned { away_secs: 0 }
            }
            (PresenceState::Present, _) => Transition::Ignored,
        }
    }
}

/// Running counters for every nickname seen since startup.
#[derive(Debug, Clone, Default)]
pub struct MetricsStore {
    users: BTreeMap<String, UserMetrics>,
    presence: PresenceTracker,
}

impl MetricsStore {
    pub fn new(repeated_away: RepeatedAway) -> Self {
        Self {
            users: BTreeMap::new(),
            presence: PresenceTracker::new(repeated_away),
        }
    }

    fn user_mut(&mut self, nick: &str) -> &mut UserMetrics {
        self.users.entry(nick.to_string()).or_default()
    }

    pub fn record_message(&mut self, nick: &str, host: &str) {
        let user = self.user_mut(nick);
        user.message_count = user.message_count.saturating_add(1);
        if !host.is_empty() {
            user.host = Some(host.to_string());
        }
    }

    pub fn record_connect(&mut self, nick: &str) {
        let user = self.user_mut(nick);
        user.connect_count = user.connect_count.saturating_add(1);
    }

    pub fn record_disconnect(&mut self, nick: &str) {
        let user = self.user_mut(nick);
        user.disconnect_count = user.disconnect_count.saturating_add(1);
    }

    pub fn record_away(&mut self, nick: &str, now: Timestamp) -> Transition {
        let presence = self.presence;
        presence.on_away(self.user_mut(nick), now)
    }

    pub fn record_back(&mut self, nick: &str, now: Timestamp) -> Transition {
        let presence = self.presence;
        presence.on_back(self.user_mut(nick), now)
    }

    pub fn get(&self, nick: &str) -> Option<&UserMetrics> {
        self.users.get(nick)
    }

    pub fn nicks(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn total_messages(&self) -> u64 {
        self.users.values().map(|user| user.message_count).sum()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_messages: self.total_messages(),
            users: self.users.clone(),
        }
    }
}

/// Immutable copy of every user's counters at one point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub total_messages: u64,
    pub users: BTreeMap<String, UserMetrics>,
}

/// Host to the set of nicknames ever observed on it. Entries are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AliasIndex {
    hosts: BTreeMap<String, BTreeSet<String>>,
}

impl AliasIndex {
    /// Returns true when the pair was new.
    pub fn record(&mut self, host: &str, nick: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        self.hosts
            .entry(host.to_string())
            .or_default()
            .insert(nick.to_string())
    }

    pub fn aliases(&self, host: &str) -> Vec<&str> {
        self.hosts
            .get(host)
            .map(|nicks| nicks.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn hosts_for<'a>(&'a self, nick: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.hosts
            .iter()
            .filter(move |(_, nicks)| nicks.contains(nick))
            .map(|(host, _)| host.as_str())
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_are_created_lazily_by_any_event() {
        let mut store = MetricsStore::default();
        store.record_disconnect("erin");
        store.record_back("frank", 10);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("erin").unwrap().disconnect_count, 1);
        assert_eq!(store.get("frank").unwrap().presence, PresenceState::Present);
    }

    #[test]
    fn message_updates_count_and_host() {
        let mut store = MetricsStore::default();
        store.record_message("alice", "a.example");
        store.record_message("alice", "b.example");
        store.record_connect("alice");
        let alice = store.get("alice").unwrap();
        assert_eq!(alice.message_count, 2);
        assert_eq!(alice.connect_count, 1);
        assert_eq!(alice.host.as_deref(), Some("b.example"));
        assert_eq!(store.total_messages(), 2);
    }

    #[test]
    fn away_then_back_accumulates_duration() {
        let mut store = MetricsStore::default();
        assert_eq!(store.record_away("bob", 0), Transition::WentAway);
        assert!(store.get("bob").unwrap().is_away());
        assert_eq!(
            store.record_back("bob", 120),
            Transition::Returned { away_secs: 120 }
        );
        let bob = store.get("bob").unwrap();
        assert_eq!(bob.cumulative_away_secs, 120);
        assert_eq!(bob.presence, PresenceState::Present);
        assert_eq!(bob.away_started_at, None);
        assert_eq!(bob.away_change_count, 1);
    }

    #[test]
    fn stray_back_is_ignored() {
        let mut store = MetricsStore::default();
        assert_eq!(store.record_back("bob", 50), Transition::Ignored);
        assert_eq!(store.get("bob").unwrap().cumulative_away_secs, 0);
    }

    #[test]
    fn repeated_away_keeps_first_start_by_default() {
        let mut store = MetricsStore::default();
        store.record_away("bob", 10);
        assert_eq!(store.record_away("bob", 40), Transition::StillAway);
        store.record_back("bob", 100);
        let bob = store.get("bob").unwrap();
        assert_eq!(bob.away_change_count, 2);
        assert_eq!(bob.cumulative_away_secs, 90);
    }

    #[test]
    fn repeated_away_can_be_ignored() {
        let mut store = MetricsStore::new(RepeatedAway::Ignore);
        store.record_away("bob", 10);
        assert_eq!(store.record_away("bob", 40), Transition::Ignored);
        store.record_back("bob", 100);
        let bob = store.get("bob").unwrap();
        assert_eq!(bob.away_change_count, 1);
        assert_eq!(bob.cumulative_away_secs, 90);
    }

    #[test]
    fn back_before_away_start_adds_nothing() {
        let mut store = MetricsStore::default();
        store.record_away("bob", 100);
        assert_eq!(
            store.record_back("bob", 90),
            Transition::Returned { away_secs: 0 }
        );
        assert_eq!(store.get("bob").unwrap().cumulative_away_secs, 0);
    }

    #[test]
    fn snapshot_is_detached_from_the_store() {
        let mut store = MetricsStore::default();
        store.record_message("alice", "h");
        let snapshot = store.snapshot();
        store.record_message("alice", "h");
        assert_eq!(snapshot.total_messages, 1);
        assert_eq!(snapshot.users["alice"].message_count, 1);
    }

    #[test]
    fn alias_index_groups_nicks_by_host() {
        let mut index = AliasIndex::default();
        assert!(index.record("10.0.0.1", "alice"));
        assert!(index.record("10.0.0.1", "alice_"));
        assert!(!index.record("10.0.0.1", "alice"));
        assert!(index.record("10.0.0.2", "alice"));
        assert!(!index.record("", "ghost"));
        assert_eq!(index.aliases("10.0.0.1"), vec!["alice", "alice_"]);
        assert_eq!(
            index.hosts_for("alice").collect::<Vec<_>>(),
            vec!["10.0.0.1", "10.0.0.2"]
        );
        assert!(index.aliases("unknown").is_empty());
        assert_eq!(index.host_count(), 2);
    }
}
