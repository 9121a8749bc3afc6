/// Poll topics, snapshots and the deltas between them
use crate::types::{FriendEdge, Identity, Message, Player, Session};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// What a subscription keeps fresh
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Player record (current-user identity refresh)
    Profile(Identity),
    /// Open chat screen
    Conversation { viewer: Identity, partner: Identity },
    /// Unread badge
    Unread(Identity),
    /// Incoming friend requests
    FriendRequests(Identity),
    /// Friend list
    Friends(Identity),
}

impl Session {
    pub fn profile_topic(&self) -> Topic {
        Topic::Profile(self.user.clone())
    }

    pub fn conversation_topic(&self, partner: &Identity) -> Topic {
        Topic::Conversation {
            viewer: self.user.clone(),
            partner: partner.clone(),
        }
    }

    pub fn unread_topic(&self) -> Topic {
        Topic::Unread(self.user.clone())
    }

    pub fn requests_topic(&self) -> Topic {
        Topic::FriendRequests(self.user.clone())
    }

    pub fn friends_topic(&self) -> Topic {
        Topic::Friends(self.user.clone())
    }
}

/// Last fetched state of a topic
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Profile(Option<Player>),
    Conversation(Vec<Message>),
    Unread {
        total: usize,
        by_partner: BTreeMap<Identity, usize>,
    },
    FriendRequests(Vec<FriendEdge>),
    Friends(Vec<Identity>),
}

/// What a tick surfaced to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// First successful fetch for this topic
    Initial(Snapshot),
    /// Refresh happened, nothing changed
    Unchanged,
    NewMessages(Vec<Message>),
    /// Ids of messages whose read flag flipped since the last tick
    MessagesRead(Vec<u64>),
    UnreadChanged {
        previous: usize,
        current: usize,
        by_partner: BTreeMap<Identity, usize>,
    },
    NewFriendRequests(Vec<FriendEdge>),
    /// Requests that disappeared (accepted, declined or cancelled)
    RequestsResolved(Vec<FriendEdge>),
    FriendsChanged {
        added: Vec<Identity>,
        removed: Vec<Identity>,
    },
    ProfileChanged(Option<Player>),
    /// Fetches kept failing for longer than the staleness threshold;
    /// subscribers are looking at the last good snapshot
    Degraded { stale_for: Duration, error: String },
    /// A fetch succeeded again after `Degraded`
    Recovered,
}

/// Changes from `previous` to `current`; `[Unchanged]` when there are none
pub fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    match (previous, current) {
        (Snapshot::Conversation(old), Snapshot::Conversation(new)) => {
            let seen: BTreeSet<u64> = old.iter().map(|m| m.id).collect();
            let unread_before: BTreeSet<u64> =
                old.iter().filter(|m| !m.read).map(|m| m.id).collect();

            let added: Vec<Message> = new
                .iter()
                .filter(|m| !seen.contains(&m.id))
                .cloned()
                .collect();
            let read: Vec<u64> = new
                .iter()
                .filter(|m| m.read && unread_before.contains(&m.id))
                .map(|m| m.id)
                .collect();

            if !added.is_empty() {
                events.push(SyncEvent::NewMessages(added));
            }
            if !read.is_empty() {
                events.push(SyncEvent::MessagesRead(read));
            }
        }
        (
            Snapshot::Unread { total: before, by_partner: old },
            Snapshot::Unread { total: after, by_partner: new },
        ) => {
            if before != after || old != new {
                events.push(SyncEvent::UnreadChanged {
                    previous: *before,
                    current: *after,
                    by_partner: new.clone(),
                });
            }
        }
        (Snapshot::FriendRequests(old), Snapshot::FriendRequests(new)) => {
            let old_ids: BTreeSet<u64> = old.iter().map(|e| e.id).collect();
            let new_ids: BTreeSet<u64> = new.iter().map(|e| e.id).collect();

            let arrived: Vec<FriendEdge> =
                new.iter().filter(|e| !old_ids.contains(&e.id)).cloned().collect();
            let resolved: Vec<FriendEdge> =
                old.iter().filter(|e| !new_ids.contains(&e.id)).cloned().collect();

            if !arrived.is_empty() {
                events.push(SyncEvent::NewFriendRequests(arrived));
            }
            if !resolved.is_empty() {
                events.push(SyncEvent::RequestsResolved(resolved));
            }
        }
        (Snapshot::Friends(old), Snapshot::Friends(new)) => {
            let old_set: BTreeSet<&Identity> = old.iter().collect();
            let new_set: BTreeSet<&Identity> = new.iter().collect();
            let added: Vec<Identity> = new_set.difference(&old_set).map(|&i| i.clone()).collect();
            let removed: Vec<Identity> =
                old_set.difference(&new_set).map(|&i| i.clone()).collect();
            if !added.is_empty() || !removed.is_empty() {
                events.push(SyncEvent::FriendsChanged { added, removed });
            }
        }
        (Snapshot::Profile(old), Snapshot::Profile(new)) => {
            if old != new {
                events.push(SyncEvent::ProfileChanged(new.clone()));
            }
        }
        // Topic kind changed under us: start over
        (_, current) => events.push(SyncEvent::Initial(current.clone())),
    }

    if events.is_empty() {
        events.push(SyncEvent::Unchanged);
    }
    events
}
