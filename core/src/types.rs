/// Shared types for the social graph and messaging layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identity of a player (usually a UUID string)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh v4 UUID identity
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unordered pair of identities.
///
/// `PairKey::new(a, b) == PairKey::new(b, a)`. Every lookup that treats
/// `(a, b)` and `(b, a)` as the same relationship or conversation goes
/// through this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    low: Identity,
    high: Identity,
}

impl PairKey {
    pub fn new(a: &Identity, b: &Identity) -> Self {
        if a <= b {
            Self { low: a.clone(), high: b.clone() }
        } else {
            Self { low: b.clone(), high: a.clone() }
        }
    }

    pub fn contains(&self, id: &Identity) -> bool {
        &self.low == id || &self.high == id
    }

    /// The endpoint that is not `id` (None if `id` is not in the pair)
    pub fn other(&self, id: &Identity) -> Option<&Identity> {
        if &self.low == id {
            Some(&self.high)
        } else if &self.high == id {
            Some(&self.low)
        } else {
            None
        }
    }

    /// Storage key: length-prefixed so that no two pairs share a key
    pub fn storage_key(&self) -> String {
        format!("{}:{}{}", self.low.as_str().len(), self.low, self.high)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dm:{}:{}", self.low, self.high)
    }
}

/// Stored status of a friend edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Relationship of `a` towards `b`, as seen from `a`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    None,
    SentRequest,
    ReceivedRequest,
    Friends,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::None => "none",
            RelationshipStatus::SentRequest => "sent_request",
            RelationshipStatus::ReceivedRequest => "received_request",
            RelationshipStatus::Friends => "friends",
        }
    }

    /// The same relationship seen from the other endpoint
    pub fn mirrored(&self) -> Self {
        match self {
            RelationshipStatus::SentRequest => RelationshipStatus::ReceivedRequest,
            RelationshipStatus::ReceivedRequest => RelationshipStatus::SentRequest,
            other => *other,
        }
    }
}

impl fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipStatus {
    type Err = String;

    // Older clients cached "sent"/"received"; accept them, never emit them
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RelationshipStatus::None),
            "sent_request" | "sent" => Ok(RelationshipStatus::SentRequest),
            "received_request" | "received" => Ok(RelationshipStatus::ReceivedRequest),
            "friends" => Ok(RelationshipStatus::Friends),
            other => Err(format!("unknown relationship status: {}", other)),
        }
    }
}

/// One friend-request / friendship record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendEdge {
    pub id: u64,
    pub from_id: Identity,
    pub to_id: Identity,
    pub status: EdgeStatus,
    pub created_at: DateTime<Utc>,
}

impl FriendEdge {
    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.from_id, &self.to_id)
    }

    /// Rejected edges carry no relationship
    pub fn is_live(&self) -> bool {
        self.status != EdgeStatus::Rejected
    }

    /// Relationship status from `viewer`'s side of this edge
    pub fn status_for(&self, viewer: &Identity) -> RelationshipStatus {
        match self.status {
            EdgeStatus::Rejected => RelationshipStatus::None,
            EdgeStatus::Accepted => RelationshipStatus::Friends,
            EdgeStatus::Pending if &self.from_id == viewer => RelationshipStatus::SentRequest,
            EdgeStatus::Pending if &self.to_id == viewer => RelationshipStatus::ReceivedRequest,
            EdgeStatus::Pending => RelationshipStatus::None,
        }
    }
}

/// One direct message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub sender_id: Identity,
    pub receiver_id: Identity,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.sender_id, &self.receiver_id)
    }

    /// The other endpoint from `viewer`'s perspective
    pub fn partner_of(&self, viewer: &Identity) -> Option<&Identity> {
        if &self.sender_id == viewer {
            Some(&self.receiver_id)
        } else if &self.receiver_id == viewer {
            Some(&self.sender_id)
        } else {
            None
        }
    }

    pub fn is_unread_for(&self, viewer: &Identity) -> bool {
        !self.read && &self.receiver_id == viewer
    }
}

/// Player record (read-only from this crate's perspective)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: Identity,
    pub display_name: String,
    pub position: Option<String>,
    pub team: Option<String>,
}

/// Result of a conditional state-machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// This call performed the transition
    Applied,
    /// The other party (or an earlier call) already resolved the edge
    AlreadyResolved,
}

/// Summary of one conversation thread (for the inbox list)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The other party
    pub partner_id: Identity,
    /// Preview text of the last message
    pub last_preview: String,
    /// Timestamp of the last message
    pub last_timestamp: DateTime<Utc>,
    /// Id of the last message
    pub last_id: u64,
    /// Messages from the partner not yet read by the viewer
    pub unread: usize,
}

/// Explicit "current user" handed to client-side components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: Identity,
}

impl Session {
    pub fn new(user: Identity) -> Self {
        Self { user }
    }
}
