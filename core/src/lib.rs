/// RinkLink - social graph and messaging core
///
/// Friend-request state machine, direct-message conversations, unread
/// counts and the client-side polling reconciliation that keeps them fresh,
/// all written against an abstract record store.

pub mod error;
pub mod config;
pub mod types;
pub mod store;
pub mod friendship;
pub mod conversation;
pub mod unread;
pub mod sync;

pub use error::{RinkError, Result};
pub use config::Config;
pub use conversation::ConversationStore;
pub use friendship::FriendshipGraph;
pub use store::{MemoryStore, RecordStore, SledStore};
pub use sync::{Subscription, SyncConfig, SyncEvent, SyncScheduler, Topic};
pub use types::{
    ConversationSummary, EdgeStatus, FriendEdge, Identity, Message, PairKey, Player,
    RelationshipStatus, Session, Transition,
};
pub use unread::UnreadAggregator;
