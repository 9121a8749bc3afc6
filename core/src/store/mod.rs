/// Record store contract and implementations
///
/// The core is written against [`RecordStore`]: three tables (players,
/// friend edges, messages) with filtered reads and conditional writes.
/// Any backend offering the same semantics can stand in for the hosted
/// store.
mod memory;
mod rows;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::error::Result;
use crate::types::{FriendEdge, Identity, Message, PairKey, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Player record, if one exists
    async fn player(&self, id: &Identity) -> Result<Option<Player>>;

    /// The edge stored for an unordered pair (live or rejected)
    async fn edge_for_pair(&self, pair: &PairKey) -> Result<Option<FriendEdge>>;

    /// Every edge with `id` as either endpoint
    async fn edges_touching(&self, id: &Identity) -> Result<Vec<FriendEdge>>;

    /// Allocate a fresh edge id
    async fn next_edge_id(&self) -> Result<u64>;

    /// Store `edge` unless a live edge already holds its pair.
    /// A rejected edge in the slot is overwritten. Returns false if a live
    /// edge was found.
    async fn insert_edge_if_absent(&self, edge: &FriendEdge) -> Result<bool>;

    /// Replace `expected` with `new` only if the stored edge still equals
    /// `expected`. Returns false when nothing was changed.
    async fn replace_edge(&self, expected: &FriendEdge, new: &FriendEdge) -> Result<bool>;

    /// Delete the edge only if it still equals `expected`.
    async fn delete_edge(&self, expected: &FriendEdge) -> Result<bool>;

    /// Append a message; the store allocates a monotonically increasing id
    async fn insert_message(
        &self,
        sender: &Identity,
        receiver: &Identity,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Message>;

    /// All messages exchanged within `pair`, in no particular order
    async fn messages_for_pair(&self, pair: &PairKey) -> Result<Vec<Message>>;

    /// All messages with `id` as sender or receiver, in no particular order
    async fn messages_touching(&self, id: &Identity) -> Result<Vec<Message>>;

    /// Set `read = true` on unread messages from `sender` to `receiver`.
    /// Returns the number of rows changed by this call.
    async fn mark_read(&self, receiver: &Identity, sender: &Identity) -> Result<usize>;
}
