/// Process-local record store
/// Conditional writes are checked under the write lock
use super::RecordStore;
use crate::error::Result;
use crate::types::{FriendEdge, Identity, Message, PairKey, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    players: HashMap<Identity, Player>,
    edges: HashMap<PairKey, FriendEdge>,
    messages: BTreeMap<u64, Message>,
    next_id: u64,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a player record
    pub async fn upsert_player(&self, player: Player) {
        let mut tables = self.tables.write().await;
        tables.players.insert(player.id.clone(), player);
    }

    /// Remove a player record (edges and messages are left dangling)
    pub async fn remove_player(&self, id: &Identity) -> bool {
        let mut tables = self.tables.write().await;
        tables.players.remove(id).is_some()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn player(&self, id: &Identity) -> Result<Option<Player>> {
        let tables = self.tables.read().await;
        Ok(tables.players.get(id).cloned())
    }

    async fn edge_for_pair(&self, pair: &PairKey) -> Result<Option<FriendEdge>> {
        let tables = self.tables.read().await;
        Ok(tables.edges.get(pair).cloned())
    }

    async fn edges_touching(&self, id: &Identity) -> Result<Vec<FriendEdge>> {
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .iter()
            .filter(|(pair, _)| pair.contains(id))
            .map(|(_, edge)| edge.clone())
            .collect())
    }

    async fn next_edge_id(&self) -> Result<u64> {
        let mut tables = self.tables.write().await;
        Ok(tables.allocate_id())
    }

    async fn insert_edge_if_absent(&self, edge: &FriendEdge) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let pair = edge.pair();
        if tables.edges.get(&pair).is_some_and(|e| e.is_live()) {
            return Ok(false);
        }
        tables.edges.insert(pair, edge.clone());
        Ok(true)
    }

    async fn replace_edge(&self, expected: &FriendEdge, new: &FriendEdge) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.edges.get_mut(&expected.pair()) {
            Some(current) if current == expected => {
                *current = new.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_edge(&self, expected: &FriendEdge) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let pair = expected.pair();
        if tables.edges.get(&pair) != Some(expected) {
            return Ok(false);
        }
        tables.edges.remove(&pair);
        Ok(true)
    }

    async fn insert_message(
        &self,
        sender: &Identity,
        receiver: &Identity,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Message> {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        let msg = Message {
            id,
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            text: text.to_string(),
            timestamp,
            read: false,
        };
        tables.messages.insert(id, msg.clone());
        Ok(msg)
    }

    async fn messages_for_pair(&self, pair: &PairKey) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .filter(|m| &m.pair() == pair)
            .cloned()
            .collect())
    }

    async fn messages_touching(&self, id: &Identity) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .filter(|m| m.partner_of(id).is_some())
            .cloned()
            .collect())
    }

    async fn mark_read(&self, receiver: &Identity, sender: &Identity) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for msg in tables.messages.values_mut() {
            if !msg.read && &msg.receiver_id == receiver && &msg.sender_id == sender {
                msg.read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EdgeStatus;

    #[tokio::test]
    async fn test_rejected_edge_can_be_replaced() {
        let store = MemoryStore::new();
        let rejected = FriendEdge {
            id: 1,
            from_id: Identity::from("a"),
            to_id: Identity::from("b"),
            status: EdgeStatus::Rejected,
            created_at: Utc::now(),
        };
        assert!(store.insert_edge_if_absent(&rejected).await.unwrap());

        let fresh = FriendEdge { id: 2, status: EdgeStatus::Pending, ..rejected.clone() };
        assert!(store.insert_edge_if_absent(&fresh).await.unwrap());
        assert!(!store.insert_edge_if_absent(&rejected).await.unwrap());

        let stored = store.edge_for_pair(&fresh.pair()).await.unwrap().unwrap();
        assert_eq!(stored.id, 2);
    }

    #[tokio::test]
    async fn test_message_ids_increase() {
        let store = MemoryStore::new();
        let a = Identity::from("a");
        let b = Identity::from("b");
        let first = store.insert_message(&a, &b, "1", Utc::now()).await.unwrap();
        let second = store.insert_message(&b, &a, "2", Utc::now()).await.unwrap();
        assert!(second.id > first.id);
    }
}
