/// Durable record store backed by sled
/// One tree per table; edges keyed by unordered pair, messages by pair + id
use super::rows::{decode_edge, decode_message, decode_player, encode_edge, encode_message};
use super::RecordStore;
use crate::error::{RinkError, Result};
use crate::types::{FriendEdge, Identity, Message, PairKey, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    players: sled::Tree,
    edges: sled::Tree,
    messages: sled::Tree,
}

fn message_key(pair: &PairKey, id: u64) -> String {
    format!("{}/{:020}", pair.storage_key(), id)
}

impl SledStore {
    /// Open (or create) the store in `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("rinklink.db");
        debug!("Opening record store at {:?}", db_path);

        let db = sled::open(&db_path)
            .map_err(|e| RinkError::Storage(format!("Failed to open record store: {}", e)))?;
        let store = Self::from_db(db)?;

        info!("Record store initialized at {:?}", db_path);
        Ok(store)
    }

    /// In-memory sled instance, removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| RinkError::Storage(format!("Failed to open temporary store: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| RinkError::Storage(format!("Failed to open {} table: {}", name, e)))
        };
        Ok(Self {
            players: open("players")?,
            edges: open("friend_requests")?,
            messages: open("messages")?,
            db,
        })
    }

    /// Insert or replace a player record (profile CRUD lives elsewhere)
    pub fn upsert_player(&self, player: &Player) -> Result<()> {
        let val = serde_json::to_vec(player).map_err(RinkError::Serialization)?;
        self.players
            .insert(player.id.as_str().as_bytes(), val)
            .map_err(|e| RinkError::Storage(format!("upsert_player: {}", e)))?;
        Ok(())
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| RinkError::Storage(format!("Failed to flush record store: {}", e)))?;
        Ok(())
    }

    /// Raw bytes and decoded edge for a pair slot
    fn edge_slot(&self, pair: &PairKey) -> Result<Option<(sled::IVec, Option<FriendEdge>)>> {
        let raw = self
            .edges
            .get(pair.storage_key().as_bytes())
            .map_err(|e| RinkError::Storage(format!("edge lookup: {}", e)))?;
        Ok(raw.map(|raw| {
            let edge = decode_edge(&raw);
            (raw, edge)
        }))
    }

    fn swap_edge(
        &self,
        pair: &PairKey,
        old: Option<&sled::IVec>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        let swapped = self
            .edges
            .compare_and_swap(pair.storage_key().as_bytes(), old, new)
            .map_err(|e| RinkError::Storage(format!("edge update: {}", e)))?;
        Ok(swapped.is_ok())
    }

    fn scan_messages(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<(sled::IVec, sled::IVec, Message)>> {
        let iter = match prefix {
            Some(p) => self.messages.scan_prefix(p.as_bytes()),
            None => self.messages.iter(),
        };
        let mut out = Vec::new();
        for entry in iter {
            let (key, val) =
                entry.map_err(|e| RinkError::Storage(format!("Failed to scan messages: {}", e)))?;
            if let Some(msg) = decode_message(&val) {
                out.push((key, val, msg));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl RecordStore for SledStore {
    async fn player(&self, id: &Identity) -> Result<Option<Player>> {
        let raw = self
            .players
            .get(id.as_str().as_bytes())
            .map_err(|e| RinkError::Storage(format!("get_player: {}", e)))?;
        Ok(raw.and_then(|raw| decode_player(&raw)))
    }

    async fn edge_for_pair(&self, pair: &PairKey) -> Result<Option<FriendEdge>> {
        Ok(self.edge_slot(pair)?.and_then(|(_, edge)| edge))
    }

    async fn edges_touching(&self, id: &Identity) -> Result<Vec<FriendEdge>> {
        let mut out = Vec::new();
        for entry in self.edges.iter() {
            let (_, val) =
                entry.map_err(|e| RinkError::Storage(format!("Failed to scan edges: {}", e)))?;
            if let Some(edge) = decode_edge(&val) {
                if edge.pair().contains(id) {
                    out.push(edge);
                }
            }
        }
        Ok(out)
    }

    async fn next_edge_id(&self) -> Result<u64> {
        self.db
            .generate_id()
            .map_err(|e| RinkError::Storage(format!("generate_id: {}", e)))
    }

    async fn insert_edge_if_absent(&self, edge: &FriendEdge) -> Result<bool> {
        let pair = edge.pair();
        let val = encode_edge(edge).map_err(RinkError::Serialization)?;
        loop {
            let current = self.edge_slot(&pair)?;
            if let Some((_, Some(existing))) = &current {
                if existing.is_live() {
                    return Ok(false);
                }
            }
            // Empty, rejected or corrupt slot: claim it atomically
            let old = current.as_ref().map(|(raw, _)| raw);
            if self.swap_edge(&pair, old, Some(val.clone()))? {
                return Ok(true);
            }
            debug!("Edge slot {} changed during insert, retrying", pair);
        }
    }

    async fn replace_edge(&self, expected: &FriendEdge, new: &FriendEdge) -> Result<bool> {
        let pair = expected.pair();
        let Some((raw, Some(current))) = self.edge_slot(&pair)? else {
            return Ok(false);
        };
        if &current != expected {
            return Ok(false);
        }
        let val = encode_edge(new).map_err(RinkError::Serialization)?;
        self.swap_edge(&pair, Some(&raw), Some(val))
    }

    async fn delete_edge(&self, expected: &FriendEdge) -> Result<bool> {
        let pair = expected.pair();
        let Some((raw, Some(current))) = self.edge_slot(&pair)? else {
            return Ok(false);
        };
        if &current != expected {
            return Ok(false);
        }
        self.swap_edge(&pair, Some(&raw), None)
    }

    async fn insert_message(
        &self,
        sender: &Identity,
        receiver: &Identity,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Message> {
        let id = self
            .db
            .generate_id()
            .map_err(|e| RinkError::Storage(format!("generate_id: {}", e)))?;
        let msg = Message {
            id,
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            text: text.to_string(),
            timestamp,
            read: false,
        };
        let val = encode_message(&msg).map_err(RinkError::Serialization)?;
        self.messages
            .insert(message_key(&msg.pair(), id).as_bytes(), val)
            .map_err(|e| RinkError::Storage(format!("Failed to save message: {}", e)))?;
        Ok(msg)
    }

    async fn messages_for_pair(&self, pair: &PairKey) -> Result<Vec<Message>> {
        let prefix = format!("{}/", pair.storage_key());
        // Prefix match is necessary but not sufficient for odd identities
        Ok(self
            .scan_messages(Some(&prefix))?
            .into_iter()
            .map(|(_, _, msg)| msg)
            .filter(|msg| &msg.pair() == pair)
            .collect())
    }

    async fn messages_touching(&self, id: &Identity) -> Result<Vec<Message>> {
        Ok(self
            .scan_messages(None)?
            .into_iter()
            .map(|(_, _, msg)| msg)
            .filter(|msg| msg.partner_of(id).is_some())
            .collect())
    }

    async fn mark_read(&self, receiver: &Identity, sender: &Identity) -> Result<usize> {
        let pair = PairKey::new(receiver, sender);
        let prefix = format!("{}/", pair.storage_key());
        let mut changed = 0;

        for (key, old, msg) in self.scan_messages(Some(&prefix))? {
            if msg.read || &msg.receiver_id != receiver || &msg.sender_id != sender {
                continue;
            }
            let new = encode_message(&Message { read: true, ..msg })
                .map_err(RinkError::Serialization)?;
            let swapped = self
                .messages
                .compare_and_swap(&key, Some(old), Some(new))
                .map_err(|e| RinkError::Storage(format!("mark_read: {}", e)))?;
            // A lost swap means a concurrent caller already flipped the flag
            if swapped.is_ok() {
                changed += 1;
            }
        }

        Ok(changed)
    }
}
