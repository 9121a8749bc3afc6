/// Unread counts, derived from message state on every call
/// No counter is stored anywhere: totals are always the sum of the
/// per-partner counts read in the same pass.
use crate::error::Result;
use crate::store::RecordStore;
use crate::types::{Identity, PairKey};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct UnreadAggregator<S> {
    store: Arc<S>,
}

impl<S> Clone for UnreadAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> UnreadAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Messages from `partner` that `viewer` has not read
    pub async fn unread_for(&self, viewer: &Identity, partner: &Identity) -> Result<usize> {
        let messages = self
            .store
            .messages_for_pair(&PairKey::new(viewer, partner))
            .await?;
        Ok(messages
            .iter()
            .filter(|m| m.is_unread_for(viewer) && &m.sender_id == partner)
            .count())
    }

    /// Non-zero unread counts keyed by partner
    pub async fn unread_by_partner(&self, viewer: &Identity) -> Result<BTreeMap<Identity, usize>> {
        let mut counts = BTreeMap::new();
        for msg in self.store.messages_touching(viewer).await? {
            if msg.is_unread_for(viewer) {
                *counts.entry(msg.sender_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Global badge: sum of every per-partner count
    pub async fn total_unread_for(&self, viewer: &Identity) -> Result<usize> {
        Ok(self.unread_by_partner(viewer).await?.values().sum())
    }
}
