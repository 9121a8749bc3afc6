/// Direct-message conversations
///
/// A conversation is never stored as its own record: it is every message
/// whose endpoints form the same unordered pair, ordered by
/// `(timestamp, id)`. Ids come from the store in insertion order, so ties
/// inside the same instant replay deterministically.
use crate::error::{RinkError, Result};
use crate::store::RecordStore;
use crate::types::{ConversationSummary, Identity, Message, PairKey};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const PREVIEW_CHARS: usize = 80;

/// Sort a message list into conversation order
pub fn sort_conversation(messages: &mut [Message]) {
    messages.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

pub struct ConversationStore<S> {
    store: Arc<S>,
}

impl<S> Clone for ConversationStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> ConversationStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append a message from `sender` to `receiver`.
    /// Peer existence is not checked here.
    pub async fn send_message(
        &self,
        sender: &Identity,
        receiver: &Identity,
        text: &str,
    ) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(RinkError::EmptyMessage);
        }
        if sender == receiver {
            return Err(RinkError::SelfMessage);
        }
        let msg = self
            .store
            .insert_message(sender, receiver, text, Utc::now())
            .await?;
        info!("Message {} sent {} -> {} ({} bytes)", msg.id, sender, receiver, text.len());
        Ok(msg)
    }

    /// Every message between `a` and `b`, oldest first.
    /// Symmetric: `get_conversation(a, b) == get_conversation(b, a)`.
    pub async fn get_conversation(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>> {
        let pair = PairKey::new(a, b);
        let mut messages = self.store.messages_for_pair(&pair).await?;
        sort_conversation(&mut messages);
        debug!("Loaded {} messages for {}", messages.len(), pair);
        Ok(messages)
    }

    /// Mark everything `partner` sent to `viewer` as read. Idempotent.
    pub async fn mark_as_read(&self, viewer: &Identity, partner: &Identity) -> Result<usize> {
        let changed = self.store.mark_read(viewer, partner).await?;
        if changed > 0 {
            debug!("{} marked {} messages from {} as read", viewer, changed, partner);
        }
        Ok(changed)
    }

    /// All of `user`'s messages grouped by partner, each group oldest first
    pub async fn list_conversations(
        &self,
        user: &Identity,
    ) -> Result<BTreeMap<Identity, Vec<Message>>> {
        let mut grouped: BTreeMap<Identity, Vec<Message>> = BTreeMap::new();
        for msg in self.store.messages_touching(user).await? {
            let Some(partner) = msg.partner_of(user).cloned() else {
                continue;
            };
            grouped.entry(partner).or_default().push(msg);
        }
        for messages in grouped.values_mut() {
            sort_conversation(messages);
        }
        Ok(grouped)
    }

    /// Inbox rows for `user`, most recent conversation first
    pub async fn conversation_summaries(
        &self,
        user: &Identity,
    ) -> Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<ConversationSummary> = self
            .list_conversations(user)
            .await?
            .into_iter()
            .filter_map(|(partner_id, messages)| {
                let unread = messages.iter().filter(|m| m.is_unread_for(user)).count();
                messages.last().map(|last| ConversationSummary {
                    partner_id,
                    last_preview: preview(&last.text),
                    last_timestamp: last.timestamp,
                    last_id: last.id,
                    unread,
                })
            })
            .collect();
        summaries.sort_by(|a, b| (b.last_timestamp, b.last_id).cmp(&(a.last_timestamp, a.last_id)));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn conversations() -> ConversationStore<MemoryStore> {
        ConversationStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        let convs = conversations();
        let a = Identity::from("a");
        let b = Identity::from("b");
        assert!(matches!(convs.send_message(&a, &b, "").await, Err(RinkError::EmptyMessage)));
        assert!(matches!(
            convs.send_message(&a, &b, " \n\t ").await,
            Err(RinkError::EmptyMessage)
        ));
        assert!(convs.get_conversation(&a, &b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_peer_is_accepted() {
        let convs = conversations();
        let msg = convs
            .send_message(&Identity::from("a"), &Identity::random(), "anyone there?")
            .await
            .unwrap();
        assert!(!msg.read);
    }

    #[test]
    fn test_sort_breaks_timestamp_ties_by_id() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let msg = |id: u64, text: &str| Message {
            id,
            sender_id: Identity::from("a"),
            receiver_id: Identity::from("b"),
            text: text.into(),
            timestamp: ts,
            read: false,
        };
        let mut messages = vec![msg(9, "third"), msg(2, "first"), msg(5, "second")];
        sort_conversation(&mut messages);
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_summaries_most_recent_first() {
        let convs = conversations();
        let a = Identity::from("a");
        let b = Identity::from("b");
        let c = Identity::from("c");
        convs.send_message(&b, &a, "from b").await.unwrap();
        convs.send_message(&c, &a, "from c").await.unwrap();
        convs.send_message(&a, &c, "reply to c").await.unwrap();

        let summaries = convs.conversation_summaries(&a).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].partner_id, c);
        assert_eq!(summaries[0].last_preview, "reply to c");
        assert_eq!(summaries[0].unread, 1);
        assert_eq!(summaries[1].partner_id, b);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 1);
        assert_eq!(preview("short"), "short");
    }
}
