/// Friend-request state machine
///
/// A relationship is one directional edge per unordered pair:
/// `pending` (from = requester) → `accepted`, or deleted on cancel, decline
/// and unfriend. Every operation resolves the pair through [`PairKey`], so
/// `(a, b)` and `(b, a)` always hit the same edge.
///
/// Resolving operations are conditional writes against the store. When the
/// edge changed between our read and our write, the call reports
/// [`Transition::AlreadyResolved`] instead of failing.
use crate::error::{RinkError, Result};
use crate::store::RecordStore;
use crate::types::{EdgeStatus, FriendEdge, Identity, PairKey, RelationshipStatus, Transition};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Accept,
    Delete,
}

pub struct FriendshipGraph<S> {
    store: Arc<S>,
}

impl<S> Clone for FriendshipGraph<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> FriendshipGraph<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The live edge for a pair, in either direction
    async fn live_edge(&self, a: &Identity, b: &Identity) -> Result<Option<FriendEdge>> {
        let edge = self.store.edge_for_pair(&PairKey::new(a, b)).await?;
        Ok(edge.filter(FriendEdge::is_live))
    }

    /// Relationship of `a` towards `b`
    pub async fn get_status(&self, a: &Identity, b: &Identity) -> Result<RelationshipStatus> {
        if a == b {
            return Ok(RelationshipStatus::None);
        }
        Ok(self
            .live_edge(a, b)
            .await?
            .map(|edge| edge.status_for(a))
            .unwrap_or(RelationshipStatus::None))
    }

    /// Create a pending edge `from → to`
    pub async fn send_request(&self, from: &Identity, to: &Identity) -> Result<FriendEdge> {
        if from == to {
            return Err(RinkError::SelfRequest);
        }
        if let Some(existing) = self.live_edge(from, to).await? {
            return Err(RinkError::AlreadyRelated(existing.status_for(from)));
        }

        let edge = FriendEdge {
            id: self.store.next_edge_id().await?,
            from_id: from.clone(),
            to_id: to.clone(),
            status: EdgeStatus::Pending,
            created_at: Utc::now(),
        };
        if !self.store.insert_edge_if_absent(&edge).await? {
            // The other party claimed the pair between our read and write
            let status = self.get_status(from, to).await?;
            debug!("Friend request {} -> {} lost to concurrent edge ({})", from, to, status);
            return Err(RinkError::AlreadyRelated(status));
        }

        info!("Friend request {} -> {} created (edge {})", from, to, edge.id);
        Ok(edge)
    }

    /// Requester withdraws a pending request
    pub async fn cancel_request(&self, from: &Identity, to: &Identity) -> Result<Transition> {
        self.resolve_pending(from, to, Resolution::Delete).await
    }

    /// Recipient accepts a pending request
    pub async fn accept_request(
        &self,
        accepter: &Identity,
        requester: &Identity,
    ) -> Result<Transition> {
        self.resolve_pending(requester, accepter, Resolution::Accept).await
    }

    /// Recipient declines a pending request (the edge is deleted)
    pub async fn decline_request(
        &self,
        decliner: &Identity,
        requester: &Identity,
    ) -> Result<Transition> {
        self.resolve_pending(requester, decliner, Resolution::Delete).await
    }

    async fn resolve_pending(
        &self,
        requester: &Identity,
        recipient: &Identity,
        resolution: Resolution,
    ) -> Result<Transition> {
        let Some(edge) = self.live_edge(requester, recipient).await? else {
            return Err(RinkError::NoPendingRequest);
        };
        match edge.status {
            EdgeStatus::Accepted => return Ok(Transition::AlreadyResolved),
            EdgeStatus::Pending if &edge.from_id == requester => {}
            _ => return Err(RinkError::NoPendingRequest),
        }

        let applied = match resolution {
            Resolution::Accept => {
                let accepted = FriendEdge {
                    status: EdgeStatus::Accepted,
                    ..edge.clone()
                };
                self.store.replace_edge(&edge, &accepted).await?
            }
            Resolution::Delete => self.store.delete_edge(&edge).await?,
        };

        if !applied {
            debug!("Edge {} already resolved by the other party", edge.id);
            return Ok(Transition::AlreadyResolved);
        }
        info!(
            "Friend request {} -> {} resolved ({:?})",
            requester, recipient, resolution
        );
        Ok(Transition::Applied)
    }

    /// Delete an accepted friendship (either side may call this)
    pub async fn remove_friend(&self, a: &Identity, b: &Identity) -> Result<Transition> {
        if a == b {
            return Err(RinkError::NotFriends);
        }
        let edge = match self.live_edge(a, b).await? {
            Some(edge) if edge.status == EdgeStatus::Accepted => edge,
            _ => return Err(RinkError::NotFriends),
        };
        if !self.store.delete_edge(&edge).await? {
            return Ok(Transition::AlreadyResolved);
        }
        info!("Friendship {} removed by {}", edge.pair(), a);
        Ok(Transition::Applied)
    }

    /// Everyone `id` is friends with, sorted
    pub async fn list_friends(&self, id: &Identity) -> Result<Vec<Identity>> {
        let accepted = self
            .edges_where(id, |edge| edge.status == EdgeStatus::Accepted)
            .await?;
        let mut friends: Vec<Identity> = accepted
            .into_iter()
            .filter_map(|edge| edge.pair().other(id).cloned())
            .collect();
        friends.sort();
        Ok(friends)
    }

    /// Pending requests addressed to `id`, oldest first
    pub async fn list_received_requests(&self, id: &Identity) -> Result<Vec<FriendEdge>> {
        self.edges_where(id, |edge| edge.status == EdgeStatus::Pending && &edge.to_id == id)
            .await
    }

    /// Pending requests sent by `id`, oldest first
    pub async fn list_sent_requests(&self, id: &Identity) -> Result<Vec<FriendEdge>> {
        self.edges_where(id, |edge| edge.status == EdgeStatus::Pending && &edge.from_id == id)
            .await
    }

    /// Edges touching `id` that match `keep`, minus orphans, oldest first
    async fn edges_where<F>(&self, id: &Identity, keep: F) -> Result<Vec<FriendEdge>>
    where
        F: Fn(&FriendEdge) -> bool,
    {
        let mut out = Vec::new();
        for edge in self.store.edges_touching(id).await? {
            if !keep(&edge) {
                continue;
            }
            let Some(other) = edge.pair().other(id).cloned() else {
                continue;
            };
            if self.store.player(&other).await?.is_none() {
                warn!("Skipping edge {}: player {} no longer exists", edge.id, other);
                continue;
            }
            out.push(edge);
        }
        out.sort_by(|x, y| (x.created_at, x.id).cmp(&(y.created_at, y.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Player;

    async fn graph_with(names: &[&str]) -> (FriendshipGraph<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for name in names {
            store
                .upsert_player(Player {
                    id: Identity::from(*name),
                    display_name: name.to_string(),
                    position: None,
                    team: None,
                })
                .await;
        }
        (FriendshipGraph::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_self_request_rejected() {
        let (graph, _) = graph_with(&["a"]).await;
        let a = Identity::from("a");
        assert!(matches!(graph.send_request(&a, &a).await, Err(RinkError::SelfRequest)));
        assert_eq!(graph.get_status(&a, &a).await.unwrap(), RelationshipStatus::None);
    }

    #[tokio::test]
    async fn test_reverse_request_reports_received() {
        let (graph, _) = graph_with(&["a", "b"]).await;
        let a = Identity::from("a");
        let b = Identity::from("b");
        graph.send_request(&a, &b).await.unwrap();

        match graph.send_request(&b, &a).await {
            Err(RinkError::AlreadyRelated(status)) => {
                assert_eq!(status, RelationshipStatus::ReceivedRequest)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_direction_is_precondition_error() {
        let (graph, _) = graph_with(&["a", "b"]).await;
        let a = Identity::from("a");
        let b = Identity::from("b");
        graph.send_request(&a, &b).await.unwrap();

        // The requester cannot accept their own request
        let err = graph.accept_request(&a, &b).await.unwrap_err();
        assert!(matches!(err, RinkError::NoPendingRequest));
        // The recipient cannot cancel it either
        let err = graph.cancel_request(&b, &a).await.unwrap_err();
        assert!(matches!(err, RinkError::NoPendingRequest));
    }

    #[tokio::test]
    async fn test_decline_on_missing_request_fails() {
        let (graph, _) = graph_with(&["a", "b"]).await;
        let err = graph
            .decline_request(&Identity::from("b"), &Identity::from("a"))
            .await
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_cancel_after_accept_is_already_resolved() {
        let (graph, _) = graph_with(&["a", "b"]).await;
        let a = Identity::from("a");
        let b = Identity::from("b");
        graph.send_request(&a, &b).await.unwrap();
        graph.accept_request(&b, &a).await.unwrap();

        assert_eq!(graph.cancel_request(&a, &b).await.unwrap(), Transition::AlreadyResolved);
        assert_eq!(graph.get_status(&a, &b).await.unwrap(), RelationshipStatus::Friends);
    }

    #[tokio::test]
    async fn test_remove_friend_then_request_again() {
        let (graph, _) = graph_with(&["a", "b"]).await;
        let a = Identity::from("a");
        let b = Identity::from("b");
        graph.send_request(&a, &b).await.unwrap();
        graph.accept_request(&b, &a).await.unwrap();

        assert_eq!(graph.remove_friend(&b, &a).await.unwrap(), Transition::Applied);
        assert!(matches!(graph.remove_friend(&a, &b).await, Err(RinkError::NotFriends)));
        assert_eq!(graph.get_status(&a, &b).await.unwrap(), RelationshipStatus::None);

        graph.send_request(&b, &a).await.unwrap();
        assert_eq!(graph.get_status(&a, &b).await.unwrap(), RelationshipStatus::ReceivedRequest);
    }

    #[tokio::test]
    async fn test_orphaned_edges_are_skipped() {
        let (graph, store) = graph_with(&["a", "b", "c"]).await;
        let a = Identity::from("a");
        let b = Identity::from("b");
        let c = Identity::from("c");
        graph.send_request(&b, &a).await.unwrap();
        graph.send_request(&c, &a).await.unwrap();

        store.remove_player(&c).await;
        let received = graph.list_received_requests(&a).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].from_id, b);
        assert_eq!(graph.list_sent_requests(&b).await.unwrap().len(), 1);
    }
}
