/// Local session cache: last-applied snapshot per topic
///
/// Single writer, never authoritative. Dropping it (or any topic in it)
/// only means the next tick reports `Initial` again. Fetches issued before
/// a discard can never be applied after it.
use super::topic::{diff, Snapshot, SyncEvent, Topic};
use crate::types::Session;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct TopicState {
    snapshot: Option<Snapshot>,
    last_applied_seq: u64,
    /// Last successful fetch, or when tracking started
    fresh_at: Instant,
    degraded: bool,
}

impl TopicState {
    fn new(now: Instant) -> Self {
        Self {
            snapshot: None,
            last_applied_seq: 0,
            fresh_at: now,
            degraded: false,
        }
    }
}

/// Outcome of applying a fetched snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A newer response was already applied; this one is dropped
    Stale,
    Applied(Vec<SyncEvent>),
}

#[derive(Debug)]
pub struct LocalSessionCache {
    session: Session,
    topics: HashMap<Topic, TopicState>,
    /// Highest sequence number issued when state was last discarded
    discarded_through: u64,
}

impl LocalSessionCache {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            topics: HashMap::new(),
            discarded_through: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Start the staleness clock for a topic (no-op if already tracked)
    pub fn track(&mut self, topic: &Topic, now: Instant) {
        self.topics
            .entry(topic.clone())
            .or_insert_with(|| TopicState::new(now));
    }

    pub fn snapshot(&self, topic: &Topic) -> Option<&Snapshot> {
        self.topics.get(topic).and_then(|s| s.snapshot.as_ref())
    }

    /// Apply the response of fetch number `seq`.
    /// Responses older than the last applied one, or issued before the
    /// last discard, are dropped.
    pub fn apply(
        &mut self,
        topic: &Topic,
        seq: u64,
        snapshot: Snapshot,
        now: Instant,
    ) -> ApplyOutcome {
        if seq <= self.discarded_through {
            return ApplyOutcome::Stale;
        }
        let state = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| TopicState::new(now));
        if seq <= state.last_applied_seq {
            return ApplyOutcome::Stale;
        }

        let mut events = Vec::new();
        if state.degraded {
            state.degraded = false;
            events.push(SyncEvent::Recovered);
        }
        match &state.snapshot {
            Some(previous) => events.extend(diff(previous, &snapshot)),
            None => events.push(SyncEvent::Initial(snapshot.clone())),
        }

        state.snapshot = Some(snapshot);
        state.last_applied_seq = seq;
        state.fresh_at = now;
        ApplyOutcome::Applied(events)
    }

    /// Record a failed fetch. The last good snapshot stays in place.
    /// Returns `Degraded` once, when staleness first exceeds `threshold`.
    pub fn record_failure(
        &mut self,
        topic: &Topic,
        seq: u64,
        error: &str,
        now: Instant,
        threshold: Duration,
    ) -> Option<SyncEvent> {
        if seq <= self.discarded_through {
            return None;
        }
        let state = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| TopicState::new(now));
        if seq <= state.last_applied_seq || state.degraded {
            return None;
        }
        let stale_for = now.saturating_duration_since(state.fresh_at);
        if stale_for < threshold {
            return None;
        }
        state.degraded = true;
        Some(SyncEvent::Degraded {
            stale_for,
            error: error.to_string(),
        })
    }

    /// Drop one topic. `issued` is the highest sequence number handed out
    /// so far; responses to those fetches are rejected from now on.
    pub fn forget(&mut self, topic: &Topic, issued: u64) {
        self.topics.remove(topic);
        self.discard_through(issued);
    }

    /// Discard everything; the next tick of each topic starts over
    pub fn clear(&mut self, issued: u64) {
        self.topics.clear();
        self.discard_through(issued);
    }

    fn discard_through(&mut self, issued: u64) {
        self.discarded_through = self.discarded_through.max(issued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn cache() -> (LocalSessionCache, Topic) {
        let session = Session::new(Identity::from("me"));
        let topic = session.friends_topic();
        (LocalSessionCache::new(session), topic)
    }

    fn friends(names: &[&str]) -> Snapshot {
        Snapshot::Friends(names.iter().map(|n| Identity::from(*n)).collect())
    }

    #[test]
    fn test_older_response_cannot_overwrite_newer() {
        let (mut cache, topic) = cache();
        let now = Instant::now();

        // Fetch 2 (fast) lands before fetch 1 (slow)
        let fast = cache.apply(&topic, 2, friends(&["a", "b"]), now);
        assert!(matches!(fast, ApplyOutcome::Applied(_)));
        assert_eq!(cache.apply(&topic, 1, friends(&["a"]), now), ApplyOutcome::Stale);
        assert_eq!(cache.snapshot(&topic), Some(&friends(&["a", "b"])));
    }

    #[test]
    fn test_first_apply_is_initial() {
        let (mut cache, topic) = cache();
        let outcome = cache.apply(&topic, 1, friends(&["a"]), Instant::now());
        assert_eq!(outcome, ApplyOutcome::Applied(vec![SyncEvent::Initial(friends(&["a"]))]));
        let outcome = cache.apply(&topic, 2, friends(&["a"]), Instant::now());
        assert_eq!(outcome, ApplyOutcome::Applied(vec![SyncEvent::Unchanged]));
    }

    #[test]
    fn test_degraded_only_after_threshold_and_once() {
        let (mut cache, topic) = cache();
        let t0 = Instant::now();
        let threshold = Duration::from_secs(30);
        cache.apply(&topic, 1, friends(&["a"]), t0);

        let at = |secs| t0 + Duration::from_secs(secs);

        let early = cache.record_failure(&topic, 2, "timeout", at(5), threshold);
        assert!(early.is_none());
        assert_eq!(cache.snapshot(&topic), Some(&friends(&["a"])));

        let late = cache.record_failure(&topic, 3, "timeout", at(31), threshold);
        assert!(matches!(late, Some(SyncEvent::Degraded { .. })));
        let again = cache.record_failure(&topic, 4, "timeout", at(40), threshold);
        assert!(again.is_none());

        let back = cache.apply(&topic, 5, friends(&["a"]), at(41));
        assert_eq!(back, ApplyOutcome::Applied(vec![SyncEvent::Recovered, SyncEvent::Unchanged]));
    }

    #[test]
    fn test_clear_restarts_from_initial() {
        let (mut cache, topic) = cache();
        cache.apply(&topic, 1, friends(&["a"]), Instant::now());
        cache.clear(1);
        assert!(cache.snapshot(&topic).is_none());
        let outcome = cache.apply(&topic, 2, friends(&["a"]), Instant::now());
        assert_eq!(outcome, ApplyOutcome::Applied(vec![SyncEvent::Initial(friends(&["a"]))]));
    }

    #[test]
    fn test_fetch_issued_before_clear_is_dropped() {
        let (mut cache, topic) = cache();
        let now = Instant::now();

        // Fetch 1 is slow, fetch 2 lands, then the cache is cleared
        cache.apply(&topic, 2, friends(&["a", "b"]), now);
        cache.clear(2);
        assert_eq!(cache.apply(&topic, 1, friends(&["a"]), now), ApplyOutcome::Stale);
        assert!(cache.snapshot(&topic).is_none());

        let later = now + Duration::from_secs(60);
        assert!(cache.record_failure(&topic, 2, "timeout", later, Duration::ZERO).is_none());
        let fresh = cache.apply(&topic, 3, friends(&["a", "b"]), now);
        assert!(matches!(fresh, ApplyOutcome::Applied(_)));
    }

    #[test]
    fn test_forget_then_resubscribe_rejects_old_fetch() {
        let (mut cache, topic) = cache();
        let now = Instant::now();
        cache.apply(&topic, 4, friends(&["a", "b"]), now);
        cache.forget(&topic, 5);

        cache.track(&topic, now);
        assert_eq!(cache.apply(&topic, 5, friends(&["a"]), now), ApplyOutcome::Stale);
        assert!(cache.snapshot(&topic).is_none());
        let fresh = cache.apply(&topic, 6, friends(&["a", "b"]), now);
        assert_eq!(fresh, ApplyOutcome::Applied(vec![SyncEvent::Initial(friends(&["a", "b"]))]));
    }
}
