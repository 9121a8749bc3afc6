/// Client-side polling reconciliation
///
/// One shared scheduler per client process. Each topic has at most one
/// poller task, shared by every [`Subscription`] to it and aborted when the
/// last handle drops. Every fetch carries a sequence number so that a slow
/// response can never overwrite a newer one; fetches are bounded by a
/// timeout and failures leave the last good snapshot in place.
mod cache;
mod topic;

pub use cache::{ApplyOutcome, LocalSessionCache};
pub use topic::{diff, Snapshot, SyncEvent, Topic};

use crate::conversation::ConversationStore;
use crate::error::{RinkError, Result};
use crate::friendship::FriendshipGraph;
use crate::store::RecordStore;
use crate::types::Session;
use crate::unread::UnreadAggregator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Polling periods and fault tolerance
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub profile_interval: Duration,
    pub unread_interval: Duration,
    pub conversation_interval: Duration,
    /// Friend requests and friend list
    pub social_interval: Duration,
    /// Upper bound on one fetch
    pub fetch_timeout: Duration,
    /// Failing this long publishes `Degraded`
    pub staleness_threshold: Duration,
    /// Per-topic broadcast buffer
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            profile_interval: Duration::from_secs(5),
            unread_interval: Duration::from_secs(3),
            conversation_interval: Duration::from_secs(3),
            social_interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_millis(500),
            staleness_threshold: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Same period for every topic
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.profile_interval = every;
        self.unread_interval = every;
        self.conversation_interval = every;
        self.social_interval = every;
        self
    }

    pub fn interval_for(&self, topic: &Topic) -> Duration {
        match topic {
            Topic::Profile(_) => self.profile_interval,
            Topic::Conversation { .. } => self.conversation_interval,
            Topic::Unread(_) => self.unread_interval,
            Topic::FriendRequests(_) | Topic::Friends(_) => self.social_interval,
        }
    }
}

/// One event published for a topic
#[derive(Debug, Clone)]
pub struct SyncUpdate {
    pub topic: Topic,
    pub seq: u64,
    pub event: SyncEvent,
}

struct Poller {
    refs: usize,
    tx: broadcast::Sender<SyncUpdate>,
    task: JoinHandle<()>,
}

/// State shared with subscription handles
struct Shared {
    pollers: Mutex<HashMap<Topic, Poller>>,
    cache: Mutex<LocalSessionCache>,
    seq: AtomicU64,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest sequence number handed out so far
    fn issued(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

// A poisoned lock only means another task panicked mid-update; the cache
// is rebuildable and the poller map stays structurally valid.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner<S> {
    store: Arc<S>,
    graph: FriendshipGraph<S>,
    conversations: ConversationStore<S>,
    unread: UnreadAggregator<S>,
    config: SyncConfig,
    shared: Arc<Shared>,
}

impl<S: RecordStore> Inner<S> {
    async fn fetch(&self, topic: &Topic) -> Result<Snapshot> {
        Ok(match topic {
            Topic::Profile(id) => Snapshot::Profile(self.store.player(id).await?),
            Topic::Conversation { viewer, partner } => {
                Snapshot::Conversation(self.conversations.get_conversation(viewer, partner).await?)
            }
            Topic::Unread(viewer) => {
                let by_partner = self.unread.unread_by_partner(viewer).await?;
                Snapshot::Unread {
                    total: by_partner.values().sum(),
                    by_partner,
                }
            }
            Topic::FriendRequests(id) => {
                Snapshot::FriendRequests(self.graph.list_received_requests(id).await?)
            }
            Topic::Friends(id) => Snapshot::Friends(self.graph.list_friends(id).await?),
        })
    }

    /// One reconciliation pass: fetch, diff, replace, publish
    async fn poll_once(&self, topic: &Topic) -> Vec<SyncEvent> {
        let seq = self.shared.next_seq();
        let fetched = match timeout(self.config.fetch_timeout, self.fetch(topic)).await {
            Ok(result) => result,
            Err(_) => Err(RinkError::Timeout(format!(
                "fetch timed out after {:?}",
                self.config.fetch_timeout
            ))),
        };

        let events = {
            let mut cache = lock(&self.shared.cache);
            let now = Instant::now();
            match fetched {
                Ok(snapshot) => match cache.apply(topic, seq, snapshot, now) {
                    ApplyOutcome::Applied(events) => events,
                    ApplyOutcome::Stale => {
                        debug!("Discarding stale response #{} for {:?}", seq, topic);
                        Vec::new()
                    }
                },
                Err(e) => {
                    warn!(
                        "Poll #{} for {:?} failed, keeping last snapshot: {}",
                        seq, topic, e
                    );
                    let threshold = self.config.staleness_threshold;
                    cache
                        .record_failure(topic, seq, &e.to_string(), now, threshold)
                        .into_iter()
                        .collect()
                }
            }
        };

        let tx = lock(&self.shared.pollers).get(topic).map(|p| p.tx.clone());
        if let Some(tx) = tx {
            for event in &events {
                // No receivers left is fine: the poller is about to be aborted
                let _ = tx.send(SyncUpdate {
                    topic: topic.clone(),
                    seq,
                    event: event.clone(),
                });
            }
        }
        events
    }
}

async fn run_poller<S: RecordStore + 'static>(inner: Arc<Inner<S>>, topic: Topic) {
    let mut ticker = interval(inner.config.interval_for(&topic));
    // A tick that fires while a fetch is in flight is skipped
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        inner.poll_once(&topic).await;
    }
}

/// Handle to a topic's update stream. Dropping it releases the poller.
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<SyncUpdate>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next update; `None` once the scheduler shut down
    pub async fn recv(&mut self) -> Option<SyncUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Consumer is too slow: skip lagged updates and continue
                    warn!("Subscription to {:?} lagged {} updates", self.topic, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop listening (same as dropping the handle)
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut pollers = lock(&self.shared.pollers);
        let last = match pollers.get_mut(&self.topic) {
            Some(poller) => {
                poller.refs = poller.refs.saturating_sub(1);
                poller.refs == 0
            }
            None => false,
        };
        if last {
            if let Some(poller) = pollers.remove(&self.topic) {
                poller.task.abort();
                lock(&self.shared.cache).forget(&self.topic, self.shared.issued());
                debug!("Stopped polling {:?}", self.topic);
            }
        }
    }
}

pub struct SyncScheduler<S> {
    inner: Arc<Inner<S>>,
}

impl<S: RecordStore + 'static> SyncScheduler<S> {
    pub fn new(store: Arc<S>, session: Session, config: SyncConfig) -> Self {
        let shared = Arc::new(Shared {
            pollers: Mutex::new(HashMap::new()),
            cache: Mutex::new(LocalSessionCache::new(session)),
            seq: AtomicU64::new(0),
        });
        Self {
            inner: Arc::new(Inner {
                graph: FriendshipGraph::new(store.clone()),
                conversations: ConversationStore::new(store.clone()),
                unread: UnreadAggregator::new(store.clone()),
                store,
                config,
                shared,
            }),
        }
    }

    pub fn session(&self) -> Session {
        lock(&self.inner.shared.cache).session().clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribe to a topic. Attaches to the running poller if there is
    /// one, otherwise starts polling. Must be called inside a tokio runtime.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let mut pollers = lock(&self.inner.shared.pollers);
        let rx = match pollers.get_mut(&topic) {
            Some(poller) => {
                poller.refs += 1;
                poller.tx.subscribe()
            }
            None => {
                lock(&self.inner.shared.cache).track(&topic, Instant::now());
                let (tx, rx) = broadcast::channel(self.inner.config.channel_capacity.max(1));
                let task = tokio::spawn(run_poller(self.inner.clone(), topic.clone()));
                info!(
                    "Polling {:?} every {:?}",
                    topic,
                    self.inner.config.interval_for(&topic)
                );
                pollers.insert(topic.clone(), Poller { refs: 1, tx, task });
                rx
            }
        };
        Subscription {
            topic,
            rx,
            shared: self.inner.shared.clone(),
        }
    }

    /// Fetch a topic now, outside its schedule. Goes through the same
    /// sequence check as scheduled ticks and publishes to subscribers.
    /// Topics without a poller keep no cached state afterwards.
    pub async fn refresh(&self, topic: &Topic) -> Vec<SyncEvent> {
        let events = self.inner.poll_once(topic).await;

        let shared = &self.inner.shared;
        let pollers = lock(&shared.pollers);
        if !pollers.contains_key(topic) {
            lock(&shared.cache).forget(topic, shared.issued());
        }
        events
    }

    /// Last applied snapshot (for late subscribers)
    pub fn current(&self, topic: &Topic) -> Option<Snapshot> {
        lock(&self.inner.shared.cache).snapshot(topic).cloned()
    }

    pub fn is_polling(&self, topic: &Topic) -> bool {
        lock(&self.inner.shared.pollers).contains_key(topic)
    }

    pub fn active_topics(&self) -> usize {
        lock(&self.inner.shared.pollers).len()
    }

    /// Drop all cached snapshots; next ticks start from `Initial`
    pub fn clear_cache(&self) {
        let shared = &self.inner.shared;
        lock(&shared.cache).clear(shared.issued());
    }

    /// Abort every poller. Outstanding subscriptions see `None`.
    pub fn shutdown(&self) {
        let mut pollers = lock(&self.inner.shared.pollers);
        for (topic, poller) in pollers.drain() {
            poller.task.abort();
            debug!("Stopped polling {:?}", topic);
        }
    }
}

impl<S> Drop for SyncScheduler<S> {
    fn drop(&mut self) {
        let mut pollers = lock(&self.inner.shared.pollers);
        for (_, poller) in pollers.drain() {
            poller.task.abort();
        }
    }
}
