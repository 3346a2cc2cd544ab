//! Live synchronization of a user's conversation list.
//!
//! Each subscription runs a worker task that merges remote change
//! notifications into a local copy of the list and publishes immutable
//! snapshots over a channel. Identity resolution reuses the resolver
//! cache, so message-only deltas never trigger participant re-fetches.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lru::LruCache;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sync::core::config::SyncConfig;
use crate::sync::core::conversation::Conversation;
use crate::sync::core::errors::SyncResult;
use crate::sync::core::ids::{ConversationId, MessageId, UserId};
use crate::sync::core::user::User;
use crate::sync::resolver::IdentityResolver;
use crate::sync::store::{DocumentStore, StoreChange, StoreChangeKind};

/// Lifecycle of one subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Initial snapshot fetch in flight; nothing delivered yet.
    Subscribing,
    /// Steady state; snapshots are delivered on every relevant change.
    Streaming,
    /// The remote feed failed. Terminal; callers re-subscribe explicitly.
    Error(String),
    /// The caller released the subscription. Terminal.
    Closed,
}

/// One conversation with its resolved participant profiles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationView {
    /// The conversation document.
    pub conversation: Conversation,
    /// Resolved participants; ids without a backing record are absent.
    pub participants: Vec<User>,
}

/// Immutable snapshot of the full conversation list, newest activity
/// first.
pub type ListSnapshot = Arc<Vec<ConversationView>>;

/// Coordinator producing live-updating conversation lists.
pub struct LiveSyncCoordinator {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<IdentityResolver>,
    config: SyncConfig,
}

impl LiveSyncCoordinator {
    /// Create a coordinator over the given store and resolver.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: Arc<IdentityResolver>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Subscribe to the live conversation list of `user_id`.
    ///
    /// The returned handle delivers an initial snapshot followed by a new
    /// snapshot after every relevant remote change, until released.
    #[must_use]
    pub fn subscribe(&self, user_id: UserId) -> SubscriptionHandle {
        let (snapshots_tx, snapshots_rx) = mpsc::channel(self.config.coordinator.channel_capacity);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Subscribing);
        let active = Arc::new(AtomicBool::new(true));
        let cancel = Arc::new(Notify::new());

        let dedupe_capacity = NonZeroUsize::new(self.config.coordinator.dedupe_capacity)
            .unwrap_or(NonZeroUsize::MIN);

        let worker = SyncWorker {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            user_id,
            page_size: self.config.repository.page_size,
            snapshots: snapshots_tx,
            state: state_tx,
            active: active.clone(),
            cancel: cancel.clone(),
            seen: LruCache::new(dedupe_capacity),
            conversations: HashMap::new(),
        };
        let task = tokio::spawn(worker.run());

        SubscriptionHandle {
            updates: snapshots_rx,
            state: state_rx,
            active,
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to one live subscription.
///
/// Dropping the handle releases the subscription; [`release`] may also be
/// called explicitly, any number of times.
///
/// [`release`]: SubscriptionHandle::release
pub struct SubscriptionHandle {
    updates: mpsc::Receiver<ListSnapshot>,
    state: watch::Receiver<SubscriptionState>,
    active: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Wait for the next snapshot. Returns `None` once the subscription
    /// is released and all buffered snapshots are drained.
    pub async fn next(&mut self) -> Option<ListSnapshot> {
        self.updates.recv().await
    }

    /// Non-blocking snapshot poll.
    pub fn try_next(&mut self) -> Option<ListSnapshot> {
        self.updates.try_recv().ok()
    }

    /// Current subscription state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    /// Release the subscription. Idempotent.
    ///
    /// No snapshot is delivered after this returns, even for work that was
    /// in flight when it was called: the worker checks the active flag
    /// before every delivery, the channel is closed here, and snapshots
    /// already buffered are discarded.
    pub fn release(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.cancel.notify_one();
        }
        self.updates.close();
        while self.updates.try_recv().is_ok() {}
        if let Some(task) = self.task.take() {
            drop(task);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-subscription worker state.
struct SyncWorker {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<IdentityResolver>,
    user_id: UserId,
    page_size: usize,
    snapshots: mpsc::Sender<ListSnapshot>,
    state: watch::Sender<SubscriptionState>,
    active: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    seen: LruCache<MessageId, ()>,
    conversations: HashMap<ConversationId, Conversation>,
}

impl SyncWorker {
    async fn run(mut self) {
        // Subscribe before the initial read so no change committed in
        // between is missed; duplicates are absorbed by the dedupe cache.
        let mut changes = self.store.changes();

        match self.store.list_for_user(self.user_id, self.page_size).await {
            Ok(initial) => {
                for conversation in initial {
                    self.conversations.insert(conversation.id, conversation);
                }
            }
            Err(err) => {
                self.fail(err.to_string());
                return;
            }
        }

        let _ = self.state.send(SubscriptionState::Streaming);
        if !self.deliver().await {
            return;
        }

        let cancel = self.cancel.clone();
        loop {
            let received = tokio::select! {
                () = cancel.notified() => {
                    self.close();
                    return;
                }
                received = changes.recv() => received,
            };

            match received {
                Ok(change) => match self.apply(change).await {
                    Ok(true) => {
                        if !self.deliver().await {
                            return;
                        }
                    }
                    Ok(false) => {}
                    Err(err) => {
                        self.fail(err.to_string());
                        return;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("change feed lagged by {skipped} event(s); resyncing");
                    if let Err(err) = self.resync().await {
                        self.fail(err.to_string());
                        return;
                    }
                    if !self.deliver().await {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.fail("change feed closed".to_string());
                    return;
                }
            }
        }
    }

    /// Merge one remote change. Returns whether the list changed.
    async fn apply(&mut self, change: StoreChange) -> SyncResult<bool> {
        let relevant = change.involves(self.user_id)
            || self.conversations.contains_key(&change.conversation_id);
        if !relevant {
            return Ok(false);
        }

        if let StoreChangeKind::MessageAppended(message_id) = change.kind {
            if self.seen.put(message_id, ()).is_some() {
                debug!("skipping already-merged message {message_id}");
                return Ok(false);
            }
        }

        // Authoritative point re-read; the notification only names what
        // changed.
        match self.store.get_conversation(change.conversation_id).await? {
            Some(conversation) => {
                self.conversations.insert(conversation.id, conversation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Full list re-fetch after the change feed lagged.
    async fn resync(&mut self) -> SyncResult<()> {
        let listed = self.store.list_for_user(self.user_id, self.page_size).await?;
        self.conversations.clear();
        for conversation in listed {
            self.conversations.insert(conversation.id, conversation);
        }
        Ok(())
    }

    /// Build and deliver a snapshot. Returns `false` once the worker
    /// should stop.
    async fn deliver(&mut self) -> bool {
        let snapshot = self.build_snapshot().await;

        // Stale guard: never deliver after release, even for in-flight
        // work.
        if !self.active.load(Ordering::SeqCst) {
            self.close();
            return false;
        }

        if self.snapshots.send(snapshot).await.is_err() {
            self.close();
            return false;
        }
        true
    }

    /// Sort the list by last activity and attach resolved participants,
    /// fetching identities only for ids missing from the resolver cache.
    async fn build_snapshot(&self) -> ListSnapshot {
        let mut ordered: Vec<Conversation> = self.conversations.values().cloned().collect();
        ordered.sort_by(|a, b| {
            b.activity_at()
                .cmp(&a.activity_at())
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let missing: Vec<UserId> = ordered
            .iter()
            .flat_map(|c| c.participants.ids())
            .filter(|id| self.resolver.cached(*id).is_none())
            .collect();
        if !missing.is_empty() {
            self.resolver.resolve(&missing).await;
        }

        let views = ordered
            .into_iter()
            .map(|conversation| {
                let participants = conversation
                    .participants
                    .ids()
                    .into_iter()
                    .filter_map(|id| self.resolver.cached(id))
                    .collect();
                ConversationView {
                    conversation,
                    participants,
                }
            })
            .collect();

        Arc::new(views)
    }

    fn fail(&self, message: String) {
        warn!("subscription for {} failed: {message}", self.user_id);
        let _ = self.state.send(SubscriptionState::Error(message));
    }

    fn close(&self) {
        let _ = self.state.send(SubscriptionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::sync::core::conversation::ParticipantPair;
    use crate::sync::core::errors::SyncError;
    use crate::sync::core::message::{Message, MessageDraft};
    use crate::sync::store::{SqliteDocumentStore, StoreFuture};

    /// Store decorator counting identity fetches.
    struct CountingStore {
        inner: Arc<SqliteDocumentStore>,
        user_fetches: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: Arc<SqliteDocumentStore>) -> Self {
            Self {
                inner,
                user_fetches: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.user_fetches.load(Ordering::SeqCst)
        }
    }

    impl DocumentStore for CountingStore {
        fn get_user(&self, id: UserId) -> StoreFuture<'_, SyncResult<Option<User>>> {
            self.user_fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.get_user(id)
        }

        fn put_user(&self, user: &User) -> StoreFuture<'_, SyncResult<()>> {
            self.inner.put_user(user)
        }

        fn get_conversation(
            &self,
            id: ConversationId,
        ) -> StoreFuture<'_, SyncResult<Option<Conversation>>> {
            self.inner.get_conversation(id)
        }

        fn find_by_pair(
            &self,
            pair: ParticipantPair,
            limit: usize,
        ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>> {
            self.inner.find_by_pair(pair, limit)
        }

        fn create_conversation(
            &self,
            pair: ParticipantPair,
        ) -> StoreFuture<'_, SyncResult<Conversation>> {
            self.inner.create_conversation(pair)
        }

        fn list_for_user(
            &self,
            user_id: UserId,
            limit: usize,
        ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>> {
            self.inner.list_for_user(user_id, limit)
        }

        fn append_message(
            &self,
            conversation_id: ConversationId,
            draft: MessageDraft,
        ) -> StoreFuture<'_, SyncResult<Message>> {
            self.inner.append_message(conversation_id, draft)
        }

        fn changes(&self) -> broadcast::Receiver<StoreChange> {
            self.inner.changes()
        }
    }

    /// Store whose reads always fail.
    struct BrokenStore {
        changes: broadcast::Sender<StoreChange>,
    }

    impl BrokenStore {
        fn new() -> Self {
            let (changes, _) = broadcast::channel(8);
            Self { changes }
        }

        fn down<T: Send + 'static>() -> StoreFuture<'static, SyncResult<T>> {
            Box::pin(async { Err(SyncError::Transport("store down".to_string())) })
        }
    }

    impl DocumentStore for BrokenStore {
        fn get_user(&self, _id: UserId) -> StoreFuture<'_, SyncResult<Option<User>>> {
            Self::down()
        }

        fn put_user(&self, _user: &User) -> StoreFuture<'_, SyncResult<()>> {
            Self::down()
        }

        fn get_conversation(
            &self,
            _id: ConversationId,
        ) -> StoreFuture<'_, SyncResult<Option<Conversation>>> {
            Self::down()
        }

        fn find_by_pair(
            &self,
            _pair: ParticipantPair,
            _limit: usize,
        ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>> {
            Self::down()
        }

        fn create_conversation(
            &self,
            _pair: ParticipantPair,
        ) -> StoreFuture<'_, SyncResult<Conversation>> {
            Self::down()
        }

        fn list_for_user(
            &self,
            _user_id: UserId,
            _limit: usize,
        ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>> {
            Self::down()
        }

        fn append_message(
            &self,
            _conversation_id: ConversationId,
            _draft: MessageDraft,
        ) -> StoreFuture<'_, SyncResult<Message>> {
            Self::down()
        }

        fn changes(&self) -> broadcast::Receiver<StoreChange> {
            self.changes.subscribe()
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        coordinator: LiveSyncCoordinator,
        alice: User,
        bob: User,
    }

    async fn fixture() -> Fixture {
        let sqlite = Arc::new(SqliteDocumentStore::in_memory().await.unwrap());
        let alice = User::new(UserId::new(), "Alice", "alice@example.com", "").unwrap();
        let bob = User::new(UserId::new(), "Bob", "bob@example.com", "").unwrap();
        sqlite.put_user(&alice).await.unwrap();
        sqlite.put_user(&bob).await.unwrap();

        let store = Arc::new(CountingStore::new(sqlite));
        let resolver = Arc::new(IdentityResolver::new(store.clone()));
        let coordinator =
            LiveSyncCoordinator::new(store.clone(), resolver, SyncConfig::default());
        Fixture {
            store,
            coordinator,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_initial_snapshot_then_streaming() {
        let fx = fixture().await;
        let pair = ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap();
        fx.store.create_conversation(pair).await.unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        let snapshot = handle.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].participants.len(), 2);
        assert_eq!(handle.state(), SubscriptionState::Streaming);
    }

    #[tokio::test]
    async fn test_append_produces_updated_snapshot() {
        let fx = fixture().await;
        let pair = ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap();
        let conversation = fx.store.create_conversation(pair).await.unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        handle.next().await.unwrap();

        let draft = MessageDraft::new(fx.bob.id, "hello").unwrap();
        let message = fx
            .store
            .append_message(conversation.id, draft)
            .await
            .unwrap();

        let snapshot = handle.next().await.unwrap();
        assert_eq!(snapshot[0].conversation.last_message, Some(message));
    }

    #[tokio::test]
    async fn test_message_deltas_reuse_cached_identities() {
        let fx = fixture().await;
        let pair = ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap();
        let conversation = fx.store.create_conversation(pair).await.unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        handle.next().await.unwrap();
        let after_initial = fx.store.fetches();

        for i in 0..3 {
            let draft = MessageDraft::new(fx.alice.id, format!("m{i}")).unwrap();
            fx.store.append_message(conversation.id, draft).await.unwrap();
            handle.next().await.unwrap();
        }

        // Participants were resolved once for the initial snapshot; the
        // message-only deltas must not re-fetch them.
        assert_eq!(fx.store.fetches(), after_initial);
    }

    #[tokio::test]
    async fn test_release_stops_deliveries() {
        let fx = fixture().await;
        let pair = ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap();
        let conversation = fx.store.create_conversation(pair).await.unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        handle.next().await.unwrap();

        handle.release();
        handle.release(); // idempotent

        let draft = MessageDraft::new(fx.bob.id, "after release").unwrap();
        fx.store.append_message(conversation.id, draft).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.try_next().is_none());
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_release_discards_buffered_snapshots() {
        let fx = fixture().await;
        let pair = ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap();
        let conversation = fx.store.create_conversation(pair).await.unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        handle.next().await.unwrap();

        // Let the worker deliver into the channel without consuming it.
        let draft = MessageDraft::new(fx.bob.id, "buffered").unwrap();
        fx.store.append_message(conversation.id, draft).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.release();
        assert!(handle.try_next().is_none());
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_error_state() {
        let store = Arc::new(BrokenStore::new());
        let resolver = Arc::new(IdentityResolver::new(store.clone()));
        let coordinator = LiveSyncCoordinator::new(store, resolver, SyncConfig::default());

        let mut handle = coordinator.subscribe(UserId::new());
        assert_eq!(handle.next().await, None);
        assert!(matches!(handle.state(), SubscriptionState::Error(_)));
    }

    #[tokio::test]
    async fn test_list_resorts_on_new_activity() {
        let fx = fixture().await;
        let carol = User::new(UserId::new(), "Carol", "carol@example.com", "").unwrap();
        fx.store.inner.put_user(&carol).await.unwrap();

        let with_bob = fx
            .store
            .create_conversation(ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap())
            .await
            .unwrap();
        let with_carol = fx
            .store
            .create_conversation(ParticipantPair::new(fx.alice.id, carol.id).unwrap())
            .await
            .unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        handle.next().await.unwrap();

        let draft = MessageDraft::new(fx.bob.id, "ping").unwrap();
        fx.store.append_message(with_bob.id, draft).await.unwrap();
        let snapshot = handle.next().await.unwrap();
        assert_eq!(snapshot[0].conversation.id, with_bob.id);

        let draft = MessageDraft::new(carol.id, "pong").unwrap();
        fx.store.append_message(with_carol.id, draft).await.unwrap();
        let snapshot = handle.next().await.unwrap();
        assert_eq!(snapshot[0].conversation.id, with_carol.id);
    }

    #[tokio::test]
    async fn test_unrelated_changes_are_ignored() {
        let fx = fixture().await;
        let carol = User::new(UserId::new(), "Carol", "carol@example.com", "").unwrap();
        fx.store.inner.put_user(&carol).await.unwrap();
        let pair = ParticipantPair::new(fx.alice.id, fx.bob.id).unwrap();
        fx.store.create_conversation(pair).await.unwrap();

        let mut handle = fx.coordinator.subscribe(fx.alice.id);
        handle.next().await.unwrap();

        // A conversation alice is not part of must not produce a snapshot.
        let other = ParticipantPair::new(fx.bob.id, carol.id).unwrap();
        fx.store.create_conversation(other).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.try_next().is_none());
    }
}
