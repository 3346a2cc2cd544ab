//! Document store capability contract.
//!
//! The synchronization core talks to its backend through [`DocumentStore`]:
//! point reads, pair-equality and membership queries with result caps,
//! atomic single-document updates, and a live change feed that delivers
//! incremental notifications after an initial snapshot read. Store-native
//! types (row timestamps, JSON columns) never cross this boundary.

pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use crate::sync::core::conversation::{Conversation, ParticipantPair};
use crate::sync::core::errors::SyncResult;
use crate::sync::core::ids::{ConversationId, MessageId, UserId};
use crate::sync::core::message::{Message, MessageDraft};
use crate::sync::core::user::User;

pub use sqlite::SqliteDocumentStore;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What changed in a conversation document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreChangeKind {
    /// A new conversation document was created.
    ConversationCreated,
    /// A message was appended (and `last_message` updated atomically).
    MessageAppended(MessageId),
}

/// Incremental change notification delivered on the live feed.
#[derive(Clone, Copy, Debug)]
pub struct StoreChange {
    /// The conversation that changed.
    pub conversation_id: ConversationId,
    /// Participants of the changed conversation, so subscribers can filter
    /// relevance without a point read.
    pub participants: ParticipantPair,
    /// What changed.
    pub kind: StoreChangeKind,
}

impl StoreChange {
    /// Whether this change is relevant to the given user's list.
    #[must_use]
    pub fn involves(&self, user_id: UserId) -> bool {
        self.participants.contains(user_id)
    }
}

/// Document store trait.
///
/// Write operations assign server-side timestamps and publish a
/// [`StoreChange`] on the feed only after the write has committed, so a
/// subscriber's point re-read always observes the notified state.
pub trait DocumentStore: Send + Sync {
    /// Get a user profile by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_user(&self, id: UserId) -> StoreFuture<'_, SyncResult<Option<User>>>;

    /// Create or update a user profile.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn put_user(&self, user: &User) -> StoreFuture<'_, SyncResult<()>>;

    /// Get a conversation document by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, SyncResult<Option<Conversation>>>;

    /// Find conversations whose participant pair equals `pair`, capped at
    /// `limit`, ordered by conversation id ascending.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_by_pair(
        &self,
        pair: ParticipantPair,
        limit: usize,
    ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>>;

    /// Create a new conversation with an empty message sequence and a
    /// store-assigned creation time.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create_conversation(
        &self,
        pair: ParticipantPair,
    ) -> StoreFuture<'_, SyncResult<Conversation>>;

    /// List conversations containing `user_id`, capped at `limit`.
    ///
    /// Ordering is by creation time descending; callers re-sort by last
    /// activity since the store cannot order by a nested message field.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>>;

    /// Atomically append a message and update `last_message` in the same
    /// operation, assigning the write-time timestamp.
    ///
    /// # Errors
    /// Returns [`crate::sync::core::SyncError::NotFound`] if the
    /// conversation does not exist,
    /// [`crate::sync::core::SyncError::Validation`] if the sender is not a
    /// participant, and a transport error if storage access fails.
    fn append_message(
        &self,
        conversation_id: ConversationId,
        draft: MessageDraft,
    ) -> StoreFuture<'_, SyncResult<Message>>;

    /// Subscribe to the live change feed.
    ///
    /// The receiver observes every change committed after this call;
    /// subscribe before the initial snapshot read to avoid missing events.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}
