//! Conversation repository: lookup, creation, and per-user listing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::sync::core::config::RepositoryConfig;
use crate::sync::core::conversation::{Conversation, ParticipantPair};
use crate::sync::core::errors::SyncResult;
use crate::sync::core::ids::{ConversationId, UserId};
use crate::sync::core::user::User;
use crate::sync::store::DocumentStore;

/// Repository over two-party conversation documents.
///
/// Creation carries no transactional uniqueness guard: two clients racing
/// to start the same conversation may both create one. That is a known
/// limitation of the backing store, not masked here; lookups reconcile by
/// preferring the lowest conversation id and logging the duplicate.
pub struct ConversationRepository {
    store: Arc<dyn DocumentStore>,
    config: RepositoryConfig,
}

impl ConversationRepository {
    /// Create a repository with the given page cap.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    /// Find the conversation for an unordered pair of users.
    ///
    /// Symmetric in its arguments: the pair is canonicalized before the
    /// store query.
    ///
    /// # Errors
    /// Returns a validation error for a self-pair, or a transport error if
    /// the store is unavailable.
    pub async fn find_by_participants(
        &self,
        a: UserId,
        b: UserId,
    ) -> SyncResult<Option<Conversation>> {
        let pair = ParticipantPair::new(a, b)?;
        // Cap at 2: one extra row is enough to detect a duplicate.
        let mut matches = self.store.find_by_pair(pair, 2).await?;
        if matches.len() > 1 {
            warn!(
                "duplicate conversations for pair ({}, {}); preferring lowest id",
                pair.lo(),
                pair.hi()
            );
        }

        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }

    /// Create a new conversation between two users.
    ///
    /// The new record has an empty message sequence, no last message, and
    /// a store-assigned creation time.
    ///
    /// # Errors
    /// Returns a validation error for a self-pair, or a transport error if
    /// the store is unavailable.
    pub async fn create(&self, a: &User, b: &User) -> SyncResult<Conversation> {
        let pair = ParticipantPair::new(a.id, b.id)?;
        let conversation = self.store.create_conversation(pair).await?;
        debug!("created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// The "start chat" flow: return the existing conversation for the
    /// pair, or create one.
    ///
    /// # Errors
    /// Returns a validation error for a self-pair, or a transport error if
    /// the store is unavailable.
    pub async fn find_or_create(&self, a: &User, b: &User) -> SyncResult<Conversation> {
        if let Some(existing) = self.find_by_participants(a.id, b.id).await? {
            return Ok(existing);
        }
        self.create(a, b).await
    }

    /// Point read of a conversation document.
    ///
    /// # Errors
    /// Returns a transport error if the store is unavailable.
    pub async fn get(&self, id: ConversationId) -> SyncResult<Option<Conversation>> {
        self.store.get_conversation(id).await
    }

    /// List conversations containing `user_id`, newest activity first.
    ///
    /// Capped at the configured page size; sorted client-side by
    /// `last_message` timestamp since the store cannot order by a nested
    /// message field.
    ///
    /// # Errors
    /// Returns a transport error if the store is unavailable.
    pub async fn list_for_user(&self, user_id: UserId) -> SyncResult<Vec<Conversation>> {
        let mut conversations = self
            .store
            .list_for_user(user_id, self.config.page_size)
            .await?;
        conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::core::errors::SyncError;
    use crate::sync::core::message::MessageDraft;
    use crate::sync::store::SqliteDocumentStore;

    async fn repository() -> (Arc<SqliteDocumentStore>, ConversationRepository) {
        let store = Arc::new(SqliteDocumentStore::in_memory().await.unwrap());
        let repository = ConversationRepository::new(store.clone(), RepositoryConfig::default());
        (store, repository)
    }

    fn user(name: &str) -> User {
        User::new(UserId::new(), name, format!("{name}@example.com"), "").unwrap()
    }

    #[tokio::test]
    async fn test_lookup_is_symmetric() {
        let (_, repository) = repository().await;
        let (a, b) = (user("alice"), user("bob"));
        let created = repository.create(&a, &b).await.unwrap();

        let forward = repository.find_by_participants(a.id, b.id).await.unwrap();
        let backward = repository.find_by_participants(b.id, a.id).await.unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, Some(created));
    }

    #[tokio::test]
    async fn test_create_then_find_has_exact_pair() {
        let (_, repository) = repository().await;
        let (a, b) = (user("alice"), user("bob"));
        repository.create(&a, &b).await.unwrap();

        let found = repository
            .find_by_participants(a.id, b.id)
            .await
            .unwrap()
            .unwrap();
        let expected = ParticipantPair::new(a.id, b.id).unwrap();
        assert_eq!(found.participants, expected);
    }

    #[tokio::test]
    async fn test_self_pair_rejected_before_store() {
        let (_, repository) = repository().await;
        let a = user("alice");
        let err = repository
            .find_by_participants(a.id, a.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_find_or_create_is_effectively_idempotent() {
        let (_, repository) = repository().await;
        let (a, b) = (user("alice"), user("bob"));

        let first = repository.find_or_create(&a, &b).await.unwrap();
        let second = repository.find_or_create(&b, &a).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_race_duplicates_resolve_to_lowest_id() {
        let (_, repository) = repository().await;
        let (a, b) = (user("alice"), user("bob"));

        // Two clients lose the find-then-create race; both records exist
        // and stay well-formed.
        let first = repository.create(&a, &b).await.unwrap();
        let second = repository.create(&b, &a).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.participants, second.participants);

        let winner = repository
            .find_by_participants(a.id, b.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(winner.id, first.id.min(second.id));
    }

    #[tokio::test]
    async fn test_list_orders_by_last_activity() {
        let (store, repository) = repository().await;
        let (a, b, c) = (user("alice"), user("bob"), user("carol"));

        let with_bob = repository.create(&a, &b).await.unwrap();
        let with_carol = repository.create(&a, &c).await.unwrap();

        // Messaging bob last moves that conversation to the top.
        let draft = MessageDraft::new(a.id, "hi carol").unwrap();
        store.append_message(with_carol.id, draft).await.unwrap();
        let draft = MessageDraft::new(a.id, "hi bob").unwrap();
        store.append_message(with_bob.id, draft).await.unwrap();

        let listed = repository.list_for_user(a.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, with_bob.id);
        assert_eq!(listed[1].id, with_carol.id);
    }

    #[tokio::test]
    async fn test_list_excludes_other_users() {
        let (_, repository) = repository().await;
        let (a, b, c) = (user("alice"), user("bob"), user("carol"));
        repository.create(&a, &b).await.unwrap();

        let listed = repository.list_for_user(c.id).await.unwrap();
        assert!(listed.is_empty());
    }
}
