//! Append-only message log per conversation.

use std::sync::Arc;

use tracing::debug;

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::{ConversationId, UserId};
use crate::sync::core::message::{Message, MessageDraft};
use crate::sync::store::DocumentStore;

/// Append log over conversation message sequences.
///
/// Appends are atomic at the store: the message sequence and the
/// conversation's `last_message` advance together or not at all. Within one
/// conversation, append order is the order every subscriber observes.
pub struct MessageLog {
    store: Arc<dyn DocumentStore>,
}

impl MessageLog {
    /// Create a log over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Append a message to a conversation.
    ///
    /// The store assigns the message id (time-ordered, collision-resistant
    /// under rapid sends) and the write-time timestamp.
    ///
    /// # Errors
    /// Returns a validation error for empty content or a sender outside
    /// the participant pair, and a hard not-found error if the
    /// conversation has no backing record.
    pub async fn append(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> SyncResult<Message> {
        let draft = MessageDraft::new(sender_id, content)?;
        let message = self.store.append_message(conversation_id, draft).await?;
        debug!(
            "appended message {} to conversation {conversation_id}",
            message.id
        );
        Ok(message)
    }

    /// The newest `limit` messages of a conversation, oldest first within
    /// the window.
    ///
    /// # Errors
    /// Returns a hard not-found error if the conversation has no backing
    /// record, or a transport error if the store is unavailable.
    pub async fn recent(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> SyncResult<Vec<Message>> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("conversation {conversation_id}")))?;

        let messages = conversation.messages;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }
}
