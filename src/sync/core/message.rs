//! Message model with draft validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::{MessageId, UserId};

/// A message appended to a conversation. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier (time-ordered).
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message body, stored trimmed.
    pub content: String,
    /// Write time assigned by the store adapter.
    pub timestamp: DateTime<Utc>,
}

/// A validated message body awaiting a store-assigned id and timestamp.
#[derive(Clone, Debug)]
pub struct MessageDraft {
    /// Author of the message.
    pub sender_id: UserId,
    /// Trimmed, non-empty message body.
    pub content: String,
}

impl MessageDraft {
    /// Validate a message body before any store call.
    ///
    /// # Errors
    /// Returns a validation error if the content is empty after trimming.
    pub fn new(sender_id: UserId, content: impl Into<String>) -> SyncResult<Self> {
        let content = content.into();
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Validation(
                "message content is empty".to_string(),
            ));
        }

        Ok(Self {
            sender_id,
            content: trimmed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_trims_content() {
        let draft = MessageDraft::new(UserId::new(), "  hello \n").unwrap();
        assert_eq!(draft.content, "hello");
    }

    #[test]
    fn test_empty_content_rejected() {
        assert!(MessageDraft::new(UserId::new(), "   \t\n").is_err());
    }
}
