//! Conversation document and participant-pair canonicalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::{ConversationId, UserId};
use crate::sync::core::message::Message;

/// Canonically sorted pair of participant ids.
///
/// Sorting makes pair equality a deterministic lookup key: for any two
/// users A and B, `ParticipantPair::new(a, b) == ParticipantPair::new(b, a)`.
/// The constructor is the only way to build a pair, so an unsorted or
/// self-referential pair cannot exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantPair {
    /// Smaller participant id.
    lo: UserId,
    /// Larger participant id.
    hi: UserId,
}

impl ParticipantPair {
    /// Canonicalize two participant ids.
    ///
    /// # Errors
    /// Returns a validation error if both ids are the same user.
    pub fn new(a: UserId, b: UserId) -> SyncResult<Self> {
        if a == b {
            return Err(SyncError::Validation(
                "a conversation needs two distinct participants".to_string(),
            ));
        }

        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { lo, hi })
    }

    /// Smaller participant id.
    #[must_use]
    pub const fn lo(&self) -> UserId {
        self.lo
    }

    /// Larger participant id.
    #[must_use]
    pub const fn hi(&self) -> UserId {
        self.hi
    }

    /// Both ids in canonical order.
    #[must_use]
    pub const fn ids(&self) -> [UserId; 2] {
        [self.lo, self.hi]
    }

    /// Whether the given user is one of the participants.
    #[must_use]
    pub fn contains(&self, user_id: UserId) -> bool {
        self.lo == user_id || self.hi == user_id
    }

    /// The participant that is not `user_id`, if `user_id` is a member.
    #[must_use]
    pub fn other(&self, user_id: UserId) -> Option<UserId> {
        if self.lo == user_id {
            Some(self.hi)
        } else if self.hi == user_id {
            Some(self.lo)
        } else {
            None
        }
    }
}

/// A two-party conversation document.
///
/// The conversation owns its message sequence; messages are embedded in the
/// document, matching the remote store's single-document atomic update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Canonically sorted participant pair.
    pub participants: ParticipantPair,
    /// Append-only message sequence, oldest first.
    pub messages: Vec<Message>,
    /// Copy of the newest message, kept in lockstep with `messages`.
    pub last_message: Option<Message>,
    /// Creation time assigned by the store adapter.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Sort key for the conversation list: newest activity first.
    ///
    /// Conversations without messages fall back to their creation time.
    #[must_use]
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map_or(self.created_at, |m| m.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_symmetric() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(
            ParticipantPair::new(a, b).unwrap(),
            ParticipantPair::new(b, a).unwrap()
        );
    }

    #[test]
    fn test_pair_is_sorted() {
        let a = UserId::new();
        let b = UserId::new();
        let pair = ParticipantPair::new(a, b).unwrap();
        assert!(pair.lo() <= pair.hi());
    }

    #[test]
    fn test_self_pair_rejected() {
        let a = UserId::new();
        assert!(ParticipantPair::new(a, a).is_err());
    }

    #[test]
    fn test_other_participant() {
        let a = UserId::new();
        let b = UserId::new();
        let pair = ParticipantPair::new(a, b).unwrap();
        assert_eq!(pair.other(a), Some(b));
        assert_eq!(pair.other(b), Some(a));
        assert_eq!(pair.other(UserId::new()), None);
    }
}
