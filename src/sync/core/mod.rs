//! Core types and identifiers for the synchronization core.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;
pub mod user;

pub use config::{
    CoordinatorConfig, RedactionConfig, RedactionMode, RepositoryConfig, StorageConfig, SyncConfig,
};
pub use conversation::{Conversation, ParticipantPair};
pub use errors::{SyncError, SyncResult};
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{Message, MessageDraft};
pub use user::User;
