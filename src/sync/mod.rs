//! Conversation synchronization subsystem.
//!
//! This module keeps a local view of two-party conversations in lockstep
//! with a remote document store, organized into:
//! - `core`: Configuration, errors, IDs, users, messages, and conversations
//! - `store`: Document store abstraction with a SQLite backend
//! - `resolver`: Cached participant-identity resolution
//! - `repository`: Conversation lookup, creation, and listing
//! - `log`: Message append and retrieval
//! - `coordinator`: Live subscriptions over the change feed

pub mod coordinator;
pub mod core;
pub mod log;
pub mod repository;
pub mod resolver;
pub mod store;

// Re-export commonly used types for convenience
pub use coordinator::{
    ConversationView, ListSnapshot, LiveSyncCoordinator, SubscriptionHandle, SubscriptionState,
};
pub use self::core::{
    Conversation, ConversationId, CoordinatorConfig, Message, MessageDraft, MessageId,
    ParticipantPair, RedactionConfig, RedactionMode, RepositoryConfig, StorageConfig, SyncConfig,
    SyncError, SyncResult, User, UserId,
};
pub use log::MessageLog;
pub use repository::ConversationRepository;
pub use resolver::IdentityResolver;
pub use store::{DocumentStore, SqliteDocumentStore, StoreChange, StoreChangeKind, StoreFuture};
