//! Account subsystem: authentication, blob storage, and profile flows.
//!
//! - `auth`: Identity backend contract, session events, in-process provider
//! - `blob`: Avatar blob storage contract and in-process implementation
//! - `profiles`: Sign-up and profile-edit orchestration

pub mod auth;
pub mod blob;
pub mod profiles;

pub use auth::{AuthEvent, AuthProvider, Principal, StaticAuthProvider};
pub use blob::{BlobStorage, MemoryBlobStorage};
pub use profiles::{AvatarUpload, DEFAULT_AVATAR_URL, ProfileService, ProfileUpdate};
