//! User profile record.
//!
//! User objects are referenced by id from conversations and messages; the
//! copies attached to a snapshot are a read-side cache populated by the
//! identity resolver, never the source of truth.

use serde::{Deserialize, Serialize};

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::UserId;

/// A user profile document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Immutable account identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Publicly resolvable avatar URL.
    pub avatar_url: String,
}

impl User {
    /// Create a validated user record.
    ///
    /// # Errors
    /// Returns a validation error if the name or email is empty after
    /// trimming.
    pub fn new(
        id: UserId,
        name: impl Into<String>,
        email: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> SyncResult<Self> {
        let name = name.into().trim().to_string();
        let email = email.into().trim().to_string();
        if name.is_empty() {
            return Err(SyncError::Validation("user name is empty".to_string()));
        }
        if email.is_empty() {
            return Err(SyncError::Validation("user email is empty".to_string()));
        }

        Ok(Self {
            id,
            name,
            email,
            avatar_url: avatar_url.into(),
        })
    }
}
