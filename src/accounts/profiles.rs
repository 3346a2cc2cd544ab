//! Profile lifecycle: sign-up and profile edits.

use std::sync::Arc;

use tracing::info;

use crate::accounts::auth::AuthProvider;
use crate::accounts::blob::BlobStorage;
use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::UserId;
use crate::sync::core::user::User;
use crate::sync::resolver::IdentityResolver;
use crate::sync::store::DocumentStore;

/// Avatar shown for accounts that never uploaded one.
pub const DEFAULT_AVATAR_URL: &str = "https://placehold.co/100x100/947EC5/FFFFFF";

/// An avatar image supplied during sign-up or a profile edit.
#[derive(Clone, Debug)]
pub struct AvatarUpload {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// MIME type of the image.
    pub content_type: String,
}

/// Requested changes to an existing profile. `None` fields keep their
/// current value.
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New avatar image.
    pub avatar: Option<AvatarUpload>,
}

/// Orchestrates account registration and profile edits across the auth
/// backend, blob storage, and the document store.
pub struct ProfileService {
    auth: Arc<dyn AuthProvider>,
    blobs: Arc<dyn BlobStorage>,
    store: Arc<dyn DocumentStore>,
    resolver: Arc<IdentityResolver>,
}

impl ProfileService {
    /// Wire the service to its backends.
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        blobs: Arc<dyn BlobStorage>,
        store: Arc<dyn DocumentStore>,
        resolver: Arc<IdentityResolver>,
    ) -> Self {
        Self {
            auth,
            blobs,
            store,
            resolver,
        }
    }

    /// Register a new account and create its profile document.
    ///
    /// The avatar is uploaded first when provided; otherwise the profile
    /// points at the shared placeholder image. The new profile is written
    /// through to the resolver cache so the first snapshot containing this
    /// user resolves without a store read.
    ///
    /// # Errors
    /// Propagates auth rejections (malformed credentials, duplicate email),
    /// avatar upload failures, and store write failures.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
        avatar: Option<AvatarUpload>,
    ) -> SyncResult<User> {
        let principal = self.auth.sign_up(email, password).await?;

        let avatar_url = match avatar {
            Some(upload) => self.upload_avatar(principal.user_id, upload).await?,
            None => DEFAULT_AVATAR_URL.to_string(),
        };

        let user = User::new(principal.user_id, name, principal.email, avatar_url)?;
        self.store.put_user(&user).await?;
        self.resolver.insert(user.clone());
        info!("created profile for {}", user.id);
        Ok(user)
    }

    /// Fetch a profile document by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn profile(&self, user_id: UserId) -> SyncResult<Option<User>> {
        self.store.get_user(user_id).await
    }

    /// Apply a profile edit and broadcast the change.
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] if no profile exists for `user_id`,
    /// and propagates upload and store failures.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> SyncResult<User> {
        let current = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("no profile for user {user_id}")))?;

        let avatar_url = match update.avatar {
            Some(upload) => self.upload_avatar(user_id, upload).await?,
            None => current.avatar_url,
        };
        let name = update.name.unwrap_or(current.name);

        let user = User::new(user_id, name, current.email, avatar_url)?;
        self.store.put_user(&user).await?;
        self.resolver.insert(user.clone());
        self.auth.notify_profile_changed(user_id);
        Ok(user)
    }

    async fn upload_avatar(&self, user_id: UserId, upload: AvatarUpload) -> SyncResult<String> {
        let key = format!("avatars/{user_id}");
        self.blobs
            .put(&key, upload.bytes, &upload.content_type)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::auth::{AuthEvent, StaticAuthProvider};
    use crate::accounts::blob::MemoryBlobStorage;
    use crate::sync::store::SqliteDocumentStore;

    struct Fixture {
        service: ProfileService,
        auth: Arc<StaticAuthProvider>,
        store: Arc<SqliteDocumentStore>,
    }

    async fn fixture() -> Fixture {
        let auth = Arc::new(StaticAuthProvider::new());
        let blobs = Arc::new(MemoryBlobStorage::new());
        let store = Arc::new(SqliteDocumentStore::in_memory().await.unwrap());
        let resolver = Arc::new(IdentityResolver::new(store.clone()));
        let service = ProfileService::new(auth.clone(), blobs, store.clone(), resolver);
        Fixture {
            service,
            auth,
            store,
        }
    }

    #[tokio::test]
    async fn test_sign_up_without_avatar_uses_placeholder() {
        let fx = fixture().await;
        let user = fx
            .service
            .sign_up("Alice", "alice@example.com", "secret1", None)
            .await
            .unwrap();

        assert_eq!(user.avatar_url, DEFAULT_AVATAR_URL);
        assert_eq!(fx.store.get_user(user.id).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_sign_up_uploads_avatar() {
        let fx = fixture().await;
        let avatar = AvatarUpload {
            bytes: vec![0xFF, 0xD8],
            content_type: "image/jpeg".to_string(),
        };
        let user = fx
            .service
            .sign_up("Alice", "alice@example.com", "secret1", Some(avatar))
            .await
            .unwrap();

        assert_eq!(user.avatar_url, format!("memory://avatars/{}", user.id));
    }

    #[tokio::test]
    async fn test_sign_up_seeds_resolver_cache() {
        let fx = fixture().await;
        let user = fx
            .service
            .sign_up("Alice", "alice@example.com", "secret1", None)
            .await
            .unwrap();

        assert_eq!(fx.service.resolver.cached(user.id), Some(user));
    }

    #[tokio::test]
    async fn test_update_profile_changes_name_and_notifies() {
        let fx = fixture().await;
        let user = fx
            .service
            .sign_up("Alice", "alice@example.com", "secret1", None)
            .await
            .unwrap();
        let mut events = fx.auth.events();

        let update = ProfileUpdate {
            name: Some("Alicia".to_string()),
            avatar: None,
        };
        let updated = fx.service.update_profile(user.id, update).await.unwrap();

        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.avatar_url, user.avatar_url);
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::ProfileChanged(user.id)
        );
    }

    #[tokio::test]
    async fn test_signup_then_first_message_flow() {
        use crate::sync::core::config::RepositoryConfig;
        use crate::sync::log::MessageLog;
        use crate::sync::repository::ConversationRepository;

        let fx = fixture().await;
        let alice = fx
            .service
            .sign_up("Alice", "alice@example.com", "secret1", None)
            .await
            .unwrap();
        let bob = fx
            .service
            .sign_up("Bob", "bob@example.com", "secret2", None)
            .await
            .unwrap();

        let repository =
            ConversationRepository::new(fx.store.clone(), RepositoryConfig::default());
        let conversation = repository.find_or_create(&alice, &bob).await.unwrap();
        assert!(conversation.participants.contains(alice.id));
        assert!(conversation.participants.contains(bob.id));

        let log = MessageLog::new(fx.store.clone());
        let message = log.append(conversation.id, alice.id, "hello").await.unwrap();
        assert_eq!(message.sender_id, alice.id);

        let fetched = repository.get(conversation.id).await.unwrap().unwrap();
        assert_eq!(fetched.messages.len(), 1);
        assert_eq!(fetched.messages[0].content, "hello");
        assert_eq!(fetched.last_message, Some(message));
    }

    #[tokio::test]
    async fn test_update_unknown_profile_fails() {
        let fx = fixture().await;
        let err = fx
            .service
            .update_profile(UserId::new(), ProfileUpdate::default())
            .await;
        assert!(matches!(err, Err(SyncError::NotFound(_))));
    }
}
