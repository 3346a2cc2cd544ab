//! Authentication provider contract.
//!
//! The synchronization core never talks to an identity backend directly; it
//! observes the provider's event feed and asks for the current principal.
//! [`StaticAuthProvider`] is the embeddable implementation used by local
//! deployments and tests.

use std::sync::RwLock;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::UserId;
use crate::sync::store::StoreFuture;

/// Capacity of the auth event feed.
const EVENT_CAPACITY: usize = 16;

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 6;

/// The authenticated identity behind a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Account identifier, shared with the user's profile document.
    pub user_id: UserId,
    /// Sign-in email.
    pub email: String,
}

/// Session lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    /// A principal signed in (including immediately after sign-up).
    SignedIn(Principal),
    /// The current principal signed out.
    SignedOut,
    /// A profile document changed; cached copies should be refreshed.
    ProfileChanged(UserId),
}

/// Identity backend abstraction.
pub trait AuthProvider: Send + Sync {
    /// Register a new account and sign it in.
    ///
    /// # Errors
    /// Returns a validation error for a malformed email or short password,
    /// and a conflict error if the email is already registered.
    fn sign_up(&self, email: &str, password: &str) -> StoreFuture<'_, SyncResult<Principal>>;

    /// Sign in with existing credentials.
    ///
    /// # Errors
    /// Returns a validation error if the credentials do not match.
    fn sign_in(&self, email: &str, password: &str) -> StoreFuture<'_, SyncResult<Principal>>;

    /// Sign out the current principal. No-op when nobody is signed in.
    fn sign_out(&self) -> StoreFuture<'_, SyncResult<()>>;

    /// The currently signed-in principal, if any.
    fn current(&self) -> Option<Principal>;

    /// Publish a profile-change notification on the event feed.
    fn notify_profile_changed(&self, user_id: UserId);

    /// Subscribe to session lifecycle events.
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

struct Account {
    user_id: UserId,
    password: String,
}

/// In-process credential store.
///
/// Accounts live only in memory and passwords are held verbatim; this
/// provider backs local deployments and tests, not hosted identity.
pub struct StaticAuthProvider {
    accounts: DashMap<String, Account>,
    session: RwLock<Option<Principal>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for StaticAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticAuthProvider {
    /// Create an empty provider with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: DashMap::new(),
            session: RwLock::new(None),
            events,
        }
    }

    fn validate_credentials(email: &str, password: &str) -> SyncResult<String> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(SyncError::Validation("malformed email address".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(SyncError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(email)
    }

    fn set_session(&self, principal: Principal) {
        if let Ok(mut session) = self.session.write() {
            *session = Some(principal.clone());
        }
        let _ = self.events.send(AuthEvent::SignedIn(principal));
    }
}

impl AuthProvider for StaticAuthProvider {
    fn sign_up(&self, email: &str, password: &str) -> StoreFuture<'_, SyncResult<Principal>> {
        let email = email.to_string();
        let password = password.to_string();
        Box::pin(async move {
            let email = Self::validate_credentials(&email, &password)?;
            if self.accounts.contains_key(&email) {
                return Err(SyncError::Conflict(format!(
                    "account {email} already exists"
                )));
            }

            let user_id = UserId::new();
            self.accounts.insert(
                email.clone(),
                Account {
                    user_id,
                    password,
                },
            );
            info!("registered account {email} as {user_id}");

            let principal = Principal { user_id, email };
            self.set_session(principal.clone());
            Ok(principal)
        })
    }

    fn sign_in(&self, email: &str, password: &str) -> StoreFuture<'_, SyncResult<Principal>> {
        let email = email.trim().to_ascii_lowercase();
        let password = password.to_string();
        Box::pin(async move {
            let Some(account) = self.accounts.get(&email) else {
                return Err(SyncError::Validation("invalid credentials".to_string()));
            };
            if account.password != password {
                return Err(SyncError::Validation("invalid credentials".to_string()));
            }

            let principal = Principal {
                user_id: account.user_id,
                email: email.clone(),
            };
            drop(account);
            self.set_session(principal.clone());
            Ok(principal)
        })
    }

    fn sign_out(&self) -> StoreFuture<'_, SyncResult<()>> {
        Box::pin(async move {
            let signed_in = self
                .session
                .write()
                .map_or(false, |mut session| session.take().is_some());
            if signed_in {
                let _ = self.events.send(AuthEvent::SignedOut);
            }
            Ok(())
        })
    }

    fn current(&self) -> Option<Principal> {
        self.session.read().ok().and_then(|session| session.clone())
    }

    fn notify_profile_changed(&self, user_id: UserId) {
        let _ = self.events.send(AuthEvent::ProfileChanged(user_id));
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
