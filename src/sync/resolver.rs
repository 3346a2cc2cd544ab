//! Identity resolution with an instance-owned cache.
//!
//! Resolves user ids to profile records. Cache misses fan out in parallel
//! and a single failed fetch never fails the batch: callers get partial
//! results and decide whether partial population is acceptable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::sync::core::ids::UserId;
use crate::sync::core::user::User;
use crate::sync::store::DocumentStore;

/// Resolver mapping user ids to cached profile records.
///
/// The cache is owned by the resolver instance and injected at
/// construction, never a module-level singleton. It is append-mostly:
/// entries are added or overwritten within a session, never deleted, so
/// atomic map insertion is the only synchronization needed (last write
/// wins on concurrent profile updates).
pub struct IdentityResolver {
    store: Arc<dyn DocumentStore>,
    cache: DashMap<UserId, User>,
}

impl IdentityResolver {
    /// Create a resolver with an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Resolve a batch of user ids to profile records.
    ///
    /// Duplicates in the input are collapsed. Ids with no backing record
    /// are absent from the output, not errors; failed fetches are logged
    /// and the partial result returned.
    pub async fn resolve(&self, ids: &[UserId]) -> HashMap<UserId, User> {
        let unique: HashSet<UserId> = ids.iter().copied().collect();
        let mut resolved = HashMap::with_capacity(unique.len());
        let mut misses = Vec::new();

        for id in unique {
            match self.cache.get(&id) {
                Some(user) => {
                    resolved.insert(id, user.clone());
                }
                None => misses.push(id),
            }
        }

        if misses.is_empty() {
            return resolved;
        }

        debug!("resolving {} uncached user id(s)", misses.len());
        let fetches = misses.iter().map(|id| self.store.get_user(*id));
        for (id, result) in misses.iter().zip(join_all(fetches).await) {
            match result {
                Ok(Some(user)) => {
                    self.cache.insert(*id, user.clone());
                    resolved.insert(*id, user);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("failed to resolve user {id}: {err}");
                }
            }
        }

        resolved
    }

    /// Non-fetching cache peek.
    #[must_use]
    pub fn cached(&self, id: UserId) -> Option<User> {
        self.cache.get(&id).map(|user| user.clone())
    }

    /// Write-through after a profile create/update.
    pub fn insert(&self, user: User) {
        self.cache.insert(user.id, user);
    }

    /// Number of cached profiles.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
