//! Session registry - one live connection per user.
//!
//! The registry only records the binding. Notifying and closing an evicted
//! connection is left to the API layer, which receives the evicted id from
//! [`SessionRegistry::bind`].

use arena_domain::{ConnectionId, UserId};
use dashmap::DashMap;

#[derive(Default)]
pub struct SessionRegistry {
    bindings: DashMap<UserId, ConnectionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `connection_id`, newest connection wins.
    ///
    /// Returns the previously bound connection when it differs from the new
    /// one. The caller evicts exactly that connection, never the new one.
    pub fn bind(&self, user_id: UserId, connection_id: ConnectionId) -> Option<ConnectionId> {
        let previous = self.bindings.insert(user_id, connection_id);
        match previous {
            Some(old) if old != connection_id => {
                tracing::info!(
                    user_id = %user_id,
                    old_connection_id = %old,
                    connection_id = %connection_id,
                    "Session replaced"
                );
                Some(old)
            }
            _ => {
                tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Session bound");
                None
            }
        }
    }

    /// Remove the binding if it still points at `connection_id`.
    ///
    /// Returns false when the user has already been rebound to a newer
    /// connection (the caller is a superseded session).
    pub fn unbind(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = self
            .bindings
            .remove_if(&user_id, |_, bound| *bound == connection_id)
            .is_some();
        if removed {
            tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Session unbound");
        }
        removed
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionId> {
        self.bindings.get(&user_id).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_bind_evicts_nothing() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let conn = ConnectionId::new();

        assert_eq!(registry.bind(user, conn), None);
        assert_eq!(registry.lookup(user), Some(conn));
    }

    #[test]
    fn rebind_returns_only_the_old_connection() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        registry.bind(user, old);
        assert_eq!(registry.bind(user, new), Some(old));
        assert_eq!(registry.lookup(user), Some(new));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rebinding_the_same_connection_is_not_an_eviction() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let conn = ConnectionId::new();

        registry.bind(user, conn);
        assert_eq!(registry.bind(user, conn), None);
    }

    #[test]
    fn superseded_connection_cannot_unbind_new_session() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        registry.bind(user, old);
        registry.bind(user, new);

        assert!(!registry.unbind(user, old));
        assert_eq!(registry.lookup(user), Some(new));

        assert!(registry.unbind(user, new));
        assert!(registry.is_empty());
    }
}
