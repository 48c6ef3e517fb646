//! Session Management
//!
//! Ephemeral server-side bookkeeping for conversations that call tools.
//! Sessions are never persisted and never required: calls naming an unknown
//! session still execute.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use agent_core::ConversationContext;
use chrono::{DateTime, Utc};

/// A registered conversation
#[derive(Clone, Debug)]
pub struct Session {
    pub context: ConversationContext,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(context: ConversationContext) -> Self {
        let now = Utc::now();
        Self {
            context,
            created_at: now,
            last_activity: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Session store trait
pub trait SessionStore: Send + Sync {
    /// Register a session under its context's id, replacing any previous one
    fn create(&self, context: ConversationContext) -> String;

    fn get(&self, id: &str) -> Option<Session>;

    /// Mark a session active. Returns `false` for unknown ids.
    fn touch(&self, id: &str) -> bool;

    /// Returns `false` for unknown ids
    fn delete(&self, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, context: ConversationContext) -> String {
        let id = context.session_id.to_string();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(id.clone(), Session::new(context));
        id
    }

    fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(id).cloned()
    }

    fn touch(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.get_mut(id).map(Session::touch).is_some()
    }

    fn delete(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let store = MemorySessionStore::new();
        let context = ConversationContext::new("hello");
        let expected = context.session_id.to_string();

        let id = store.create(context);
        assert_eq!(id, expected);
        assert_eq!(store.len(), 1);

        let before = store.get(&id).unwrap().last_activity;
        assert!(store.touch(&id));
        assert!(store.get(&id).unwrap().last_activity >= before);

        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(!store.touch(&id));
        assert!(store.is_empty());
    }
}
