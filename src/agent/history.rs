//! Conversation history management
//!
//! [`SessionHistory`] is the in-process store of session transcripts.
//! [`Transcript`] is a run's working memory on top of it: every message is
//! checked before it is kept, and only session-backed transcripts write
//! through to the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::{Message, PendingCalls, Result, Role, TenxError};

/// Session id used when a run does not name one
pub const DEFAULT_SESSION: &str = "default";

/// Session-keyed message store, shared by cloning
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    sessions: Arc<Mutex<HashMap<String, Vec<Message>>>>,
}

impl SessionHistory {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Vec<Message>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a session's messages, seeding it with `init` on first access
    pub fn read_or_init(&self, session_id: &str, init: impl FnOnce() -> Message) -> Vec<Message> {
        let mut sessions = self.sessions();
        let messages = sessions.entry(session_id.to_string()).or_default();
        if messages.is_empty() {
            messages.push(init());
        }
        messages.clone()
    }

    /// Append one message to a session opened by [`read_or_init`]
    ///
    /// Unknown sessions are refused so that a session's first message is
    /// always its system message.
    ///
    /// [`read_or_init`]: SessionHistory::read_or_init
    pub fn append(&self, session_id: &str, message: Message) -> Result<()> {
        message.validate()?;
        match self.sessions().get_mut(session_id) {
            Some(messages) if !messages.is_empty() => {
                messages.push(message);
                Ok(())
            }
            _ => Err(TenxError::invalid_message(format!(
                "session '{session_id}' has not been opened"
            ))),
        }
    }

    /// Copy of a session's messages, empty when unknown
    pub fn read(&self, session_id: &str) -> Vec<Message> {
        self.sessions().get(session_id).cloned().unwrap_or_default()
    }

    /// Check if a session exists
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    /// Get message count for a session
    pub fn len(&self, session_id: &str) -> usize {
        self.sessions().get(session_id).map_or(0, Vec::len)
    }

    /// Drop a session; returns whether it existed
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions().remove(session_id).is_some()
    }

    /// Known session ids, sorted
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Working memory of one run
#[derive(Debug)]
pub struct Transcript {
    messages: Vec<Message>,
    pending: PendingCalls,
    session: Option<(SessionHistory, String)>,
}

impl Transcript {
    /// Transcript backed by a stored session
    pub fn persistent(
        store: &SessionHistory,
        session_id: &str,
        system: impl FnOnce() -> Message,
    ) -> Result<Self> {
        let messages = store.read_or_init(session_id, system);
        let pending = Self::replay(&messages)?;
        Ok(Self {
            messages,
            pending,
            session: Some((store.clone(), session_id.to_string())),
        })
    }

    /// Transcript over caller-supplied history, never persisted
    ///
    /// A system message is put in front when the history does not start
    /// with one.
    pub fn ephemeral(mut history: Vec<Message>, system: impl FnOnce() -> Message) -> Result<Self> {
        if history.first().map(|m| m.role) != Some(Role::System) {
            history.insert(0, system());
        }
        let pending = Self::replay(&history)?;
        Ok(Self {
            messages: history,
            pending,
            session: None,
        })
    }

    fn replay(messages: &[Message]) -> Result<PendingCalls> {
        let mut pending = PendingCalls::default();
        for message in messages {
            pending.accept(message)?;
        }
        Ok(pending)
    }

    /// Check and keep a message, writing it through to the session if any
    pub fn push(&mut self, message: Message) -> Result<()> {
        self.pending.accept(&message)?;
        if let Some((store, session_id)) = &self.session {
            store.append(session_id, message.clone())?;
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether pushes reach the session store
    pub fn is_persistent(&self) -> bool {
        self.session.is_some()
    }
}
