//! Per-visitor chat context kept in the server-side web session.

use super::message::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tower_sessions::Session;

/// Session key under which the chat context is stored.
pub const CHAT_SESSION_KEY: &str = "chat";

/// A visitor's conversation: the remote thread it is bound to and the
/// messages exchanged so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Thread handle issued by the assistant service. Never changes once set.
    pub thread_id: String,

    /// Messages in the order they were exchanged.
    pub history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            history: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.history.push(ChatMessage::new(role, text));
    }

    /// Read the chat context from the web session, if one was started.
    pub async fn load(session: &Session) -> Result<Option<Self>, AppError> {
        session
            .get::<Self>(CHAT_SESSION_KEY)
            .await
            .map_err(|e| AppError::SessionError(e.to_string()))
    }

    /// Write the chat context back to the web session.
    pub async fn store(&self, session: &Session) -> Result<(), AppError> {
        session
            .insert(CHAT_SESSION_KEY, self)
            .await
            .map_err(|e| AppError::SessionError(e.to_string()))
    }

    /// Forget the chat context. The next visit starts a fresh thread; any run
    /// still executing remotely is left alone.
    pub async fn clear(session: &Session) -> Result<(), AppError> {
        session
            .remove::<Self>(CHAT_SESSION_KEY)
            .await
            .map(|_| ())
            .map_err(|e| AppError::SessionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_preserves_order() {
        let mut chat = ChatSession::new("thread_1");
        chat.push(Role::User, "hello");
        chat.push(Role::Assistant, "hi there");

        let roles: Vec<Role> = chat.history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(chat.history[1].text, "hi there");
    }

    #[test]
    fn stored_shape_uses_lowercase_roles() {
        let mut chat = ChatSession::new("thread_1");
        chat.push(Role::User, "hello");

        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["history"][0]["role"], "user");

        let back: ChatSession = serde_json::from_value(json).unwrap();
        assert_eq!(back.thread_id, "thread_1");
        assert_eq!(back.history[0].text, "hello");
    }
}
