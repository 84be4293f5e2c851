//! Hosted assistant service abstraction.
//!
//! The relay only talks to the remote service through [`AssistantApi`], so
//! the HTTP client can be swapped for the scripted mock in tests.

pub mod mock;
pub mod openai;

use crate::models::Role;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use mock::ScriptedAssistant;
pub use openai::{OpenAiAssistantClient, OpenAiClientConfig};

/// Error type for remote assistant operations.
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by assistant service")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Client setup failed: {0}")]
    Setup(String),
}

/// A remote conversation thread.
#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: String,
}

/// Details the service attaches to a run that did not succeed.
#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// A remote unit of work producing the assistant's next message.
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,

    /// Raw status as reported by the service.
    pub status: String,

    #[serde(default)]
    pub last_error: Option<RunError>,
}

impl Run {
    pub fn classify(&self) -> RunStatus {
        RunStatus::from_remote(&self.status)
    }
}

/// Local view of a run's remote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Still queued or executing; keep polling.
    Pending,
    /// Finished and produced a message.
    Succeeded,
    /// Ended without a usable message.
    Failed,
}

impl RunStatus {
    pub fn from_remote(status: &str) -> Self {
        match status {
            "completed" => RunStatus::Succeeded,
            "failed" | "cancelled" | "expired" | "incomplete" => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }
}

/// Text payload of a content part.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageText {
    pub value: String,
}

/// One typed part of a thread message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: MessageText },
    /// Images, refusals and anything newer than this client.
    #[serde(other)]
    Unsupported,
}

/// A message stored on a remote thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// All text parts of this message joined in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                MessageContent::Text { text } => Some(text.value.as_str()),
                MessageContent::Unsupported => None,
            })
            .collect()
    }
}

/// Listing order for thread messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Asc,
    Desc,
}

impl ListOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListOrder::Asc => "asc",
            ListOrder::Desc => "desc",
        }
    }
}

/// Operations consumed from the hosted assistant service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Start a new, empty conversation thread.
    async fn create_thread(&self) -> Result<Thread, AssistantError>;

    /// Append a message to a thread.
    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage, AssistantError>;

    /// Run an assistant over the thread. `additional_instructions` apply to
    /// this run only and are layered on the assistant's stored instructions.
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        additional_instructions: Option<&str>,
    ) -> Result<Run, AssistantError>;

    /// Re-read a run's current state.
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    /// List up to `limit` messages of a thread in the given order.
    async fn list_messages(
        &self,
        thread_id: &str,
        order: ListOrder,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, AssistantError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_remote_statuses() {
        assert_eq!(RunStatus::from_remote("completed"), RunStatus::Succeeded);
        for status in ["failed", "cancelled", "expired", "incomplete"] {
            assert_eq!(RunStatus::from_remote(status), RunStatus::Failed);
        }
        for status in ["queued", "in_progress", "requires_action", "cancelling"] {
            assert_eq!(RunStatus::from_remote(status), RunStatus::Pending);
        }
    }

    #[test]
    fn message_text_skips_non_text_parts() {
        let message: ThreadMessage = serde_json::from_value(json!({
            "id": "msg_1",
            "object": "thread.message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": {"value": "Part one. ", "annotations": []}},
                {"type": "image_file", "image_file": {"file_id": "file_1"}},
                {"type": "text", "text": {"value": "Part two.", "annotations": []}}
            ]
        }))
        .unwrap();

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "Part one. Part two.");
    }
}
