//! Scripted in-memory assistant for tests and local development.

use super::{
    AssistantApi, AssistantError, ListOrder, MessageContent, MessageText, Run, Thread,
    ThreadMessage,
};
use crate::models::Role;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Remote operation names, used to inject failures and count calls.
pub const CREATE_THREAD: &str = "create_thread";
pub const CREATE_MESSAGE: &str = "create_message";
pub const CREATE_RUN: &str = "create_run";
pub const RETRIEVE_RUN: &str = "retrieve_run";
pub const LIST_MESSAGES: &str = "list_messages";

#[derive(Default)]
struct Script {
    next_thread: u32,
    run_statuses: VecDeque<String>,
    last_status: Option<String>,
    listed: Vec<ThreadMessage>,
    failing: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
    posted: Vec<(String, String)>,
    run_instructions: Vec<Option<String>>,
}

/// Assistant double that replays a scripted run status sequence and a fixed
/// message listing.
///
/// Each `retrieve_run` consumes the next scripted status; once the script is
/// exhausted the final status repeats.
pub struct ScriptedAssistant {
    script: Mutex<Script>,
}

impl Default for ScriptedAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                run_statuses: VecDeque::from(vec!["completed".to_string()]),
                ..Default::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Statuses returned by successive `retrieve_run` calls.
    pub fn with_run_statuses(self, statuses: &[&str]) -> Self {
        self.script().run_statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Messages returned by `list_messages`, newest first.
    pub fn with_messages(self, messages: Vec<ThreadMessage>) -> Self {
        self.script().listed = messages;
        self
    }

    /// Shortcut for a listing whose newest message is a one-part assistant reply.
    pub fn with_reply(self, text: &str) -> Self {
        self.with_messages(vec![assistant_message("msg_reply", &[text])])
    }

    /// Make an operation fail with a network error.
    pub fn failing(self, operation: &'static str) -> Self {
        self.script().failing.insert(operation);
        self
    }

    /// Number of times an operation was invoked.
    pub fn calls(&self, operation: &str) -> usize {
        self.script().calls.get(operation).copied().unwrap_or(0)
    }

    /// Total number of remote calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.script().calls.values().sum()
    }

    /// `(thread_id, content)` of every posted message.
    pub fn posted_messages(&self) -> Vec<(String, String)> {
        self.script().posted.clone()
    }

    /// Supplementary instructions passed to each started run.
    pub fn run_instructions(&self) -> Vec<Option<String>> {
        self.script().run_instructions.clone()
    }

    fn record(&self, operation: &'static str) -> Result<(), AssistantError> {
        let mut script = self.script();
        *script.calls.entry(operation).or_insert(0) += 1;

        if script.failing.contains(operation) {
            return Err(AssistantError::Network(format!(
                "scripted failure in {}",
                operation
            )));
        }
        Ok(())
    }
}

/// Build a listed assistant message from its text parts.
pub fn assistant_message(id: &str, parts: &[&str]) -> ThreadMessage {
    message(id, Role::Assistant, parts)
}

/// Build a listed user message from its text parts.
pub fn user_message(id: &str, parts: &[&str]) -> ThreadMessage {
    message(id, Role::User, parts)
}

fn message(id: &str, role: Role, parts: &[&str]) -> ThreadMessage {
    ThreadMessage {
        id: id.to_string(),
        role,
        content: parts
            .iter()
            .map(|p| MessageContent::Text {
                text: MessageText {
                    value: p.to_string(),
                },
            })
            .collect(),
    }
}

#[async_trait]
impl AssistantApi for ScriptedAssistant {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        self.record(CREATE_THREAD)?;
        let mut script = self.script();
        script.next_thread += 1;
        Ok(Thread {
            id: format!("thread_{}", script.next_thread),
        })
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage, AssistantError> {
        self.record(CREATE_MESSAGE)?;
        let mut script = self.script();
        script
            .posted
            .push((thread_id.to_string(), content.to_string()));
        let id = format!("msg_{}", script.posted.len());
        Ok(message(&id, role, &[content]))
    }

    async fn create_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
        additional_instructions: Option<&str>,
    ) -> Result<Run, AssistantError> {
        self.record(CREATE_RUN)?;
        let mut script = self.script();
        script
            .run_instructions
            .push(additional_instructions.map(str::to_string));
        Ok(Run {
            id: format!("run_{}", script.run_instructions.len()),
            status: "queued".to_string(),
            last_error: None,
        })
    }

    async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.record(RETRIEVE_RUN)?;
        let mut script = self.script();
        let status = match script.run_statuses.pop_front() {
            Some(status) => {
                script.last_status = Some(status.clone());
                status
            }
            None => script
                .last_status
                .clone()
                .unwrap_or_else(|| "completed".to_string()),
        };
        Ok(Run {
            id: run_id.to_string(),
            status,
            last_error: None,
        })
    }

    async fn list_messages(
        &self,
        _thread_id: &str,
        order: ListOrder,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, AssistantError> {
        self.record(LIST_MESSAGES)?;
        let script = self.script();
        let mut listed = script.listed.clone();
        if order == ListOrder::Asc {
            listed.reverse();
        }
        listed.truncate(limit as usize);
        Ok(listed)
    }
}
