//! Chat relay: turns one visitor question into a remote run and its reply.
//!
//! Per question the relay moves through `Submitted -> Running ->
//! {Completed, Failed, TimedOut}` and always hands back something printable.
//! Remote faults are folded into the reply text; only session creation and a
//! busy thread surface as [`RelayError`].

use super::assistant::{AssistantApi, AssistantError, ListOrder, Run, RunStatus};
use super::metrics::{RELAY_CYCLES_TOTAL, RELAY_CYCLE_DURATION_SECONDS, RELAY_RUN_POLLS};
use crate::models::{ChatSession, Role};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Shown when a completed run left no assistant text on the thread.
pub const NO_REPLY_TEXT: &str = "No reply received. Please try again.";

/// Errors that stop a relay cycle before a reply can be produced.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Could not create thread: {0}")]
    SessionCreation(#[source] AssistantError),

    #[error("A question is already being answered in this conversation")]
    Busy,
}

/// Bounded polling schedule for run status reads.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Wait before the second status read.
    pub initial_interval: Duration,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
    /// Growth factor applied after every wait.
    pub multiplier: f64,
    /// Total time a run may stay pending before the cycle gives up.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(400),
            max_interval: Duration::from_secs(4),
            multiplier: 1.5,
            timeout: Duration::from_secs(180),
        }
    }
}

impl PollPolicy {
    /// Wait schedule for one run. Yields `None` once the timeout has elapsed.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(self.timeout))
            .build()
    }
}

/// Per-deployment relay behavior.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub assistant_id: String,
    /// Extra instructions layered onto every run; never persisted remotely.
    pub instructions: Option<String>,
    pub poll: PollPolicy,
    /// How many newest messages to inspect when looking for the reply.
    pub reply_page_size: u32,
}

impl RelayConfig {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            instructions: None,
            poll: PollPolicy::default(),
            reply_page_size: 10,
        }
    }
}

/// How a run ended from the relay's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Terminal non-success; `status` is the service's own status word.
    Failed { status: String },
    /// Still pending when the poll policy's timeout elapsed.
    TimedOut { waited: Duration },
}

/// Result of polling plus the number of status reads it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub outcome: RunOutcome,
    pub polls: u32,
}

/// Classification of the text handed back to the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Answer,
    NoReply,
    RunFailed,
    TimedOut,
    TransportError,
}

impl ReplyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyKind::Answer => "answer",
            ReplyKind::NoReply => "no_reply",
            ReplyKind::RunFailed => "run_failed",
            ReplyKind::TimedOut => "timed_out",
            ReplyKind::TransportError => "transport_error",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, ReplyKind::Answer)
    }
}

/// What the visitor sees for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReply {
    pub kind: ReplyKind,
    pub text: String,
}

impl RelayReply {
    fn answer(text: String) -> Self {
        Self {
            kind: ReplyKind::Answer,
            text,
        }
    }

    fn no_reply() -> Self {
        Self {
            kind: ReplyKind::NoReply,
            text: NO_REPLY_TEXT.to_string(),
        }
    }

    fn run_failed(status: &str) -> Self {
        Self {
            kind: ReplyKind::RunFailed,
            text: format!("Sorry, the assistant run ended with status: **{}**.", status),
        }
    }

    fn timed_out(waited: Duration) -> Self {
        Self {
            kind: ReplyKind::TimedOut,
            text: format!(
                "Sorry, the assistant did not finish within {} seconds. Please try again.",
                waited.as_millis().div_ceil(1000)
            ),
        }
    }

    fn transport(err: &AssistantError) -> Self {
        Self {
            kind: ReplyKind::TransportError,
            text: format!("Error talking to assistant: `{}`", err),
        }
    }
}

/// Marks a thread as busy until dropped.
struct InFlightGuard<'a> {
    set: &'a DashSet<String>,
    thread_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.thread_id);
    }
}

/// Bridges the synchronous chat page to the run-based assistant API.
pub struct ChatRelay {
    api: Arc<dyn AssistantApi>,
    config: RelayConfig,
    in_flight: DashSet<String>,
    /// Threads reset by their visitor while a cycle was still running.
    retired: DashSet<String>,
}

impl ChatRelay {
    pub fn new(api: Arc<dyn AssistantApi>, config: RelayConfig) -> Self {
        Self {
            api,
            config,
            in_flight: DashSet::new(),
            retired: DashSet::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Record that a visitor dropped this thread. A cycle still running on it
    /// keeps going remotely, but its result must not be written back.
    pub fn retire(&self, thread_id: &str) {
        if self.in_flight.contains(thread_id) {
            tracing::info!(thread_id, "Thread reset while a run is in flight");
            self.retired.insert(thread_id.to_string());
        }
    }

    /// Whether the thread was retired during its last cycle. Clears the mark.
    pub fn take_retired(&self, thread_id: &str) -> bool {
        self.retired.remove(thread_id).is_some()
    }

    /// Bind the visitor to a remote thread, creating one on first contact.
    pub async fn ensure_session<'s>(
        &self,
        slot: &'s mut Option<ChatSession>,
    ) -> Result<&'s mut ChatSession, RelayError> {
        let session = match slot.take() {
            Some(existing) => existing,
            None => {
                let thread = self.api.create_thread().await.map_err(|e| {
                    tracing::error!(error = %e, "Could not create assistant thread");
                    RelayError::SessionCreation(e)
                })?;
                tracing::info!(thread_id = %thread.id, "Started chat session");
                ChatSession::new(thread.id)
            }
        };

        Ok(slot.insert(session))
    }

    /// Append the visitor's question to the remote thread.
    pub async fn submit_question(&self, thread_id: &str, text: &str) -> Result<(), AssistantError> {
        self.api.create_message(thread_id, Role::User, text).await?;
        Ok(())
    }

    /// Ask the configured assistant to process the thread.
    pub async fn start_run(&self, thread_id: &str) -> Result<Run, AssistantError> {
        self.api
            .create_run(
                thread_id,
                &self.config.assistant_id,
                self.config.instructions.as_deref(),
            )
            .await
    }

    /// Re-read the run until it is terminal or the poll policy times out.
    pub async fn poll_run(&self, thread_id: &str, run_id: &str) -> Result<PollResult, AssistantError> {
        let policy = &self.config.poll;
        let started = Instant::now();
        let mut schedule = policy.schedule();
        let mut polls = 0u32;

        loop {
            let run = self.api.retrieve_run(thread_id, run_id).await?;
            polls += 1;

            match run.classify() {
                RunStatus::Succeeded => {
                    return Ok(PollResult {
                        outcome: RunOutcome::Completed,
                        polls,
                    })
                }
                RunStatus::Failed => {
                    tracing::warn!(
                        thread_id,
                        run_id,
                        status = %run.status,
                        error = run
                            .last_error
                            .as_ref()
                            .and_then(|e| e.message.as_deref())
                            .unwrap_or("-"),
                        "Assistant run ended without success"
                    );
                    return Ok(PollResult {
                        outcome: RunOutcome::Failed { status: run.status },
                        polls,
                    });
                }
                RunStatus::Pending => {}
            }

            let waited = started.elapsed();
            let next_wait = if waited < policy.timeout {
                schedule.next_backoff()
            } else {
                None
            };

            let Some(wait) = next_wait else {
                tracing::warn!(
                    thread_id,
                    run_id,
                    status = %run.status,
                    polls,
                    waited_ms = waited.as_millis() as u64,
                    "Assistant run timed out"
                );
                return Ok(PollResult {
                    outcome: RunOutcome::TimedOut {
                        waited: policy.timeout,
                    },
                    polls,
                });
            };

            sleep(wait.min(policy.timeout.saturating_sub(waited))).await;
        }
    }

    /// Text of the newest assistant message, or the no-reply sentinel.
    pub async fn fetch_latest_reply(&self, thread_id: &str) -> Result<String, AssistantError> {
        Ok(self
            .latest_assistant_text(thread_id)
            .await?
            .unwrap_or_else(|| NO_REPLY_TEXT.to_string()))
    }

    async fn latest_assistant_text(&self, thread_id: &str) -> Result<Option<String>, AssistantError> {
        let messages = self
            .api
            .list_messages(thread_id, ListOrder::Desc, self.config.reply_page_size)
            .await?;

        Ok(messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .filter(|text| !text.is_empty()))
    }

    /// One full question/answer cycle. Both the question and whatever is
    /// shown in reply are appended to the session history.
    pub async fn relay(
        &self,
        session: &mut ChatSession,
        question: &str,
    ) -> Result<RelayReply, RelayError> {
        let _guard = self.acquire(&session.thread_id)?;
        let started = std::time::Instant::now();

        session.push(Role::User, question);

        let reply = match self.run_cycle(&session.thread_id, question).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(thread_id = %session.thread_id, error = %e, "Relay cycle failed");
                RelayReply::transport(&e)
            }
        };

        session.push(Role::Assistant, reply.text.clone());

        RELAY_CYCLES_TOTAL
            .with_label_values(&[reply.kind.as_str()])
            .inc();
        RELAY_CYCLE_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        tracing::info!(
            thread_id = %session.thread_id,
            outcome = reply.kind.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Relay cycle finished"
        );

        Ok(reply)
    }

    async fn run_cycle(&self, thread_id: &str, question: &str) -> Result<RelayReply, AssistantError> {
        self.submit_question(thread_id, question).await?;
        let run = self.start_run(thread_id).await?;
        let poll = self.poll_run(thread_id, &run.id).await?;

        RELAY_RUN_POLLS.observe(poll.polls as f64);

        match poll.outcome {
            RunOutcome::Completed => {
                let reply = self.latest_assistant_text(thread_id).await?;
                Ok(reply.map_or_else(RelayReply::no_reply, RelayReply::answer))
            }
            RunOutcome::Failed { status } => Ok(RelayReply::run_failed(&status)),
            RunOutcome::TimedOut { waited } => Ok(RelayReply::timed_out(waited)),
        }
    }

    fn acquire(&self, thread_id: &str) -> Result<InFlightGuard<'_>, RelayError> {
        if !self.in_flight.insert(thread_id.to_string()) {
            tracing::warn!(thread_id, "Rejected question while a run is in flight");
            return Err(RelayError::Busy);
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            thread_id: thread_id.to_string(),
        })
    }
}
