//! OpenAI Assistants (v2) client.
//!
//! Implements thread, message and run calls over the REST API with `reqwest`.

use super::{AssistantApi, AssistantError, ListOrder, Run, Thread, ThreadMessage};
use crate::models::Role;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const BETA_HEADER: &str = "openai-beta";
const BETA_VALUE: &str = "assistants=v2";
const PROJECT_HEADER: &str = "openai-project";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiClientConfig {
    pub api_key: Secret<String>,
    /// Billing/project scope sent with every request when set.
    pub project: Option<String>,
    pub base_url: String,
    pub request_timeout: Duration,
}

/// Assistants API client.
pub struct OpenAiAssistantClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_instructions: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

/// Error envelope returned by the API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}

impl OpenAiAssistantClient {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, AssistantError> {
        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
            .map_err(|_| AssistantError::Setup("API key is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(BETA_HEADER, HeaderValue::from_static(BETA_VALUE));

        if let Some(project) = &config.project {
            let value = HeaderValue::from_str(project)
                .map_err(|_| AssistantError::Setup("project id is not a valid header value".into()))?;
            headers.insert(PROJECT_HEADER, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AssistantError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decode a successful body or turn the error envelope into an
    /// [`AssistantError`].
    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, AssistantError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                AssistantError::InvalidResponse(format!("{} response: {}", operation, e))
            });
        }

        if status.as_u16() == 429 {
            tracing::warn!(operation, "Assistant service rate limited the request");
            return Err(AssistantError::RateLimited);
        }

        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(envelope) => {
                tracing::error!(
                    operation,
                    status = %status,
                    kind = envelope.error.kind.as_deref().unwrap_or("-"),
                    code = envelope.error.code.as_deref().unwrap_or("-"),
                    "Assistant service returned an error"
                );
                envelope.error.message
            }
            Err(_) => {
                tracing::error!(operation, status = %status, body = %body, "Assistant service returned an error");
                body
            }
        };

        Err(AssistantError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, operation: &str) -> Result<T, AssistantError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        Self::decode(response, operation).await
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        let thread: Thread = self
            .post_json("/threads", &serde_json::json!({}), "create_thread")
            .await?;

        tracing::info!(thread_id = %thread.id, "Created assistant thread");
        Ok(thread)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage, AssistantError> {
        let request = CreateMessageRequest { role, content };

        tracing::debug!(thread_id, content_len = content.len(), "Posting message to thread");

        self.post_json(
            &format!("/threads/{}/messages", thread_id),
            &request,
            "create_message",
        )
        .await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        additional_instructions: Option<&str>,
    ) -> Result<Run, AssistantError> {
        let request = CreateRunRequest {
            assistant_id,
            additional_instructions,
        };

        let run: Run = self
            .post_json(&format!("/threads/{}/runs", thread_id), &request, "create_run")
            .await?;

        tracing::info!(
            thread_id,
            run_id = %run.id,
            status = %run.status,
            with_instructions = additional_instructions.is_some(),
            "Started assistant run"
        );
        Ok(run)
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{}/runs/{}", thread_id, run_id)))
            .send()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        Self::decode(response, "retrieve_run").await
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        order: ListOrder,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, AssistantError> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{}/messages", thread_id)))
            .query(&[("order", order.as_str().to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        let list: MessageList = Self::decode(response, "list_messages").await?;
        Ok(list.data)
    }
}
