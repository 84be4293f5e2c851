use crate::config::CredentialStatus;
use crate::models::{ChatMessage, ChatSession};
use crate::services::markdown;
use crate::AppState;
use askama::Template;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use service_core::error::AppError;
use tower_sessions::Session;

/// A chat bubble as rendered on the page.
pub struct MessageView {
    pub role: &'static str,
    /// Sanitized HTML rendered from the message's Markdown.
    pub html: String,
    pub time: String,
    pub error: bool,
}

impl MessageView {
    pub fn from_message(message: &ChatMessage, error: bool) -> Self {
        Self {
            role: message.role.as_str(),
            html: markdown::render(&message.text),
            time: message.time_label(),
            error,
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub title: String,
    pub caption: String,
    pub placeholder: String,
    pub status: CredentialStatus,
    pub history: Vec<MessageView>,
    pub error: Option<String>,
}

pub async fn index(
    State(state): State<AppState>,
    session: Session,
) -> Result<IndexTemplate, AppError> {
    let mut slot = ChatSession::load(&session).await?;

    let (history, error) = match state.relay.ensure_session(&mut slot).await {
        Ok(chat) => {
            chat.store(&session).await?;
            let history = chat
                .history
                .iter()
                .map(|m| MessageView::from_message(m, false))
                .collect();
            (history, None)
        }
        Err(e) => (Vec::new(), Some(e.to_string())),
    };

    Ok(IndexTemplate {
        title: state.ui.title.clone(),
        caption: state.ui.caption.clone(),
        placeholder: state.ui.placeholder.clone(),
        status: state.credentials,
        history,
        error,
    })
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "assistant-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
