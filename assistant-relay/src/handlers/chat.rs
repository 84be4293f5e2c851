use super::app::MessageView;
use crate::models::ChatSession;
use crate::services::RelayError;
use crate::AppState;
use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use service_core::error::AppError;
use tower_sessions::Session;

#[derive(Deserialize)]
pub struct ChatForm {
    pub question: String,
}

/// The visitor's question followed by what came back for it.
#[derive(Template)]
#[template(path = "fragments/exchange.html")]
pub struct ExchangeTemplate {
    pub messages: Vec<MessageView>,
}

#[derive(Template)]
#[template(path = "fragments/notice.html")]
pub struct NoticeTemplate {
    pub message: String,
}

fn notice(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        NoticeTemplate {
            message: message.into(),
        },
    )
        .into_response()
}

pub async fn chat_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<ChatForm>,
) -> Result<Response, AppError> {
    if form.question.trim().is_empty() {
        return Ok(notice(StatusCode::BAD_REQUEST, "Please enter a question."));
    }

    let mut slot = ChatSession::load(&session).await?;
    let chat = match state.relay.ensure_session(&mut slot).await {
        Ok(chat) => chat,
        Err(e) => return Ok(notice(StatusCode::BAD_GATEWAY, e.to_string())),
    };

    let reply = match state.relay.relay(chat, &form.question).await {
        Ok(reply) => reply,
        Err(RelayError::Busy) => {
            return Ok(notice(
                StatusCode::CONFLICT,
                "The assistant is still answering your previous question.",
            ))
        }
        Err(e) => return Ok(notice(StatusCode::BAD_GATEWAY, e.to_string())),
    };

    if state.relay.take_retired(&chat.thread_id) {
        tracing::info!(
            thread_id = %chat.thread_id,
            "Discarding reply for a conversation that was reset"
        );
        return Ok(notice(
            StatusCode::CONFLICT,
            "The conversation was reset before this answer arrived.",
        ));
    }

    chat.store(&session).await?;

    let start = chat.history.len().saturating_sub(2);
    let exchanged = &chat.history[start..];
    let last = exchanged.len().saturating_sub(1);
    let messages = exchanged
        .iter()
        .enumerate()
        .map(|(i, m)| MessageView::from_message(m, i == last && reply.kind.is_error()))
        .collect();

    Ok(ExchangeTemplate { messages }.into_response())
}
