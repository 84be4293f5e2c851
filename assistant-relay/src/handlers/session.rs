use crate::models::ChatSession;
use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use service_core::error::AppError;
use tower_sessions::Session;

/// Drop the visitor's chat context and send htmx back to a fresh page.
pub async fn reset_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<impl IntoResponse, AppError> {
    if let Some(chat) = ChatSession::load(&session).await? {
        tracing::info!(thread_id = %chat.thread_id, "Chat session reset");
        state.relay.retire(&chat.thread_id);
    }
    ChatSession::clear(&session).await?;

    let mut headers = HeaderMap::new();
    headers.insert("HX-Redirect", HeaderValue::from_static("/"));
    Ok((StatusCode::OK, headers, ""))
}
