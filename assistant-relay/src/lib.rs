pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use config::{CredentialStatus, UiSettings};
use services::ChatRelay;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub ui: Arc<UiSettings>,
    pub credentials: CredentialStatus,
}

impl AppState {
    pub fn new(relay: Arc<ChatRelay>, ui: UiSettings, credentials: CredentialStatus) -> Self {
        Self {
            relay,
            ui: Arc::new(ui),
            credentials,
        }
    }
}
