//! Startup tests: bind an ephemeral port and talk to the server over HTTP.

use assistant_relay::config::{
    ObservabilitySettings, OpenAiSettings, RelaySettings, Settings, UiSettings,
};
use assistant_relay::services::assistant::ScriptedAssistant;
use assistant_relay::startup::Application;
use reqwest::Client;
use secrecy::Secret;
use service_core::config::ServerConfig;
use std::sync::Arc;
use std::time::Duration;

fn test_settings() -> Settings {
    Settings {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        openai: OpenAiSettings {
            api_key: Some(Secret::new("sk-test".to_string())),
            assistant_id: Some("asst_test".to_string()),
            ..Default::default()
        },
        relay: RelaySettings::default(),
        ui: UiSettings::default(),
        observability: ObservabilitySettings::default(),
    }
}

/// Spawn the application on a random port and return the port number.
async fn spawn_app() -> u16 {
    let app = Application::build_with_api(test_settings(), Arc::new(ScriptedAssistant::new()))
        .await
        .expect("Failed to build application");

    let port = app.port();

    tokio::spawn(async move {
        let _ = app.run_until_stopped().await;
    });

    port
}

#[tokio::test]
async fn health_check_returns_ok() {
    let port = spawn_app().await;
    let client = Client::new();

    let response = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "assistant-relay");
}

#[tokio::test]
async fn metrics_are_exposed_as_text() {
    assistant_relay::services::metrics::init_metrics();
    let port = spawn_app().await;
    let client = Client::new();

    // Generate at least one labelled sample.
    client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .expect("Failed to send request");

    let response = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("http_requests_total"));
}

#[tokio::test]
async fn stylesheet_is_served() {
    let port = spawn_app().await;

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/static/chat.css", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
}
