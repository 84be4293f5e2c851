//! Page, chat and reset routes driven through the router with a scripted
//! assistant, carrying the session cookie between requests.

use assistant_relay::config::{
    ObservabilitySettings, OpenAiSettings, RelaySettings, Settings, UiSettings,
};
use assistant_relay::services::assistant::mock::{CREATE_MESSAGE, CREATE_THREAD};
use assistant_relay::services::assistant::ScriptedAssistant;
use assistant_relay::startup::app_router;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use secrecy::Secret;
use service_core::config::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn test_settings() -> Settings {
    Settings {
        server: ServerConfig::default(),
        openai: OpenAiSettings {
            api_key: Some(Secret::new("sk-test".to_string())),
            assistant_id: Some("asst_test".to_string()),
            ..Default::default()
        },
        relay: RelaySettings {
            poll_initial_interval_ms: 5,
            poll_max_interval_ms: 20,
            run_timeout_secs: 1,
            ..Default::default()
        },
        ui: UiSettings {
            title: "Relay Test".to_string(),
            caption: "Ask anything".to_string(),
            placeholder: "Your question".to_string(),
        },
        observability: ObservabilitySettings::default(),
    }
}

fn router(api: Arc<ScriptedAssistant>) -> Router {
    let settings = test_settings();
    let credentials = settings.openai.credentials().unwrap();
    app_router(&settings, &credentials, api).unwrap()
}

fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn index_renders_page_and_reuses_thread() {
    let api = Arc::new(ScriptedAssistant::new());
    let app = router(api.clone());

    let response = app.clone().oneshot(get("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");

    let csp = response.headers()[header::CONTENT_SECURITY_POLICY]
        .to_str()
        .unwrap()
        .to_string();
    assert!(csp.contains("https://unpkg.com"));

    let body = body_text(response).await;
    assert!(body.contains("Relay Test"));
    assert!(body.contains("Ask anything"));
    assert!(body.contains("Your question"));
    assert!(body.contains("API key: ✅"));
    assert!(body.contains("Assistant ID: ✅"));
    assert!(body.contains("Project: —"));

    let response = app.oneshot(get("/", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(api.calls(CREATE_THREAD), 1);
}

#[tokio::test]
async fn question_returns_exchange_and_extends_history() {
    let api = Arc::new(
        ScriptedAssistant::new()
            .with_run_statuses(&["queued", "in_progress", "completed"])
            .with_reply("Invoices are approved in Fusion"),
    );
    let app = router(api.clone());

    let response = app
        .clone()
        .oneshot(post_form("/chat", "question=How+are+invoices+approved", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");

    let fragment = body_text(response).await;
    assert!(fragment.contains("How are invoices approved"));
    assert!(fragment.contains("Invoices are approved in Fusion"));
    assert!(!fragment.contains("message assistant error"));

    assert_eq!(
        api.posted_messages(),
        vec![(
            "thread_1".to_string(),
            "How are invoices approved".to_string()
        )]
    );

    let page = body_text(app.oneshot(get("/", Some(&cookie))).await.unwrap()).await;
    assert!(page.contains("How are invoices approved"));
    assert!(page.contains("Invoices are approved in Fusion"));
    assert_eq!(api.calls(CREATE_THREAD), 1);
}

#[tokio::test]
async fn blank_question_is_rejected_without_remote_calls() {
    let api = Arc::new(ScriptedAssistant::new());
    let app = router(api.clone());

    let response = app
        .oneshot(post_form("/chat", "question=+++", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(api.total_calls(), 0);
}

#[tokio::test]
async fn failed_run_is_shown_as_error_bubble() {
    let api = Arc::new(
        ScriptedAssistant::new()
            .with_run_statuses(&["queued", "failed"])
            .with_reply("should never be shown"),
    );
    let app = router(api);

    let response = app
        .oneshot(post_form("/chat", "question=Hello", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let fragment = body_text(response).await;
    assert!(fragment.contains("failed"));
    assert!(fragment.contains("message assistant error"));
    assert!(!fragment.contains("should never be shown"));
}

#[tokio::test]
async fn thread_creation_failure_disables_input() {
    let api = Arc::new(ScriptedAssistant::new().failing(CREATE_THREAD));
    let app = router(api);

    let response = app.oneshot(get("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.contains("Could not create thread"));
    assert!(body.contains("disabled"));
}

#[tokio::test]
async fn reset_starts_a_fresh_thread() {
    let api = Arc::new(ScriptedAssistant::new().with_reply("First answer"));
    let app = router(api.clone());

    let response = app
        .clone()
        .oneshot(post_form("/chat", "question=First+question", None))
        .await
        .unwrap();
    let cookie = session_cookie(&response).expect("session cookie");

    let response = app
        .clone()
        .oneshot(post_form("/reset", "", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["HX-Redirect"], "/");

    let page = body_text(app.oneshot(get("/", Some(&cookie))).await.unwrap()).await;
    assert!(!page.contains("First question"));
    assert_eq!(api.calls(CREATE_THREAD), 2);
}

#[tokio::test]
async fn second_question_while_running_is_refused() {
    let api = Arc::new(ScriptedAssistant::new().with_run_statuses(&["in_progress"]));
    let app = router(api.clone());

    let response = app.clone().oneshot(get("/", None)).await.unwrap();
    let cookie = session_cookie(&response).expect("session cookie");

    let slow = {
        let app = app.clone();
        let cookie = cookie.clone();
        tokio::spawn(async move {
            app.oneshot(post_form("/chat", "question=Slow", Some(&cookie)))
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = app
        .oneshot(post_form("/chat", "question=Impatient", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The first run never finishes remotely, so it ends on the timeout.
    let first = slow.await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(body_text(first).await.contains("did not finish within 1 seconds"));

    assert_eq!(api.calls(CREATE_MESSAGE), 1);
}

#[tokio::test]
async fn reset_while_running_is_not_undone_by_the_late_reply() {
    let api = Arc::new(ScriptedAssistant::new().with_run_statuses(&["in_progress"]));
    let app = router(api.clone());

    let response = app.clone().oneshot(get("/", None)).await.unwrap();
    let cookie = session_cookie(&response).expect("session cookie");

    let slow = {
        let app = app.clone();
        let cookie = cookie.clone();
        tokio::spawn(async move {
            app.oneshot(post_form("/chat", "question=OldQuestion", Some(&cookie)))
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = app
        .clone()
        .oneshot(post_form("/reset", "", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page = body_text(app.clone().oneshot(get("/", Some(&cookie))).await.unwrap()).await;
    assert!(!page.contains("OldQuestion"));

    let late = slow.await.unwrap();
    assert_eq!(late.status(), StatusCode::CONFLICT);

    let page = body_text(app.oneshot(get("/", Some(&cookie))).await.unwrap()).await;
    assert!(!page.contains("OldQuestion"));
    assert_eq!(api.calls(CREATE_THREAD), 2);
}

#[tokio::test]
async fn markdown_replies_are_rendered_and_sanitized() {
    let api = Arc::new(
        ScriptedAssistant::new()
            .with_reply("Invoices need **two** approvals.\n\n- raise\n- approve<script>alert(1)</script>"),
    );
    let app = router(api);

    let response = app
        .clone()
        .oneshot(post_form("/chat", "question=How+many+approvals", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");

    let fragment = body_text(response).await;
    assert!(fragment.contains("<strong>two</strong>"));
    assert!(fragment.contains("<li>raise</li>"));
    assert!(!fragment.contains("**two**"));
    assert!(!fragment.contains("<script"));

    let page = body_text(app.oneshot(get("/", Some(&cookie))).await.unwrap()).await;
    assert!(page.contains("<strong>two</strong>"));
}

#[tokio::test]
async fn page_carries_the_pending_question_bubble() {
    let app = router(Arc::new(ScriptedAssistant::new()));

    let page = body_text(app.oneshot(get("/", None)).await.unwrap()).await;

    assert!(page.contains(r#"<template id="pending-question">"#));
    assert!(page.contains("/static/chat.js"));
}
