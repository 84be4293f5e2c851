use assistant_relay::config::get_configuration;
use assistant_relay::services::metrics::init_metrics;
use assistant_relay::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Also loads `.env`, overriding variables already set in the shell.
    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        "assistant-relay",
        &configuration.observability.log_level,
        configuration.observability.otlp_endpoint.as_deref(),
    );

    init_metrics();

    let application = Application::build(configuration).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        eprintln!("{}", e);
        anyhow::anyhow!("Startup error: {}", e)
    })?;

    application.run_until_stopped().await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
