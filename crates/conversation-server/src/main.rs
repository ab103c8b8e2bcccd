use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use conversation_server::{
    build_router,
    config::Settings,
    logging::init_logging,
    services::{
        Classifier, Clock, ConversationService, GeminiProvider, LanguageModelProvider,
        SessionManager, SystemClock, WorkflowCache, WorkflowDefinition,
    },
    utils::ProviderLimiter,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: nothing is served with an invalid one
    let settings = Settings::load()?;

    let _log_guard = init_logging(&settings.logging)?;
    info!("🚀 Starting Conversation Server v{}...", env!("CARGO_PKG_VERSION"));
    info!("✅ Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider: Arc<dyn LanguageModelProvider> = Arc::new(GeminiProvider::new(&settings.llm)?);
    let limiter = ProviderLimiter::from_config(&settings.llm);
    info!(
        "✅ Provider ready: model={}, max_concurrency={}",
        settings.llm.model, settings.llm.max_concurrency
    );

    let classifier = Arc::new(Classifier::new(
        &settings.classifier,
        provider.clone(),
        limiter.clone(),
    )?);

    let definition = Arc::new(WorkflowDefinition::new(
        &settings.prompts,
        classifier,
        provider.clone(),
        limiter.clone(),
        clock.clone(),
    ));
    let workflows = Arc::new(WorkflowCache::new(definition));

    let sessions = Arc::new(SessionManager::new(
        settings.session.timeout(),
        clock,
        workflows,
    ));

    let service = Arc::new(ConversationService::new(sessions, provider, limiter));

    let cleanup_task = service.spawn_cleanup_task(Duration::from_secs(
        settings.session.cleanup_interval_seconds,
    ));

    let app = build_router(AppState::new(service.clone()), &settings.server);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = cleanup_task {
        task.abort();
    }
    let removed = service.cleanup_expired();
    info!(
        "👋 Shutdown complete: {} expired sessions removed, {} still in memory",
        removed,
        service.sessions().len()
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
